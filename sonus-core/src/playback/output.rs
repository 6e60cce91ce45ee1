//! Speaker output via cpal.
//!
//! `cpal::Stream` is `!Send` on most platforms, so the stream lives on a
//! dedicated thread for its whole life; `AudioOutput` is the Send handle
//! the playback engines hold. Engines write mono f32 frames into an SPSC
//! ring; the output callback pops one mono frame per device frame and
//! duplicates it across the device's channels, applying the volume. An
//! empty ring plays silence (underrun), it never blocks the callback.
//!
//! The consumed-frame counter is the playback engines' output clock.

use std::sync::{
    atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering},
    Arc,
};

use ringbuf::{traits::Producer, HeapProd};

use crate::error::Result;

/// Ring capacity in mono frames: 2^20 ≈ 21.8 s at 48 kHz. Large enough
/// that a fully decoded TTS sentence fits without back-pressure stalls.
const RING_CAPACITY: usize = 1 << 20;

/// Send handle to a live output stream.
pub struct AudioOutput {
    producer: HeapProd<f32>,
    volume_bits: Arc<AtomicU32>,
    consumed_frames: Arc<AtomicU64>,
    shutdown: Arc<AtomicBool>,
    device_rate: u32,
    thread: Option<std::thread::JoinHandle<()>>,
}

impl AudioOutput {
    /// Open the default output device at its default configuration.
    ///
    /// Blocks until the stream is confirmed playing (or failed).
    #[cfg(feature = "audio-cpal")]
    pub fn open() -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::{SampleFormat, SampleRate, StreamConfig};
        use ringbuf::{
            traits::{Consumer, Split},
            HeapRb,
        };
        use tracing::{error, info};

        use crate::error::SonusError;

        let (producer, mut consumer) = HeapRb::<f32>::new(RING_CAPACITY).split();
        let volume_bits = Arc::new(AtomicU32::new(1.0f32.to_bits()));
        let consumed_frames = Arc::new(AtomicU64::new(0));
        let shutdown = Arc::new(AtomicBool::new(false));

        let volume_cb = Arc::clone(&volume_bits);
        let consumed_cb = Arc::clone(&consumed_frames);
        let shutdown_thread = Arc::clone(&shutdown);

        // The stream must be created and dropped on the same thread.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();
        let thread = std::thread::Builder::new()
            .name("sonus-output".into())
            .spawn(move || {
                let host = cpal::default_host();
                let device = match host.default_output_device() {
                    Some(d) => d,
                    None => {
                        let _ = open_tx.send(Err(SonusError::NoDefaultOutputDevice));
                        return;
                    }
                };
                let supported = match device.default_output_config() {
                    Ok(c) => c,
                    Err(e) => {
                        let _ = open_tx.send(Err(SonusError::AudioDevice(e.to_string())));
                        return;
                    }
                };

                let device_rate = supported.sample_rate().0;
                let channels = supported.channels().max(1);
                info!(
                    device = device.name().unwrap_or_default().as_str(),
                    device_rate, channels, "opening output device"
                );

                let config = StreamConfig {
                    channels,
                    sample_rate: SampleRate(device_rate),
                    buffer_size: cpal::BufferSize::Default,
                };

                let ch = channels as usize;
                let mut mono = Vec::new();
                let fill = move |data: &mut [f32]| {
                    let frames = data.len() / ch;
                    mono.resize(frames, 0.0);
                    let got = consumer.pop_slice(&mut mono);
                    mono[got..].fill(0.0); // underrun → silence
                    let volume = f32::from_bits(volume_cb.load(Ordering::Relaxed));
                    for (f, &s) in mono.iter().enumerate() {
                        let v = s * volume;
                        let base = f * ch;
                        data[base..base + ch].fill(v);
                    }
                    consumed_cb.fetch_add(frames as u64, Ordering::Relaxed);
                };

                let built = match supported.sample_format() {
                    SampleFormat::F32 => device.build_output_stream(
                        &config,
                        {
                            let mut fill = fill;
                            move |data: &mut [f32], _| fill(data)
                        },
                        |err| error!("output stream error: {err}"),
                        None,
                    ),
                    SampleFormat::I16 => device.build_output_stream(
                        &config,
                        {
                            let mut fill = fill;
                            let mut scratch: Vec<f32> = Vec::new();
                            move |data: &mut [i16], _| {
                                scratch.resize(data.len(), 0.0);
                                fill(&mut scratch);
                                for (d, s) in data.iter_mut().zip(&scratch) {
                                    *d = (s.clamp(-1.0, 1.0) * 32767.0) as i16;
                                }
                            }
                        },
                        |err| error!("output stream error: {err}"),
                        None,
                    ),
                    fmt => {
                        let _ = open_tx.send(Err(SonusError::AudioStream(format!(
                            "unsupported output sample format: {fmt:?}"
                        ))));
                        return;
                    }
                };

                let stream = match built {
                    Ok(s) => s,
                    Err(e) => {
                        let _ = open_tx.send(Err(SonusError::AudioStream(e.to_string())));
                        return;
                    }
                };
                if let Err(e) = stream.play() {
                    let _ = open_tx.send(Err(SonusError::AudioStream(e.to_string())));
                    return;
                }
                let _ = open_tx.send(Ok(device_rate));

                while !shutdown_thread.load(Ordering::Acquire) {
                    std::thread::sleep(std::time::Duration::from_millis(50));
                }
                // Stream drops here, releasing the device on its own thread.
            })
            .map_err(|e| SonusError::AudioStream(format!("output thread spawn: {e}")))?;

        let device_rate = match open_rx.recv() {
            Ok(Ok(rate)) => rate,
            Ok(Err(e)) => return Err(e),
            Err(_) => {
                return Err(SonusError::AudioStream(
                    "output thread died before opening".into(),
                ))
            }
        };

        Ok(Self {
            producer,
            volume_bits,
            consumed_frames,
            shutdown,
            device_rate,
            thread: Some(thread),
        })
    }

    #[cfg(not(feature = "audio-cpal"))]
    pub fn open() -> Result<Self> {
        Err(crate::error::SonusError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    /// Device output rate (Hz). Engines rate-convert decoded audio to this.
    pub fn device_rate(&self) -> u32 {
        self.device_rate
    }

    /// Seconds of audio the device has consumed — the output clock.
    pub fn clock_secs(&self) -> f64 {
        self.consumed_frames.load(Ordering::Relaxed) as f64 / self.device_rate as f64
    }

    /// Clamp to [0, 1] and apply to current and subsequent playback.
    pub fn set_volume(&self, volume: f32) {
        self.volume_bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    /// A Send + Clone handle for adjusting volume after the output has
    /// moved onto a worker thread.
    pub fn volume_control(&self) -> VolumeControl {
        VolumeControl {
            bits: Arc::clone(&self.volume_bits),
        }
    }

    /// Queue mono frames, blocking while the ring is full. Returns early
    /// if the output is shutting down.
    pub fn write_blocking(&mut self, mut samples: &[f32]) {
        while !samples.is_empty() && !self.shutdown.load(Ordering::Acquire) {
            let written = self.producer.push_slice(samples);
            samples = &samples[written..];
            if !samples.is_empty() {
                std::thread::sleep(std::time::Duration::from_millis(5));
            }
        }
    }

    /// Seconds of silence, as pre-roll padding.
    pub fn write_silence(&mut self, secs: f64) {
        let frames = (secs * self.device_rate as f64).round() as usize;
        self.write_blocking(&vec![0.0f32; frames]);
    }

    /// Stop the device thread. Idempotent; also runs on drop.
    pub fn close(&mut self) {
        self.shutdown.store(true, Ordering::Release);
        if let Some(handle) = self.thread.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for AudioOutput {
    fn drop(&mut self) {
        self.close();
    }
}

/// Detached volume knob for a live [`AudioOutput`].
#[derive(Clone)]
pub struct VolumeControl {
    bits: Arc<AtomicU32>,
}

impl VolumeControl {
    pub fn set(&self, volume: f32) {
        self.bits
            .store(volume.clamp(0.0, 1.0).to_bits(), Ordering::Relaxed);
    }

    pub fn get(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }
}
