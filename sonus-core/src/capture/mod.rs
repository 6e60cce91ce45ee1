//! Microphone capture and the outbound audio pipeline.
//!
//! # Design constraints
//!
//! The cpal input callback runs on an OS audio thread at elevated priority.
//! It **must not** allocate, block on a lock, or perform I/O. The callback
//! therefore only mixes to mono into a reused scratch buffer and pushes
//! into an SPSC ring whose `push_slice` is lock-free.
//!
//! # Threading note
//!
//! `cpal::Stream` is `!Send` on most platforms (COM on Windows, CoreAudio
//! on macOS). `MicCapture` must be created and dropped on the same thread;
//! [`CaptureGraph::start`] accomplishes this by opening the device inside
//! `spawn_blocking`, on the thread that then runs the pipeline.

pub mod conditioning;
pub mod pipeline;

use std::sync::{
    atomic::{AtomicBool, AtomicU64, Ordering},
    Arc,
};

use ringbuf::{traits::Split, HeapRb};
use tokio::sync::{broadcast, mpsc};
use tracing::info;

use crate::{
    error::{Result, SonusError},
    events::ActivityEvent,
    session::ClientMessage,
    vad::VadConfig,
    TARGET_SAMPLE_RATE,
};

pub use pipeline::{CaptureDiagnostics, DiagnosticsSnapshot};

/// Producer half of the capture ring — held by the audio callback.
pub type AudioProducer = ringbuf::HeapProd<f32>;

/// Consumer half — held by the pipeline thread.
pub type AudioConsumer = ringbuf::HeapCons<f32>;

/// 2^22 f32 samples ≈ 87 s at 48 kHz: capture survives long pipeline
/// stalls without callback drops.
pub const RING_CAPACITY: usize = 1 << 22;

/// Broadcast capacity for activity events.
const BROADCAST_CAP: usize = 256;

pub fn create_capture_ring() -> (AudioProducer, AudioConsumer) {
    HeapRb::<f32>::new(RING_CAPACITY).split()
}

/// Capture pipeline parameters.
#[derive(Debug, Clone)]
pub struct CaptureConfig {
    /// Samples per processing block at the capture rate. Default: 4096.
    pub block_samples: usize,
    /// Gain applied after metering, before encoding. Default: 0.8.
    pub attenuation: f32,
    /// Wire sample rate all outbound audio is resampled to.
    pub target_sample_rate: u32,
    /// Voice activity detection thresholds.
    pub vad: VadConfig,
    /// Input device name; `None` selects the system default.
    pub preferred_device: Option<String>,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            block_samples: 4_096,
            attenuation: 0.8,
            target_sample_rate: TARGET_SAMPLE_RATE,
            vad: VadConfig::default(),
            preferred_device: None,
        }
    }
}

/// Wall-clock timestamp (ms since epoch) of the most recent voice-end
/// edge. Shared between the capture pipeline (writer) and the session's
/// latency accounting (reader). Zero bits mean "no edge yet".
#[derive(Debug, Clone, Default)]
pub struct VoiceEndTracker {
    bits: Arc<AtomicU64>,
}

impl VoiceEndTracker {
    pub fn record(&self, at_ms: f64) {
        self.bits.store(at_ms.to_bits(), Ordering::Release);
    }

    pub fn last_ms(&self) -> Option<f64> {
        match self.bits.load(Ordering::Acquire) {
            0 => None,
            bits => Some(f64::from_bits(bits)),
        }
    }
}

/// Handle to an active microphone stream.
///
/// **Not `Send`** — create and drop on the same OS thread.
pub struct MicCapture {
    #[cfg(feature = "audio-cpal")]
    _stream: cpal::Stream,
    running: Arc<AtomicBool>,
    /// Capture sample rate reported by the device (Hz).
    pub sample_rate: u32,
}

#[cfg(feature = "audio-cpal")]
impl MicCapture {
    /// Open an input device by preferred name, falling back to the system
    /// default and then to the first available device.
    pub fn open(
        producer: AudioProducer,
        running: Arc<AtomicBool>,
        preferred_device: Option<&str>,
    ) -> Result<Self> {
        use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
        use cpal::{SampleFormat, SampleRate, StreamConfig};

        let host = cpal::default_host();
        let mut selected = None;

        if let Some(name) = preferred_device {
            match host.input_devices() {
                Ok(mut devices) => {
                    selected =
                        devices.find(|d| d.name().map(|n| n == name).unwrap_or(false));
                    if selected.is_none() {
                        tracing::warn!("input device '{name}' not found, falling back");
                    }
                }
                Err(e) => {
                    tracing::warn!("failed to list input devices: {e}");
                }
            }
        }

        let device = if let Some(device) = selected {
            device
        } else if let Some(default) = host.default_input_device() {
            default
        } else {
            let mut devices = host
                .input_devices()
                .map_err(|e| SonusError::AudioDevice(e.to_string()))?;
            devices.next().ok_or(SonusError::NoDefaultInputDevice)?
        };

        info!(
            device = device.name().unwrap_or_default().as_str(),
            "opening input device"
        );

        let supported = device
            .default_input_config()
            .map_err(|e| SonusError::AudioDevice(e.to_string()))?;
        let sample_rate = supported.sample_rate().0;
        let channels = supported.channels();
        info!(sample_rate, channels, "capture config selected");

        let config = StreamConfig {
            channels,
            sample_rate: SampleRate(sample_rate),
            buffer_size: cpal::BufferSize::Default,
        };

        let stream = match supported.sample_format() {
            SampleFormat::F32 => build_mono_input::<f32>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                |s| s,
            ),
            SampleFormat::I16 => build_mono_input::<i16>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                |s| s as f32 / 32768.0,
            ),
            SampleFormat::U8 => build_mono_input::<u8>(
                &device,
                &config,
                producer,
                Arc::clone(&running),
                |s| (s as f32 - 128.0) / 128.0,
            ),
            fmt => Err(SonusError::AudioStream(format!(
                "unsupported sample format: {fmt:?}"
            ))),
        }?;

        stream
            .play()
            .map_err(|e| SonusError::AudioStream(e.to_string()))?;

        Ok(Self {
            _stream: stream,
            running,
            sample_rate,
        })
    }

    /// Signal the callback to no-op on its next invocation.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Build one input stream: mix interleaved frames to mono in a reused
/// scratch buffer and push into the ring. Shared across sample formats.
#[cfg(feature = "audio-cpal")]
fn build_mono_input<T>(
    device: &cpal::Device,
    config: &cpal::StreamConfig,
    mut producer: AudioProducer,
    running: Arc<AtomicBool>,
    to_f32: impl Fn(T) -> f32 + Send + 'static,
) -> Result<cpal::Stream>
where
    T: cpal::SizedSample + Copy + Send + 'static,
{
    use cpal::traits::DeviceTrait;
    use ringbuf::traits::Producer;

    let ch = config.channels as usize;
    let mut mix_buf: Vec<f32> = Vec::new();

    device
        .build_input_stream(
            config,
            move |data: &[T], _info| {
                if !running.load(Ordering::Relaxed) {
                    return;
                }
                let frames = data.len() / ch;
                mix_buf.resize(frames, 0.0);
                for (f, frame) in data.chunks_exact(ch).enumerate() {
                    let mut sum = 0f32;
                    for &s in frame {
                        sum += to_f32(s);
                    }
                    mix_buf[f] = sum / ch as f32;
                }
                let written = producer.push_slice(&mix_buf);
                if written < mix_buf.len() {
                    tracing::warn!(
                        "capture ring full: dropped {} frames",
                        mix_buf.len() - written
                    );
                }
            },
            |err| tracing::error!("audio stream error: {err}"),
            None,
        )
        .map_err(|e| SonusError::AudioStream(e.to_string()))
}

/// Stub when the `audio-cpal` feature is disabled.
#[cfg(not(feature = "audio-cpal"))]
impl MicCapture {
    pub fn open(
        _producer: AudioProducer,
        _running: Arc<AtomicBool>,
        _preferred_device: Option<&str>,
    ) -> Result<Self> {
        Err(SonusError::AudioStream(
            "compiled without audio-cpal feature".into(),
        ))
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::Release);
    }
}

/// Names of available input devices, default first.
#[cfg(feature = "audio-cpal")]
pub fn list_input_devices() -> Vec<String> {
    use cpal::traits::{DeviceTrait, HostTrait};

    let host = cpal::default_host();
    let default_name = host.default_input_device().and_then(|d| d.name().ok());
    let mut names: Vec<String> = host
        .input_devices()
        .map(|devices| devices.filter_map(|d| d.name().ok()).collect())
        .unwrap_or_default();
    names.sort_by_key(|n| default_name.as_deref() != Some(n.as_str()));
    names
}

#[cfg(not(feature = "audio-cpal"))]
pub fn list_input_devices() -> Vec<String> {
    vec![]
}

/// Top-level capture lifecycle: device open, pipeline thread, activity
/// broadcast.
///
/// `CaptureGraph` is `Send + Sync`; all fields use interior mutability.
pub struct CaptureGraph {
    config: CaptureConfig,
    running: Arc<AtomicBool>,
    activity_tx: broadcast::Sender<ActivityEvent>,
    voice_end: VoiceEndTracker,
    diagnostics: Arc<CaptureDiagnostics>,
}

impl CaptureGraph {
    pub fn new(config: CaptureConfig) -> Self {
        let (activity_tx, _) = broadcast::channel(BROADCAST_CAP);
        Self {
            config,
            running: Arc::new(AtomicBool::new(false)),
            activity_tx,
            voice_end: VoiceEndTracker::default(),
            diagnostics: Arc::new(CaptureDiagnostics::default()),
        }
    }

    /// Open the microphone and start the pipeline. Encoded audio frames
    /// flow into `outbound_tx` as `input_audio_buffer.append` messages.
    ///
    /// Blocks until the device is confirmed open (or fails), then returns;
    /// the pipeline keeps running on a background blocking thread.
    ///
    /// # Errors
    /// - [`SonusError::AlreadyRunning`] if started twice.
    /// - [`SonusError::NoDefaultInputDevice`] / [`SonusError::AudioStream`]
    ///   on device failure.
    pub fn start(&self, outbound_tx: mpsc::UnboundedSender<ClientMessage>) -> Result<()> {
        if self.running.load(Ordering::SeqCst) {
            return Err(SonusError::AlreadyRunning);
        }

        self.diagnostics.reset();
        self.running.store(true, Ordering::SeqCst);

        let (producer, consumer) = create_capture_ring();

        let config = self.config.clone();
        let running = Arc::clone(&self.running);
        let activity_tx = self.activity_tx.clone();
        let voice_end = self.voice_end.clone();
        let diagnostics = Arc::clone(&self.diagnostics);

        // Sync oneshot: the pipeline thread reports open success/failure,
        // carrying the actual capture sample rate.
        let (open_tx, open_rx) = std::sync::mpsc::channel::<Result<u32>>();

        tokio::task::spawn_blocking(move || {
            // Device open happens on THIS thread (cpal::Stream is !Send).
            let capture = match MicCapture::open(
                producer,
                Arc::clone(&running),
                config.preferred_device.as_deref(),
            ) {
                Ok(c) => {
                    let _ = open_tx.send(Ok(c.sample_rate));
                    c
                }
                Err(e) => {
                    let _ = open_tx.send(Err(e));
                    running.store(false, Ordering::SeqCst);
                    return;
                }
            };

            let capture_sample_rate = capture.sample_rate;
            pipeline::run(pipeline::PipelineContext {
                config,
                consumer,
                running,
                outbound_tx,
                activity_tx,
                voice_end,
                capture_sample_rate,
                diagnostics,
            });

            // Stream drops here, releasing the device on this thread.
            drop(capture);
        });

        match open_rx.recv() {
            Ok(Ok(_rate)) => {
                info!("capture started");
                Ok(())
            }
            Ok(Err(e)) => {
                self.running.store(false, Ordering::SeqCst);
                Err(e)
            }
            Err(_) => {
                self.running.store(false, Ordering::SeqCst);
                Err(SonusError::Other(anyhow::anyhow!(
                    "capture task died unexpectedly"
                )))
            }
        }
    }

    /// Stop the pipeline. The pipeline thread ships its last full block,
    /// then flushes the input buffer with a commit marker before exiting,
    /// so the commit always follows the final append on the wire.
    ///
    /// # Errors
    /// - [`SonusError::NotRunning`] if not currently capturing.
    pub fn stop(&self) -> Result<()> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(SonusError::NotRunning);
        }
        self.running.store(false, Ordering::SeqCst);
        info!("capture stop requested");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Subscribe to live mic level / VAD activity events.
    pub fn subscribe_activity(&self) -> broadcast::Receiver<ActivityEvent> {
        self.activity_tx.subscribe()
    }

    /// Handle for reading the most recent voice-end timestamp.
    pub fn voice_end_tracker(&self) -> VoiceEndTracker {
        self.voice_end.clone()
    }

    /// Snapshot of pipeline counters for observability.
    pub fn diagnostics_snapshot(&self) -> DiagnosticsSnapshot {
        self.diagnostics.snapshot()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn voice_end_tracker_round_trips() {
        let tracker = VoiceEndTracker::default();
        assert_eq!(tracker.last_ms(), None);
        tracker.record(1_700_000_000_123.5);
        assert_eq!(tracker.last_ms(), Some(1_700_000_000_123.5));

        let reader = tracker.clone();
        tracker.record(1_700_000_000_500.0);
        assert_eq!(reader.last_ms(), Some(1_700_000_000_500.0));
    }

    #[test]
    fn stop_without_start_is_an_error() {
        let graph = CaptureGraph::new(CaptureConfig::default());
        assert!(matches!(graph.stop(), Err(SonusError::NotRunning)));
        assert!(!graph.is_running());
    }
}
