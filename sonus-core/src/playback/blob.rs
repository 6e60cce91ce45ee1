//! Playback variant A: an ordered queue of independently decodable blobs.
//!
//! TTS audio for the mp3 and pcm16le formats arrives as complete clips.
//! `enqueue` appends to a queue drained by a single worker thread, which
//! decodes each blob fully (symphonia), mixes to mono, rate-converts to
//! the device rate, and streams it into the output ring. One worker means
//! items play strictly in enqueue order with no concurrent playback; a
//! blob that fails to decode is logged and skipped, exactly as if it had
//! finished playing.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    mpsc, Arc,
};

use symphonia::core::audio::SampleBuffer;
use symphonia::core::codecs::{DecoderOptions, CODEC_TYPE_NULL};
use symphonia::core::errors::Error as SymphoniaError;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;
use tracing::{debug, warn};

use super::output::{AudioOutput, VolumeControl};
use super::rate::RateConverter;
use crate::codec::base64_to_bytes;
use crate::error::{Result, SonusError};

/// Frames streamed into the output ring per write, so `dispose()` can
/// interrupt a long clip promptly.
const WRITE_SLICE_FRAMES: usize = 4_800;

/// Container type of an enqueued blob.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    /// `audio/mpeg`
    Mp3,
    /// `audio/wav`
    Wav,
}

impl BlobKind {
    fn extension(self) -> &'static str {
        match self {
            BlobKind::Mp3 => "mp3",
            BlobKind::Wav => "wav",
        }
    }
}

struct QueuedBlob {
    bytes: Vec<u8>,
    kind: BlobKind,
}

/// Where the worker streams decoded frames. Production playback goes to
/// the cpal-backed [`AudioOutput`]; tests substitute an in-memory sink.
trait BlobSink {
    fn device_rate(&self) -> u32;
    fn write(&mut self, frames: &[f32]);
    fn finish(&mut self);
}

impl BlobSink for AudioOutput {
    fn device_rate(&self) -> u32 {
        AudioOutput::device_rate(self)
    }

    fn write(&mut self, frames: &[f32]) {
        self.write_blocking(frames);
    }

    fn finish(&mut self) {
        self.close();
    }
}

/// Ordered, gap-minimized blob player.
pub struct BlobQueuePlayer {
    queue_tx: Option<mpsc::Sender<QueuedBlob>>,
    disposed: Arc<AtomicBool>,
    volume: VolumeControl,
    worker: Option<std::thread::JoinHandle<()>>,
}

impl BlobQueuePlayer {
    /// Open the output device and start the queue worker.
    pub fn new() -> Result<Self> {
        let output = AudioOutput::open()?;
        let volume = output.volume_control();
        let disposed = Arc::new(AtomicBool::new(false));
        let (queue_tx, queue_rx) = mpsc::channel::<QueuedBlob>();

        let disposed_worker = Arc::clone(&disposed);
        let worker = std::thread::Builder::new()
            .name("sonus-blob-player".into())
            .spawn(move || run_queue(queue_rx, output, disposed_worker))
            .map_err(|e| SonusError::AudioStream(format!("player thread spawn: {e}")))?;

        Ok(Self {
            queue_tx: Some(queue_tx),
            disposed,
            volume,
            worker: Some(worker),
        })
    }

    /// Decode base64 and append the blob to the playback queue. Playback
    /// begins immediately when nothing is currently playing.
    pub fn enqueue(&self, b64: &str, kind: BlobKind) -> Result<()> {
        self.enqueue_bytes(base64_to_bytes(b64)?, kind)
    }

    /// As [`enqueue`](BlobQueuePlayer::enqueue), for already-decoded bytes.
    pub fn enqueue_bytes(&self, bytes: Vec<u8>, kind: BlobKind) -> Result<()> {
        let tx = self.queue_tx.as_ref().ok_or(SonusError::SessionClosed)?;
        tx.send(QueuedBlob { bytes, kind })
            .map_err(|_| SonusError::SessionClosed)
    }

    /// Clamped [0, 1], applied to current and subsequent playback.
    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    /// Stop playback, drop all queued blobs, release the device.
    /// Idempotent; also runs on drop.
    pub fn dispose(&mut self) {
        self.disposed.store(true, Ordering::Release);
        self.queue_tx.take(); // worker's recv() ends after the flag is seen
        if let Some(handle) = self.worker.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for BlobQueuePlayer {
    fn drop(&mut self) {
        self.dispose();
    }
}

/// Worker: strictly sequential decode-and-play.
fn run_queue<S: BlobSink>(queue_rx: mpsc::Receiver<QueuedBlob>, mut sink: S, disposed: Arc<AtomicBool>) {
    while let Ok(blob) = queue_rx.recv() {
        if disposed.load(Ordering::Acquire) {
            break;
        }
        let Some((mono, rate)) = decode_blob(&blob.bytes, blob.kind) else {
            continue; // failed item is treated as completed
        };

        let mut converter = match RateConverter::new(rate, sink.device_rate()) {
            Ok(c) => c,
            Err(e) => {
                warn!("rate converter unavailable, skipping blob: {e}");
                continue;
            }
        };

        for slice in mono.chunks(WRITE_SLICE_FRAMES) {
            if disposed.load(Ordering::Acquire) {
                break;
            }
            sink.write(&converter.process(slice));
        }
        sink.write(&converter.drain());
    }
    sink.finish();
}

/// Fully decode one blob to mono f32. `None` on any decode failure — the
/// caller advances past it the same way it advances past completion.
pub(crate) fn decode_blob(bytes: &[u8], kind: BlobKind) -> Option<(Vec<f32>, u32)> {
    match try_decode_blob(bytes, kind) {
        Ok(decoded) => Some(decoded),
        Err(e) => {
            warn!(kind = ?kind, "blob decode failed, skipping: {e}");
            None
        }
    }
}

fn try_decode_blob(bytes: &[u8], kind: BlobKind) -> Result<(Vec<f32>, u32)> {
    let cursor = std::io::Cursor::new(bytes.to_vec());
    let mss = MediaSourceStream::new(Box::new(cursor), Default::default());
    let mut hint = Hint::new();
    hint.with_extension(kind.extension());

    let probed = symphonia::default::get_probe()
        .format(
            &hint,
            mss,
            &FormatOptions::default(),
            &MetadataOptions::default(),
        )
        .map_err(|e| SonusError::Decoder(format!("probe: {e}")))?;
    let mut format = probed.format;

    let track = format
        .tracks()
        .iter()
        .find(|t| t.codec_params.codec != CODEC_TYPE_NULL)
        .ok_or_else(|| SonusError::Decoder("no decodable track".into()))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs()
        .make(&track.codec_params, &DecoderOptions::default())
        .map_err(|e| SonusError::Decoder(format!("decoder: {e}")))?;

    let mut mono: Vec<f32> = Vec::new();
    let mut rate = track.codec_params.sample_rate.unwrap_or(0);
    let mut sample_buf: Option<SampleBuffer<f32>> = None;

    loop {
        let packet = match format.next_packet() {
            Ok(p) => p,
            Err(SymphoniaError::IoError(e))
                if e.kind() == std::io::ErrorKind::UnexpectedEof =>
            {
                break
            }
            Err(e) => return Err(SonusError::Decoder(format!("packet: {e}"))),
        };
        if packet.track_id() != track_id {
            continue;
        }

        let decoded = match decoder.decode(&packet) {
            Ok(d) => d,
            Err(SymphoniaError::DecodeError(e)) => {
                // A corrupt packet inside an otherwise good clip.
                debug!("skipping corrupt packet: {e}");
                continue;
            }
            Err(e) => return Err(SonusError::Decoder(format!("decode: {e}"))),
        };

        let spec = *decoded.spec();
        rate = spec.rate;
        let channels = spec.channels.count().max(1);

        let buf = sample_buf.get_or_insert_with(|| {
            SampleBuffer::<f32>::new(decoded.capacity() as u64, spec)
        });
        buf.copy_interleaved_ref(decoded);

        let interleaved = buf.samples();
        for frame in interleaved.chunks_exact(channels) {
            mono.push(frame.iter().sum::<f32>() / channels as f32);
        }
    }

    if rate == 0 {
        return Err(SonusError::Decoder("unknown sample rate".into()));
    }
    Ok((mono, rate))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::pcm16_to_wav;

    fn wav_blob(samples: &[i16]) -> Vec<u8> {
        pcm16_to_wav(samples, 24_000, 1)
    }

    #[test]
    fn decodes_a_wav_blob_to_mono() {
        let pcm: Vec<i16> = (0..240).map(|i| (i * 50) as i16).collect();
        let (mono, rate) = decode_blob(&wav_blob(&pcm), BlobKind::Wav).unwrap();
        assert_eq!(rate, 24_000);
        assert_eq!(mono.len(), 240);
        // Spot-check normalisation.
        assert!((mono[100] - (100 * 50) as f32 / 32768.0).abs() < 1e-3);
    }

    #[test]
    fn garbage_blob_is_skipped_not_fatal() {
        assert!(decode_blob(b"definitely not audio", BlobKind::Mp3).is_none());
        assert!(decode_blob(&[], BlobKind::Wav).is_none());
    }

    #[derive(Default)]
    struct RecordingSink {
        written: Vec<f32>,
        finished: bool,
    }

    impl BlobSink for &mut RecordingSink {
        fn device_rate(&self) -> u32 {
            24_000 // matches the wav fixtures: passthrough conversion
        }

        fn write(&mut self, frames: &[f32]) {
            self.written.extend_from_slice(frames);
        }

        fn finish(&mut self) {
            self.finished = true;
        }
    }

    #[test]
    fn queue_order_survives_a_failed_item() {
        // [A, B, C] where B is undecodable: the worker plays A, skips B as
        // if it had completed, and advances to C without reordering.
        let (tx, rx) = mpsc::channel();
        for bytes in [
            wav_blob(&[8_000; 48]),
            b"garbage".to_vec(),
            wav_blob(&[-8_000; 48]),
        ] {
            tx.send(QueuedBlob {
                bytes,
                kind: BlobKind::Wav,
            })
            .unwrap();
        }
        drop(tx); // queue closes once drained

        let mut sink = RecordingSink::default();
        run_queue(rx, &mut sink, Arc::new(AtomicBool::new(false)));

        assert!(sink.finished);
        assert_eq!(sink.written.len(), 96, "A and C frames only, no gap filler");
        assert!(
            sink.written[..48].iter().all(|&s| s > 0.2),
            "A's positive frames play first"
        );
        assert!(
            sink.written[48..].iter().all(|&s| s < -0.2),
            "C's negative frames follow immediately"
        );
    }

    #[test]
    fn dispose_flag_stops_the_worker_before_the_next_item() {
        let (tx, rx) = mpsc::channel();
        tx.send(QueuedBlob {
            bytes: wav_blob(&[8_000; 48]),
            kind: BlobKind::Wav,
        })
        .unwrap();
        drop(tx);

        let mut sink = RecordingSink::default();
        run_queue(rx, &mut sink, Arc::new(AtomicBool::new(true)));

        assert!(sink.finished);
        assert!(sink.written.is_empty(), "disposed worker plays nothing");
    }
}
