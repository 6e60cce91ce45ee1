//! Audio playback.
//!
//! Two engines share the device layer in [`output`]:
//!
//! - [`BlobQueuePlayer`] plays complete clips (mp3, wav) strictly in
//!   enqueue order; used for TTS formats that arrive as whole utterances.
//! - [`OpusStreamPlayer`] plays a continuous frame stream against a
//!   play-head timeline with a short preroll; used for low-latency TTS.
//!
//! Both convert decoded audio to the device rate with [`RateConverter`]
//! and expose a live volume handle.

mod blob;
mod opus_stream;
mod output;
mod rate;
mod timeline;

pub use blob::{BlobKind, BlobQueuePlayer};
pub use opus_stream::OpusStreamPlayer;
pub use output::{AudioOutput, VolumeControl};
pub use rate::RateConverter;
pub use timeline::Timeline;

use crate::TARGET_SAMPLE_RATE;

/// Parameters of the inbound audio stream.
#[derive(Debug, Clone, Copy)]
pub struct PlaybackConfig {
    /// Decode rate of the stream in Hz.
    pub sample_rate: u32,
    /// Channel count of the stream. Only mono is supported.
    pub channels: u16,
    /// Nominal duration of one frame in microseconds, used to derive a
    /// timestamp when a frame carries none.
    pub frame_duration_us: u64,
    /// Scheduling margin ahead of the device clock for the first frame.
    pub preroll_secs: f64,
}

impl Default for PlaybackConfig {
    fn default() -> Self {
        Self {
            sample_rate: TARGET_SAMPLE_RATE,
            channels: 1,
            frame_duration_us: 20_000,
            preroll_secs: timeline::DEFAULT_PREROLL_SECS,
        }
    }
}
