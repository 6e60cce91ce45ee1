//! # sonus-core
//!
//! Client-side real-time voice streaming SDK.
//!
//! ## Architecture
//!
//! ```text
//! Microphone → CaptureGraph → SPSC RingBuffer → pipeline(spawn_blocking)
//!                                   │
//!                      condition → RMS → VAD edge
//!                                   │
//!                 resample 24 kHz → PCM16 → base64
//!                                   │
//!                  ClientMessage::InputAudioAppend ──► SessionClient ──► ws
//!
//! ws ──► SessionClient ──► tts_audio ──► BlobQueuePlayer (mp3/wav)
//!                     │              └─► OpusStreamPlayer (opus frames)
//!                     └─► pong ──► ClockSync (EMA offset/rtt)
//! ```
//!
//! The audio callback is zero-alloc. All heap work happens on the blocking
//! pipeline thread or the playback workers.

#![forbid(unsafe_code)]
#![warn(clippy::all)]

pub mod capture;
pub mod clock;
pub mod codec;
pub mod error;
pub mod events;
pub mod playback;
pub mod session;
pub mod vad;

// Convenience re-exports for downstream crates
pub use capture::{CaptureConfig, CaptureGraph};
pub use clock::ClockSync;
pub use error::SonusError;
pub use events::{ActivityEvent, SessionEvent};
pub use playback::{BlobQueuePlayer, OpusStreamPlayer, PlaybackConfig};
pub use session::{
    messages::{ClientMessage, ServerMessage},
    SessionClient, SessionConfig,
};
pub use vad::{EnergyVad, VadConfig};

/// Sample rate the server expects for outbound mic audio (Hz).
pub const TARGET_SAMPLE_RATE: u32 = 24_000;
