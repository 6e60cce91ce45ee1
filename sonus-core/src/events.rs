//! Event types broadcast to host applications.
//!
//! Hosts (the CLI, or an embedding UI) subscribe via
//! `SessionClient::subscribe_events` / `CaptureGraph::subscribe_activity`.
//! All types derive serde so hosts can forward them verbatim over an IPC
//! boundary.

use serde::{Deserialize, Serialize};

/// Emitted by the capture pipeline for each processed audio block.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ActivityEvent {
    /// Monotonically increasing event sequence number.
    pub seq: u64,
    /// Root-mean-square level of the conditioned block.
    pub rms: f32,
    /// Smoothed, clamped [0, 1] mic level for UI meters.
    pub level: f32,
    /// Whether the VAD currently considers the stream speech.
    pub speaking: bool,
    /// Set on the single block where a speech run ended.
    pub voice_ended: bool,
}

/// Session-level events produced by the inbound message dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "camelCase", rename_all_fields = "camelCase")]
pub enum SessionEvent {
    /// The server acknowledged `scriptsession.start`.
    Started,
    /// Interim transcript text (may change).
    TranscriptDelta { text: String },
    /// A finalized transcript segment.
    Transcript { text: String },
    /// A translation segment.
    Translated {
        text: String,
        is_final: bool,
        /// Source-script text the translation consumed, when reported.
        script: Option<String>,
    },
    /// Milliseconds from local voice-end to the first TTS audio.
    TtsLatency { ms: f64 },
    /// Clock estimate snapshot after a pong.
    Latency { rtt_ms: f64, offset_ms: f64 },
    /// The server closed the session.
    Closed {
        connected_time: Option<f64>,
        llm_input_token_count: Option<u64>,
        llm_output_token_count: Option<u64>,
        llm_cached_token_count: Option<u64>,
    },
    /// The transport failed; all dependent state has been torn down.
    TransportError { detail: String },
}
