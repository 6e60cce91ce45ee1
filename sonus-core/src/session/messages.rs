//! The JSON wire contract with the speech/translation backend.
//!
//! One JSON object per WebSocket text frame, discriminated by `"type"`.
//! Field names and type tags are fixed by the server; everything here is
//! `#[serde(rename)]`-pinned rather than derived from Rust identifiers.

use serde::{Deserialize, Serialize};

/// Client → server messages.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// Begin a session. Sent once, immediately after connecting.
    #[serde(rename = "scriptsession.start")]
    SessionStart {
        in_language: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        out_language: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        model: Option<String>,
        use_filler: bool,
        /// Human-readable local time, for server-side greeting copy.
        #[serde(skip_serializing_if = "Option::is_none")]
        time: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// One encoded audio frame: base64 PCM16LE mono 24 kHz plus the
    /// client-side send timestamp (ms).
    #[serde(rename = "input_audio_buffer.append")]
    InputAudioAppend { audio: String, t0: f64 },

    /// Flush marker, sent when the mic stops.
    #[serde(rename = "input_audio_buffer.commit")]
    InputAudioCommit,

    /// Clock sync probe (simple form).
    #[serde(rename = "ping")]
    Ping { t0: f64 },

    /// Clock sync probe (four-timestamp form).
    #[serde(rename = "latency.ping")]
    LatencyPing { t0: f64 },

    /// Application-level keepalive (browsers cannot send WS ping frames;
    /// the server keeps accepting it from native clients too).
    #[serde(rename = "heartbeat")]
    Heartbeat,

    /// Upload a reference voice sample, same encoding as mic frames.
    #[serde(rename = "scriptsession.setvoice")]
    SetVoice {
        format: String,
        sample_rate: u32,
        channels: u16,
        audio: String,
    },

    /// Update the display name associated with the session.
    #[serde(rename = "scriptsession.setname")]
    SetName { name: String },

    /// End the session.
    #[serde(rename = "session.close")]
    SessionClose,
}

impl ClientMessage {
    /// The `scriptsession.setvoice` message for an already-encoded
    /// PCM16LE/24 kHz mono sample.
    pub fn set_voice_pcm16le_24k(audio_b64: String) -> Self {
        Self::SetVoice {
            format: "pcm16le".into(),
            sample_rate: crate::TARGET_SAMPLE_RATE,
            channels: 1,
            audio: audio_b64,
        }
    }
}

/// Encoding of a `tts_audio` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TtsFormat {
    /// MP3, 22.05 kHz, 32 kbit/s — decoded as an opaque blob.
    #[serde(rename = "mp3_22050_32")]
    Mp3_22050_32,
    /// Raw PCM16LE mono at the target rate — wrapped into a WAV blob.
    #[serde(rename = "pcm16le")]
    Pcm16Le,
    /// Independently decodable Opus frames — fed to the frame decoder.
    #[serde(rename = "opus")]
    Opus,
}

/// Server → client messages.
///
/// Unknown message types deserialize into `Unknown` and are logged, not
/// treated as errors — the server adds diagnostic types freely.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerMessage {
    #[serde(rename = "scriptsession.started")]
    SessionStarted,

    /// Simple pong: echoes `t0`, carries the server's send time.
    #[serde(rename = "pong")]
    Pong { t0: f64, server_now: f64 },

    /// Four-timestamp pong: server receive (`t1`) and send (`t2`) times.
    #[serde(rename = "latency.pong")]
    LatencyPong { t0: f64, t1: f64, t2: f64 },

    /// Per-frame receipt ack with the original `t0` and server receive time.
    #[serde(rename = "audio.recv.ack")]
    AudioRecvAck { t0: f64, t1: f64 },

    /// Interim transcript text.
    #[serde(rename = "delta")]
    Delta { text: Option<String> },

    /// Finalized transcript segment.
    #[serde(rename = "transcript")]
    Transcript { text: Option<String> },

    /// Translation segment; `script` is the source text it consumed.
    #[serde(rename = "translated")]
    Translated {
        text: Option<String>,
        is_final: bool,
        script: Option<String>,
    },

    /// Synthesized speech audio, base64, with the server send timestamp.
    #[serde(rename = "tts_audio")]
    TtsAudio {
        audio: String,
        format: TtsFormat,
        #[serde(default)]
        server_ts: Option<f64>,
        /// Frame sequence number, present for framed formats (opus).
        #[serde(default)]
        seq: Option<u64>,
    },

    #[serde(rename = "session.close")]
    SessionClose {
        #[serde(default)]
        connected_time: Option<f64>,
        #[serde(default)]
        llm_input_token_count: Option<u64>,
        #[serde(default)]
        llm_output_token_count: Option<u64>,
        #[serde(default)]
        llm_cached_token_count: Option<u64>,
    },

    /// Anything this client version does not understand.
    #[serde(other)]
    Unknown,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn session_start_omits_absent_optionals() {
        let msg = ClientMessage::SessionStart {
            in_language: "ko".into(),
            out_language: Some("en".into()),
            model: None,
            use_filler: false,
            time: None,
            name: None,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(
            v,
            json!({
                "type": "scriptsession.start",
                "in_language": "ko",
                "out_language": "en",
                "use_filler": false,
            })
        );
    }

    #[test]
    fn append_frame_shape() {
        let msg = ClientMessage::InputAudioAppend {
            audio: "AAAA".into(),
            t0: 1_700_000_000_000.0,
        };
        let v = serde_json::to_value(&msg).unwrap();
        assert_eq!(v["type"], "input_audio_buffer.append");
        assert_eq!(v["audio"], "AAAA");
        assert_eq!(v["t0"], 1_700_000_000_000.0);
    }

    #[test]
    fn unit_like_messages_carry_only_type() {
        for (msg, tag) in [
            (ClientMessage::InputAudioCommit, "input_audio_buffer.commit"),
            (ClientMessage::Heartbeat, "heartbeat"),
            (ClientMessage::SessionClose, "session.close"),
        ] {
            let v = serde_json::to_value(&msg).unwrap();
            assert_eq!(v, json!({ "type": tag }));
        }
    }

    #[test]
    fn set_voice_uses_wire_encoding_constants() {
        let v = serde_json::to_value(ClientMessage::set_voice_pcm16le_24k("QUJD".into())).unwrap();
        assert_eq!(v["type"], "scriptsession.setvoice");
        assert_eq!(v["format"], "pcm16le");
        assert_eq!(v["sample_rate"], 24_000);
        assert_eq!(v["channels"], 1);
    }

    #[test]
    fn inbound_tts_audio_parses_all_formats() {
        for (tag, expected) in [
            ("mp3_22050_32", TtsFormat::Mp3_22050_32),
            ("pcm16le", TtsFormat::Pcm16Le),
            ("opus", TtsFormat::Opus),
        ] {
            let raw = format!(
                r#"{{"type":"tts_audio","audio":"QUJD","format":"{tag}","server_ts":123.0}}"#
            );
            let msg: ServerMessage = serde_json::from_str(&raw).unwrap();
            match msg {
                ServerMessage::TtsAudio { format, server_ts, .. } => {
                    assert_eq!(format, expected);
                    assert_eq!(server_ts, Some(123.0));
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[test]
    fn inbound_pong_and_close_parse() {
        let pong: ServerMessage =
            serde_json::from_str(r#"{"type":"pong","t0":1.0,"server_now":2.0}"#).unwrap();
        assert_eq!(pong, ServerMessage::Pong { t0: 1.0, server_now: 2.0 });

        let close: ServerMessage = serde_json::from_str(
            r#"{"type":"session.close","connected_time":62.5,"llm_input_token_count":100}"#,
        )
        .unwrap();
        match close {
            ServerMessage::SessionClose {
                connected_time,
                llm_input_token_count,
                llm_output_token_count,
                ..
            } => {
                assert_eq!(connected_time, Some(62.5));
                assert_eq!(llm_input_token_count, Some(100));
                assert_eq!(llm_output_token_count, None);
            }
            other => panic!("unexpected message: {other:?}"),
        }
    }

    #[test]
    fn unknown_types_are_tolerated() {
        let msg: ServerMessage =
            serde_json::from_str(r#"{"type":"oai_event","payload":{}}"#).unwrap();
        assert_eq!(msg, ServerMessage::Unknown);
    }
}
