//! WebSocket session with the speech/translation backend.
//!
//! ## Task layout
//!
//! ```text
//! connect()
//!   ├─► outbound pump   UnboundedReceiver<ClientMessage> → ws sink
//!   ├─► ticker          ping every 2 s, heartbeat every 30 s
//!   └─► inbound loop    ws stream → ServerMessage → dispatch
//!                         ├─ pong / latency.pong → ClockSync
//!                         ├─ transcripts / translations → SessionEvent
//!                         └─ tts_audio → playback engine by format
//! ```
//!
//! All three tasks stop when the socket closes from either side. Playback
//! engines are created lazily on the first audio of each format, so a
//! session that never receives TTS never touches the output device.

pub mod messages;

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tracing::{debug, error, info, warn};

use crate::{
    capture::VoiceEndTracker,
    clock::{now_ms, ClockSync},
    codec::{base64_to_bytes, pcm16_to_wav, OpusHead},
    error::{Result, SonusError},
    events::SessionEvent,
    playback::{BlobKind, BlobQueuePlayer, OpusStreamPlayer, PlaybackConfig},
};

pub use messages::{ClientMessage, ServerMessage, TtsFormat};

/// Clock sync probe interval.
const PING_INTERVAL: Duration = Duration::from_secs(2);

/// Application-level keepalive interval.
const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(30);

/// Broadcast capacity for session events.
const BROADCAST_CAP: usize = 256;

/// Subtracted from measured voice-end→first-TTS time: the server commits
/// buffered audio roughly this long after the client-side edge.
const TTS_LATENCY_BIAS_MS: f64 = 300.0;

/// Connection parameters for [`SessionClient::connect`].
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// WebSocket endpoint, `ws://` or `wss://`.
    pub url: String,
    /// Spoken (input) language code, e.g. `"ko"`.
    pub in_language: String,
    /// Translation target; `None` for transcription only.
    pub out_language: Option<String>,
    /// Server-side model override.
    pub model: Option<String>,
    /// Ask the server to vocalize filler while the answer is generated.
    pub use_filler: bool,
    /// Display name attached to the session.
    pub name: Option<String>,
    /// Human-readable local time for server-side greeting copy.
    pub local_time: Option<String>,
    /// Reference voice sample, already encoded PCM16LE/24 kHz base64.
    pub voice_sample_b64: Option<String>,
    /// Also send four-timestamp `latency.ping` probes.
    pub latency_pings: bool,
    /// Inbound stream parameters for the opus playback path.
    pub playback: PlaybackConfig,
    /// Initial playback volume, [0, 1].
    pub volume: f32,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:8080/session".into(),
            in_language: "en".into(),
            out_language: None,
            model: None,
            use_filler: false,
            name: None,
            local_time: None,
            voice_sample_b64: None,
            latency_pings: false,
            playback: PlaybackConfig::default(),
            volume: 1.0,
        }
    }
}

impl SessionConfig {
    fn start_message(&self) -> ClientMessage {
        ClientMessage::SessionStart {
            in_language: self.in_language.clone(),
            out_language: self.out_language.clone(),
            model: self.model.clone(),
            use_filler: self.use_filler,
            time: self.local_time.clone(),
            name: self.name.clone(),
        }
    }
}

/// A live session. Dropping the client tears the connection down.
pub struct SessionClient {
    outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    events_tx: broadcast::Sender<SessionEvent>,
    clock: Arc<Mutex<ClockSync>>,
    closed: Arc<AtomicBool>,
}

impl SessionClient {
    /// Connect, send `scriptsession.start` (and the voice sample, when
    /// configured), and spawn the session tasks.
    ///
    /// `voice_end` is the capture pipeline's voice-end tracker; it anchors
    /// the voice-end→first-TTS latency measurement.
    pub async fn connect(config: SessionConfig, voice_end: VoiceEndTracker) -> Result<Self> {
        let (ws, _response) = connect_async(config.url.as_str()).await?;
        info!(url = %config.url, "session connected");
        let (mut sink, stream) = ws.split();

        let (outbound_tx, mut outbound_rx) = mpsc::unbounded_channel::<ClientMessage>();
        let (events_tx, _) = broadcast::channel(BROADCAST_CAP);
        let clock = Arc::new(Mutex::new(ClockSync::default()));
        let closed = Arc::new(AtomicBool::new(false));

        outbound_tx
            .send(config.start_message())
            .map_err(|_| SonusError::SessionClosed)?;
        if let Some(sample) = &config.voice_sample_b64 {
            let _ = outbound_tx.send(ClientMessage::set_voice_pcm16le_24k(sample.clone()));
        }
        if let Some(name) = &config.name {
            let _ = outbound_tx.send(ClientMessage::SetName { name: name.clone() });
        }

        // Outbound pump: single owner of the sink.
        {
            let events_tx = events_tx.clone();
            let closed = Arc::clone(&closed);
            tokio::spawn(async move {
                while let Some(msg) = outbound_rx.recv().await {
                    let text = match serde_json::to_string(&msg) {
                        Ok(t) => t,
                        Err(e) => {
                            error!("outbound serialization failed: {e}");
                            continue;
                        }
                    };
                    if let Err(e) = sink.send(Message::Text(text)).await {
                        if !closed.swap(true, Ordering::SeqCst) {
                            let _ = events_tx.send(SessionEvent::TransportError {
                                detail: e.to_string(),
                            });
                        }
                        break;
                    }
                }
                let _ = sink.close().await;
            });
        }

        // Ticker: clock probes and keepalive.
        {
            let outbound_tx = outbound_tx.clone();
            let closed = Arc::clone(&closed);
            let latency_pings = config.latency_pings;
            tokio::spawn(async move {
                let mut ping = tokio::time::interval(PING_INTERVAL);
                let mut heartbeat = tokio::time::interval(HEARTBEAT_INTERVAL);
                loop {
                    if closed.load(Ordering::SeqCst) {
                        break;
                    }
                    tokio::select! {
                        _ = ping.tick() => {
                            if outbound_tx.send(ClientMessage::Ping { t0: now_ms() }).is_err() {
                                break;
                            }
                            if latency_pings {
                                let _ = outbound_tx.send(ClientMessage::LatencyPing { t0: now_ms() });
                            }
                        }
                        _ = heartbeat.tick() => {
                            if outbound_tx.send(ClientMessage::Heartbeat).is_err() {
                                break;
                            }
                        }
                    }
                }
            });
        }

        // Inbound loop.
        {
            let events_tx = events_tx.clone();
            let clock = Arc::clone(&clock);
            let closed = Arc::clone(&closed);
            let playback = config.playback;
            let volume = config.volume;
            tokio::spawn(async move {
                let mut stream = stream;
                let mut dispatch = Dispatch::new(events_tx.clone(), clock, voice_end, playback, volume);
                while let Some(frame) = stream.next().await {
                    match frame {
                        Ok(Message::Text(text)) => {
                            let msg: ServerMessage = match serde_json::from_str(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    warn!("undecodable server message: {e}");
                                    continue;
                                }
                            };
                            if dispatch.handle(msg) == Flow::Stop {
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => {
                            debug!("server sent close frame");
                            break;
                        }
                        Ok(_) => {} // binary/ping/pong frames carry nothing for us
                        Err(e) => {
                            if !closed.swap(true, Ordering::SeqCst) {
                                let _ = events_tx.send(SessionEvent::TransportError {
                                    detail: e.to_string(),
                                });
                            }
                            break;
                        }
                    }
                }
                closed.store(true, Ordering::SeqCst);
                dispatch.teardown();
                info!("session inbound loop ended");
            });
        }

        Ok(Self {
            outbound_tx,
            events_tx,
            clock,
            closed,
        })
    }

    /// Sender for outbound messages; hand this to
    /// [`CaptureGraph::start`](crate::capture::CaptureGraph::start).
    pub fn outbound_sender(&self) -> mpsc::UnboundedSender<ClientMessage> {
        self.outbound_tx.clone()
    }

    /// Subscribe to session events.
    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    /// Current clock estimate: `(rtt_ms, offset_ms)`.
    pub fn latency(&self) -> (f64, f64) {
        let clock = self.clock.lock();
        (clock.rtt_ms(), clock.offset_ms())
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Request an orderly shutdown: `session.close` goes out, the server's
    /// close frame ends the tasks. Idempotent, never fails.
    pub fn close(&self) {
        if !self.is_closed() {
            let _ = self.outbound_tx.send(ClientMessage::SessionClose);
        }
    }
}

impl Drop for SessionClient {
    fn drop(&mut self) {
        self.close();
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Flow {
    Continue,
    Stop,
}

/// Inbound message dispatcher. Owns the playback engines; lives on the
/// inbound task.
struct Dispatch {
    events_tx: broadcast::Sender<SessionEvent>,
    clock: Arc<Mutex<ClockSync>>,
    voice_end: VoiceEndTracker,
    playback: PlaybackConfig,
    volume: f32,
    blob: Option<BlobQueuePlayer>,
    opus: Option<OpusStreamPlayer>,
    /// Local frame counter for opus payloads that carry no `seq`.
    opus_seq: u64,
    /// Voice-end timestamp already answered by a TTS latency event.
    reported_voice_end: f64,
}

impl Dispatch {
    fn new(
        events_tx: broadcast::Sender<SessionEvent>,
        clock: Arc<Mutex<ClockSync>>,
        voice_end: VoiceEndTracker,
        playback: PlaybackConfig,
        volume: f32,
    ) -> Self {
        Self {
            events_tx,
            clock,
            voice_end,
            playback,
            volume,
            blob: None,
            opus: None,
            opus_seq: 0,
            reported_voice_end: 0.0,
        }
    }

    fn handle(&mut self, msg: ServerMessage) -> Flow {
        match msg {
            ServerMessage::SessionStarted => {
                let _ = self.events_tx.send(SessionEvent::Started);
            }
            ServerMessage::Pong { t0, server_now } => {
                let mut clock = self.clock.lock();
                clock.on_pong(t0, server_now, now_ms());
                let _ = self.events_tx.send(SessionEvent::Latency {
                    rtt_ms: clock.rtt_ms(),
                    offset_ms: clock.offset_ms(),
                });
            }
            ServerMessage::LatencyPong { t0, t1, t2 } => {
                let mut clock = self.clock.lock();
                clock.on_pong4(t0, t1, t2, now_ms());
                let _ = self.events_tx.send(SessionEvent::Latency {
                    rtt_ms: clock.rtt_ms(),
                    offset_ms: clock.offset_ms(),
                });
            }
            ServerMessage::AudioRecvAck { t0, t1 } => {
                debug!(uplink_ms = t1 - t0 - self.clock.lock().offset_ms(), "audio frame acked");
            }
            ServerMessage::Delta { text } => {
                if let Some(text) = text {
                    let _ = self.events_tx.send(SessionEvent::TranscriptDelta { text });
                }
            }
            ServerMessage::Transcript { text } => {
                if let Some(text) = text {
                    let _ = self.events_tx.send(SessionEvent::Transcript { text });
                }
            }
            ServerMessage::Translated {
                text,
                is_final,
                script,
            } => {
                if let Some(text) = text {
                    let _ = self.events_tx.send(SessionEvent::Translated {
                        text,
                        is_final,
                        script,
                    });
                }
            }
            ServerMessage::TtsAudio {
                audio,
                format,
                server_ts,
                seq,
            } => {
                if let Some(ts) = server_ts {
                    let transit = self.tts_transit_ms(ts, now_ms());
                    debug!("tts audio transit {transit:.1} ms");
                }
                self.report_tts_latency();
                self.play_tts(&audio, format, seq);
            }
            ServerMessage::SessionClose {
                connected_time,
                llm_input_token_count,
                llm_output_token_count,
                llm_cached_token_count,
            } => {
                let _ = self.events_tx.send(SessionEvent::Closed {
                    connected_time,
                    llm_input_token_count,
                    llm_output_token_count,
                    llm_cached_token_count,
                });
                return Flow::Stop;
            }
            ServerMessage::Unknown => {
                debug!("ignoring unknown server message type");
            }
        }
        Flow::Continue
    }

    /// First TTS audio after a voice-end edge closes the latency loop.
    fn report_tts_latency(&mut self) {
        if let Some(edge) = self.voice_end.last_ms() {
            if edge > self.reported_voice_end {
                self.reported_voice_end = edge;
                let ms = (now_ms() - edge - TTS_LATENCY_BIAS_MS).max(0.0);
                let _ = self.events_tx.send(SessionEvent::TtsLatency { ms });
            }
        }
    }

    /// One-way delay of a server-stamped message, mapped through the synced
    /// clock offset. Diagnostic only.
    fn tts_transit_ms(&self, server_ts: f64, received_ms: f64) -> f64 {
        self.clock.lock().one_way_ms(server_ts, received_ms)
    }

    fn play_tts(&mut self, audio_b64: &str, format: TtsFormat, seq: Option<u64>) {
        match format {
            TtsFormat::Mp3_22050_32 => {
                if let Some(blob) = self.blob_player() {
                    if let Err(e) = blob.enqueue(audio_b64, BlobKind::Mp3) {
                        warn!("mp3 enqueue failed: {e}");
                    }
                }
            }
            TtsFormat::Pcm16Le => {
                let bytes = match base64_to_bytes(audio_b64) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("undecodable pcm16le payload: {e}");
                        return;
                    }
                };
                let samples: Vec<i16> = bytes
                    .chunks_exact(2)
                    .map(|pair| i16::from_le_bytes([pair[0], pair[1]]))
                    .collect();
                let wav = pcm16_to_wav(&samples, self.playback.sample_rate, 1);
                if let Some(blob) = self.blob_player() {
                    if let Err(e) = blob.enqueue_bytes(wav, BlobKind::Wav) {
                        warn!("pcm16le enqueue failed: {e}");
                    }
                }
            }
            TtsFormat::Opus => {
                let payload = match base64_to_bytes(audio_b64) {
                    Ok(b) => b,
                    Err(e) => {
                        warn!("undecodable opus payload: {e}");
                        return;
                    }
                };
                self.play_opus(&payload, seq);
            }
        }
    }

    fn play_opus(&mut self, payload: &[u8], seq: Option<u64>) {
        if self.opus.is_none() {
            match OpusStreamPlayer::new(self.playback) {
                Ok(player) => {
                    player.set_volume(self.volume);
                    self.opus = Some(player);
                }
                Err(e) => {
                    warn!("opus playback unavailable: {e}");
                    return;
                }
            }
        }
        let Some(player) = self.opus.as_mut() else {
            return;
        };

        if !player.is_configured() {
            // The stream opens with an identification header; anything else
            // means a headerless stream at the pipeline defaults.
            match OpusHead::parse(payload) {
                Ok(head) => {
                    if let Err(e) = player.configure(head) {
                        warn!("opus stream rejected: {e}");
                        self.opus = None;
                    }
                    return; // header frame carries no audio
                }
                Err(_) => {
                    if let Err(e) = player.configure(OpusHead::mono(self.playback.sample_rate)) {
                        warn!("opus stream rejected: {e}");
                        self.opus = None;
                        return;
                    }
                }
            }
        }

        let seq = seq.unwrap_or_else(|| {
            let s = self.opus_seq;
            self.opus_seq += 1;
            s
        });
        if let Err(e) = player.decode_frame(payload, seq, None) {
            warn!(seq, "opus frame dropped: {e}");
        }
    }

    fn blob_player(&mut self) -> Option<&BlobQueuePlayer> {
        if self.blob.is_none() {
            match BlobQueuePlayer::new() {
                Ok(player) => {
                    player.set_volume(self.volume);
                    self.blob = Some(player);
                }
                Err(e) => {
                    warn!("blob playback unavailable: {e}");
                    return None;
                }
            }
        }
        self.blob.as_ref()
    }

    fn teardown(&mut self) {
        if let Some(mut blob) = self.blob.take() {
            blob.dispose();
        }
        if let Some(mut opus) = self.opus.take() {
            opus.close();
        }
    }
}
