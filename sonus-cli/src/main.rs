//! `sonus` — terminal client for live transcription and translation.
//!
//! Captures the microphone, streams it to a session endpoint, prints
//! transcripts/translations as they arrive, and plays synthesized speech
//! on the default output device. Ctrl-C commits the input buffer, closes
//! the session, and waits for the server's final counters.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::{debug, info, warn};

use sonus_core::{
    capture::{list_input_devices, CaptureConfig, CaptureGraph},
    codec::{read_wav_mono, samples_to_pcm16_base64},
    SessionClient, SessionConfig, SessionEvent, TARGET_SAMPLE_RATE,
};

#[derive(Parser)]
#[command(name = "sonus", version, about)]
struct Cli {
    /// Session endpoint (ws:// or wss://)
    #[arg(short, long, env = "SONUS_URL", default_value = "ws://127.0.0.1:8080/session")]
    url: String,

    /// Spoken (input) language code
    #[arg(short, long, default_value = "en")]
    in_language: String,

    /// Translation target language; omit for transcription only
    #[arg(short, long)]
    out_language: Option<String>,

    /// Server-side model override
    #[arg(long)]
    model: Option<String>,

    /// Display name attached to the session
    #[arg(long)]
    name: Option<String>,

    /// WAV file with a reference voice sample for synthesis
    #[arg(long)]
    voice_sample: Option<PathBuf>,

    /// Ask the server to vocalize filler while answers are generated
    #[arg(long)]
    use_filler: bool,

    /// Playback volume, 0.0 to 1.0
    #[arg(long, default_value = "1.0")]
    volume: f32,

    /// Send four-timestamp latency probes alongside plain pings
    #[arg(long)]
    latency_pings: bool,

    /// Input device name; omit for the system default
    #[arg(short, long)]
    device: Option<String>,

    /// Print session events as JSON lines instead of human-readable text
    #[arg(long)]
    json: bool,

    /// Show the mic level meter on stderr
    #[arg(long)]
    meter: bool,

    /// List input devices and exit
    #[arg(long)]
    list_devices: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // ── Tracing ───────────────────────────────────────────────────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("sonus=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if cli.list_devices {
        for name in list_input_devices() {
            println!("{name}");
        }
        return Ok(());
    }

    // ── Voice sample ──────────────────────────────────────────────────────
    let voice_sample_b64 = match &cli.voice_sample {
        Some(path) => {
            let (mono, rate) = read_wav_mono(path)
                .with_context(|| format!("reading voice sample {}", path.display()))?;
            info!(path = %path.display(), rate, samples = mono.len(), "voice sample loaded");
            Some(samples_to_pcm16_base64(&mono, rate, TARGET_SAMPLE_RATE))
        }
        None => None,
    };

    // ── Session ───────────────────────────────────────────────────────────
    let capture = CaptureGraph::new(CaptureConfig {
        preferred_device: cli.device.clone(),
        ..CaptureConfig::default()
    });

    let session_config = SessionConfig {
        url: cli.url.clone(),
        in_language: cli.in_language.clone(),
        out_language: cli.out_language.clone(),
        model: cli.model.clone(),
        use_filler: cli.use_filler,
        name: cli.name.clone(),
        local_time: None,
        voice_sample_b64,
        latency_pings: cli.latency_pings,
        volume: cli.volume.clamp(0.0, 1.0),
        ..SessionConfig::default()
    };

    let session = SessionClient::connect(session_config, capture.voice_end_tracker())
        .await
        .context("connecting to session endpoint")?;
    let mut events = session.subscribe_events();
    let mut activity = capture.subscribe_activity();

    capture.start(session.outbound_sender()).context("starting capture")?;
    info!("listening — press Ctrl-C to finish");

    // ── Event loop ────────────────────────────────────────────────────────
    let mut finishing = false;
    // Armed once when Ctrl-C flips `finishing`; a fixed deadline, so
    // ongoing latency events cannot keep pushing it back.
    let close_deadline = tokio::time::sleep(Duration::from_secs(5));
    tokio::pin!(close_deadline);
    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let done = matches!(
                            event,
                            SessionEvent::Closed { .. } | SessionEvent::TransportError { .. }
                        );
                        print_event(&event, cli.json);
                        if done {
                            break;
                        }
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(n)) => {
                        warn!("dropped {n} session events");
                    }
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
            event = activity.recv() => {
                if let Ok(event) = event {
                    if cli.meter {
                        let bar = "#".repeat((event.level * 30.0) as usize);
                        eprint!("\r[{bar:<30}] {}", if event.speaking { "speaking" } else { "        " });
                    }
                    if event.voice_ended {
                        debug!(seq = event.seq, "voice ended");
                    }
                }
            }
            _ = tokio::signal::ctrl_c(), if !finishing => {
                info!("finishing session");
                if let Err(e) = capture.stop() {
                    debug!("capture already stopped: {e}");
                }
                session.close();
                finishing = true;
                close_deadline
                    .as_mut()
                    .reset(tokio::time::Instant::now() + Duration::from_secs(5));
            }
            // The server normally answers session.close promptly; don't
            // hang forever if it never does.
            _ = &mut close_deadline, if finishing => {
                warn!("no close acknowledgement from server, exiting");
                break;
            }
        }
    }

    if capture.is_running() {
        let _ = capture.stop();
    }
    let (rtt_ms, offset_ms) = session.latency();
    info!(rtt_ms, offset_ms, "session ended");
    Ok(())
}

fn print_event(event: &SessionEvent, json: bool) {
    if json {
        if let Ok(line) = serde_json::to_string(event) {
            println!("{line}");
        }
        return;
    }
    match event {
        SessionEvent::Started => println!("· session started"),
        SessionEvent::TranscriptDelta { text } => println!("… {text}"),
        SessionEvent::Transcript { text } => println!("» {text}"),
        SessionEvent::Translated { text, is_final, .. } => {
            println!("{} {text}", if *is_final { "=" } else { "~" });
        }
        SessionEvent::TtsLatency { ms } => println!("· first audio in {ms:.0} ms"),
        SessionEvent::Latency { rtt_ms, offset_ms } => {
            debug!(rtt_ms, offset_ms, "clock update");
        }
        SessionEvent::Closed {
            connected_time,
            llm_input_token_count,
            llm_output_token_count,
            llm_cached_token_count,
        } => {
            println!(
                "· session closed (connected {:.1} s, tokens in/out/cached {}/{}/{})",
                connected_time.unwrap_or(0.0),
                llm_input_token_count.unwrap_or(0),
                llm_output_token_count.unwrap_or(0),
                llm_cached_token_count.unwrap_or(0),
            );
        }
        SessionEvent::TransportError { detail } => eprintln!("! transport error: {detail}"),
    }
}
