//! Blocking capture pipeline loop.
//!
//! ## Pipeline stages (per block)
//!
//! ```text
//! 1. Drain ring buffer until a full block accumulates
//! 2. Condition in place (high-pass → compressor)
//! 3. RMS → VAD edge detection + mic level metering
//! 4. Attenuate, resample to the wire rate, quantize, base64
//! 5. Send input_audio_buffer.append on the outbound channel
//! ```
//!
//! The loop runs inside `spawn_blocking`, keeping the Tokio executor free
//! for the WebSocket session. Activity events are throttled to roughly UI
//! frame rate; the voice-end edge is never dropped.

use std::sync::{
    atomic::{AtomicBool, AtomicUsize, Ordering},
    Arc,
};
use std::time::{Duration, Instant};

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

use super::conditioning::ConditioningChain;
use super::{AudioConsumer, CaptureConfig, VoiceEndTracker};
use crate::clock::now_ms;
use crate::codec::samples_to_pcm16_base64;
use crate::events::ActivityEvent;
use crate::session::ClientMessage;
use crate::vad::{rms, EnergyVad};

use ringbuf::traits::Consumer;

/// Sleep while the ring has no full block yet.
const SLEEP_EMPTY_MS: u64 = 5;

/// Minimum interval between activity events (~one UI frame).
const LEVEL_INTERVAL_MS: u64 = 16;

/// Mic level mapping: RMS noise floor and span of the speech band.
const LEVEL_FLOOR: f32 = 0.005;
const LEVEL_SPAN: f32 = 0.03;

/// Smoothing for the displayed level (previous weight / new weight).
const LEVEL_EMA_KEEP: f32 = 0.8;
const LEVEL_EMA_NEW: f32 = 0.2;

#[derive(Default)]
pub struct CaptureDiagnostics {
    pub frames_in: AtomicUsize,
    pub blocks: AtomicUsize,
    pub appends_sent: AtomicUsize,
    pub voice_ends: AtomicUsize,
}

impl CaptureDiagnostics {
    pub fn reset(&self) {
        self.frames_in.store(0, Ordering::Relaxed);
        self.blocks.store(0, Ordering::Relaxed);
        self.appends_sent.store(0, Ordering::Relaxed);
        self.voice_ends.store(0, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> DiagnosticsSnapshot {
        DiagnosticsSnapshot {
            frames_in: self.frames_in.load(Ordering::Relaxed),
            blocks: self.blocks.load(Ordering::Relaxed),
            appends_sent: self.appends_sent.load(Ordering::Relaxed),
            voice_ends: self.voice_ends.load(Ordering::Relaxed),
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct DiagnosticsSnapshot {
    pub frames_in: usize,
    pub blocks: usize,
    pub appends_sent: usize,
    pub voice_ends: usize,
}

/// All context the pipeline needs, passed as one struct so the closure stays tidy.
pub struct PipelineContext {
    pub config: CaptureConfig,
    pub consumer: AudioConsumer,
    pub running: Arc<AtomicBool>,
    pub outbound_tx: mpsc::UnboundedSender<ClientMessage>,
    pub activity_tx: broadcast::Sender<ActivityEvent>,
    pub voice_end: VoiceEndTracker,
    pub capture_sample_rate: u32,
    pub diagnostics: Arc<CaptureDiagnostics>,
}

/// Run the blocking pipeline until `ctx.running` becomes false.
pub fn run(mut ctx: PipelineContext) {
    info!(
        capture_rate = ctx.capture_sample_rate,
        wire_rate = ctx.config.target_sample_rate,
        block = ctx.config.block_samples,
        "capture pipeline started"
    );

    let mut chain = ConditioningChain::new(ctx.capture_sample_rate);
    let mut vad = EnergyVad::new(ctx.config.vad.clone());

    let block_samples = ctx.config.block_samples;
    let mut block = vec![0f32; block_samples];
    let mut filled = 0usize;

    // The VAD advances by audio time, one block duration per block, so its
    // silence window tracks the signal rather than scheduler jitter.
    let block_duration =
        Duration::from_secs_f64(block_samples as f64 / ctx.capture_sample_rate as f64);
    let vad_epoch = Instant::now();
    let mut audio_time = Duration::ZERO;

    let mut seq = 0u64;
    let mut smoothed_level = 0f32;
    let mut last_activity_at: Option<Instant> = None;

    // A graceful stop flushes the server-side buffer with a commit marker.
    // The marker is sent from this thread, after the last append, so no
    // frame can ever trail it on the wire.
    let mut commit_on_exit = true;

    loop {
        if !ctx.running.load(Ordering::Relaxed) {
            break;
        }

        // ── 1. Fill the block from the ring ──────────────────────────────
        let n = ctx.consumer.pop_slice(&mut block[filled..]);
        filled += n;
        if filled < block_samples {
            std::thread::sleep(Duration::from_millis(SLEEP_EMPTY_MS));
            continue;
        }
        filled = 0;
        ctx.diagnostics
            .frames_in
            .fetch_add(block_samples, Ordering::Relaxed);
        ctx.diagnostics.blocks.fetch_add(1, Ordering::Relaxed);

        // ── 2. Condition ─────────────────────────────────────────────────
        chain.process(&mut block);

        // ── 3. Meter + VAD (post-conditioning, pre-attenuation) ──────────
        let block_rms = rms(&block);
        audio_time += block_duration;
        let voice_ended = vad.update_at(block_rms, vad_epoch + audio_time);
        if voice_ended {
            ctx.voice_end.record(now_ms());
            ctx.diagnostics.voice_ends.fetch_add(1, Ordering::Relaxed);
            debug!(seq, "voice end detected");
        }

        let raw_level = ((block_rms - LEVEL_FLOOR) / LEVEL_SPAN).clamp(0.0, 1.0);
        smoothed_level = LEVEL_EMA_KEEP * smoothed_level + LEVEL_EMA_NEW * raw_level;

        let now = Instant::now();
        let due = last_activity_at
            .map(|t| now.duration_since(t) >= Duration::from_millis(LEVEL_INTERVAL_MS))
            .unwrap_or(true);
        if due || voice_ended {
            let _ = ctx.activity_tx.send(ActivityEvent {
                seq,
                rms: block_rms,
                level: smoothed_level,
                speaking: vad.is_speaking(),
                voice_ended,
            });
            last_activity_at = Some(now);
        }
        seq = seq.saturating_add(1);

        // ── 4. Attenuate + encode ────────────────────────────────────────
        for sample in block.iter_mut() {
            *sample *= ctx.config.attenuation;
        }
        let audio = samples_to_pcm16_base64(
            &block,
            ctx.capture_sample_rate,
            ctx.config.target_sample_rate,
        );

        // ── 5. Ship ──────────────────────────────────────────────────────
        if ctx
            .outbound_tx
            .send(ClientMessage::InputAudioAppend {
                audio,
                t0: now_ms(),
            })
            .is_err()
        {
            info!("outbound channel closed, stopping capture pipeline");
            ctx.running.store(false, Ordering::SeqCst);
            commit_on_exit = false;
            break;
        }
        ctx.diagnostics.appends_sent.fetch_add(1, Ordering::Relaxed);
    }

    if commit_on_exit {
        let _ = ctx.outbound_tx.send(ClientMessage::InputAudioCommit);
    }

    let snap = ctx.diagnostics.snapshot();
    info!(
        frames_in = snap.frames_in,
        blocks = snap.blocks,
        appends_sent = snap.appends_sent,
        voice_ends = snap.voice_ends,
        "capture pipeline stopped"
    );
}
