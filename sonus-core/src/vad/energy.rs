//! Energy-based VAD with start/stop hysteresis.
//!
//! ## State machine
//!
//! Two states, `Silent` and `Speaking`, evaluated once per frame:
//!
//! 1. `rms >= threshold_start` → accumulate `voice_ms` by the elapsed
//!    delta, reset `silence_ms`; enter `Speaking` once `voice_ms > 30 ms`
//!    (no event on entry).
//! 2. `rms <= threshold_stop` → accumulate `silence_ms`, reset `voice_ms`;
//!    if `Speaking` and `silence_ms >= min_silence_ms`, return to `Silent`,
//!    reset both counters, and return `true` — the voice-end edge.
//! 3. Energies strictly between the thresholds are a dead zone: no counter
//!    changes, no transition.
//!
//! The edge fires exactly once per speech run; every other call returns
//! `false`.

use std::time::Instant;

use super::VadConfig;

/// Voice accumulation required before entering `Speaking` (ms).
/// Debounces single-frame clicks and pops.
const MIN_VOICE_MS: f32 = 30.0;

/// A hysteresis energy detector over per-frame RMS values.
#[derive(Debug, Clone)]
pub struct EnergyVad {
    config: VadConfig,
    speaking: bool,
    silence_ms: f32,
    voice_ms: f32,
    last_update: Option<Instant>,
}

impl EnergyVad {
    pub fn new(config: VadConfig) -> Self {
        Self {
            config,
            speaking: false,
            silence_ms: 0.0,
            voice_ms: 0.0,
            last_update: None,
        }
    }

    /// Feed one frame's RMS, timestamped now. Returns `true` only on the
    /// frame where a speech run ends.
    pub fn update(&mut self, rms: f32) -> bool {
        self.update_at(rms, Instant::now())
    }

    /// As `update`, with an explicit timestamp. The first call establishes
    /// the time base (zero elapsed).
    pub fn update_at(&mut self, rms: f32, now: Instant) -> bool {
        let dt_ms = match self.last_update {
            Some(last) => now.saturating_duration_since(last).as_secs_f32() * 1000.0,
            None => 0.0,
        };
        self.last_update = Some(now);

        if rms >= self.config.threshold_start {
            self.voice_ms += dt_ms;
            self.silence_ms = 0.0;
            if !self.speaking && self.voice_ms > MIN_VOICE_MS {
                self.speaking = true;
            }
        } else if rms <= self.config.threshold_stop {
            self.silence_ms += dt_ms;
            self.voice_ms = 0.0;
            if self.speaking && self.silence_ms >= self.config.min_silence_ms {
                self.speaking = false;
                self.silence_ms = 0.0;
                return true;
            }
        }
        // Dead zone between the thresholds: neither counter moves.

        false
    }

    /// Whether the detector currently considers the stream to be speech.
    pub fn is_speaking(&self) -> bool {
        self.speaking
    }

    /// Clear all state, including the time base.
    pub fn reset(&mut self) {
        self.speaking = false;
        self.silence_ms = 0.0;
        self.voice_ms = 0.0;
        self.last_update = None;
    }
}

impl Default for EnergyVad {
    fn default() -> Self {
        Self::new(VadConfig::default())
    }
}
