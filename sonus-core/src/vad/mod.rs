//! Voice Activity Detection (VAD).
//!
//! A small hysteresis state machine over a stream of per-frame RMS energy
//! values. It is driven synchronously by the capture pipeline and carries
//! no buffering of its own; the single observable output is a voice-end
//! edge, emitted exactly once per speech run.

pub mod energy;

pub use energy::EnergyVad;

/// Thresholds and timing for the energy VAD.
///
/// `threshold_stop` must be strictly below `threshold_start`; the gap is the
/// hysteresis dead zone in which neither counter moves.
#[derive(Debug, Clone, Copy)]
pub struct VadConfig {
    /// RMS energy at or above which voice accumulation begins.
    pub threshold_start: f32,
    /// RMS energy at or below which silence accumulation begins.
    pub threshold_stop: f32,
    /// Continuous low-energy duration after speech before declaring
    /// end-of-utterance (ms).
    pub min_silence_ms: f32,
}

impl Default for VadConfig {
    fn default() -> Self {
        Self {
            threshold_start: 0.0025,
            threshold_stop: 0.0015,
            min_silence_ms: 250.0,
        }
    }
}

/// Root-mean-square of a sample slice. Loudness proxy for the VAD.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}
