//! In-place signal conditioning for captured microphone audio.
//!
//! Two stages run ahead of level metering and encoding:
//!
//! 1. A biquad high-pass (~120 Hz) removes DC offset and low-frequency
//!    rumble that would otherwise inflate RMS readings.
//! 2. A feed-forward compressor (-6 dB threshold, 3:1) evens out level
//!    swings between quiet and loud talkers.
//!
//! Both stages carry state across blocks, so one chain instance must see
//! the capture stream in order.

/// High-pass cutoff in Hz. Speech fundamentals sit well above this.
const HIGHPASS_CUTOFF_HZ: f32 = 120.0;

/// Butterworth Q.
const HIGHPASS_Q: f32 = std::f32::consts::FRAC_1_SQRT_2;

const COMPRESSOR_THRESHOLD_DB: f32 = -6.0;
const COMPRESSOR_RATIO: f32 = 3.0;
const COMPRESSOR_ATTACK_SECS: f32 = 0.003;
const COMPRESSOR_RELEASE_SECS: f32 = 0.050;

/// Transposed direct-form-II biquad, RBJ high-pass coefficients.
#[derive(Debug, Clone)]
pub struct HighPass {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
    z1: f32,
    z2: f32,
}

impl HighPass {
    pub fn new(sample_rate: u32) -> Self {
        let w0 = 2.0 * std::f32::consts::PI * HIGHPASS_CUTOFF_HZ / sample_rate as f32;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * HIGHPASS_Q);

        let a0 = 1.0 + alpha;
        let b0 = (1.0 + cos_w0) / 2.0 / a0;
        let b1 = -(1.0 + cos_w0) / a0;
        let b2 = (1.0 + cos_w0) / 2.0 / a0;
        let a1 = -2.0 * cos_w0 / a0;
        let a2 = (1.0 - alpha) / a0;

        Self {
            b0,
            b1,
            b2,
            a1,
            a2,
            z1: 0.0,
            z2: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let x = *sample;
            let y = self.b0 * x + self.z1;
            self.z1 = self.b1 * x - self.a1 * y + self.z2;
            self.z2 = self.b2 * x - self.a2 * y;
            *sample = y;
        }
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Per-sample feed-forward compressor with an asymmetric envelope
/// follower (fast attack, slow release).
#[derive(Debug, Clone)]
pub struct Compressor {
    threshold: f32,
    attack_coeff: f32,
    release_coeff: f32,
    envelope: f32,
}

impl Compressor {
    pub fn new(sample_rate: u32) -> Self {
        let sr = sample_rate as f32;
        Self {
            threshold: db_to_linear(COMPRESSOR_THRESHOLD_DB),
            attack_coeff: (-1.0 / (COMPRESSOR_ATTACK_SECS * sr)).exp(),
            release_coeff: (-1.0 / (COMPRESSOR_RELEASE_SECS * sr)).exp(),
            envelope: 0.0,
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        for sample in samples.iter_mut() {
            let level = sample.abs();
            let coeff = if level > self.envelope {
                self.attack_coeff
            } else {
                self.release_coeff
            };
            self.envelope = coeff * self.envelope + (1.0 - coeff) * level;

            if self.envelope > self.threshold {
                // Above threshold, output grows at 1/ratio of the input's
                // excess over the knee.
                let excess = self.envelope / self.threshold;
                let gain = excess.powf(1.0 / COMPRESSOR_RATIO - 1.0);
                *sample *= gain;
            }
        }
    }

    pub fn reset(&mut self) {
        self.envelope = 0.0;
    }
}

fn db_to_linear(db: f32) -> f32 {
    10f32.powf(db / 20.0)
}

/// The full chain, applied in place to each captured block.
#[derive(Debug, Clone)]
pub struct ConditioningChain {
    highpass: HighPass,
    compressor: Compressor,
}

impl ConditioningChain {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            highpass: HighPass::new(sample_rate),
            compressor: Compressor::new(sample_rate),
        }
    }

    pub fn process(&mut self, samples: &mut [f32]) {
        self.highpass.process(samples);
        self.compressor.process(samples);
    }

    pub fn reset(&mut self) {
        self.highpass.reset();
        self.compressor.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vad::rms;

    #[test]
    fn highpass_removes_dc_offset() {
        let mut filter = HighPass::new(48_000);
        let mut block = vec![0.5f32; 48_000];
        filter.process(&mut block);
        // After settling, a constant input decays toward zero.
        let tail_rms = rms(&block[40_000..]);
        assert!(tail_rms < 1e-3, "residual dc rms {tail_rms}");
    }

    #[test]
    fn highpass_passes_speech_band() {
        let mut filter = HighPass::new(48_000);
        let mut tone: Vec<f32> = (0..48_000)
            .map(|i| (2.0 * std::f32::consts::PI * 1_000.0 * i as f32 / 48_000.0).sin() * 0.5)
            .collect();
        let before = rms(&tone);
        filter.process(&mut tone);
        let after = rms(&tone[8_000..]);
        assert!(after > before * 0.9, "1 kHz attenuated: {before} -> {after}");
    }

    #[test]
    fn compressor_reduces_loud_peaks() {
        let mut comp = Compressor::new(48_000);
        let mut loud = vec![0.9f32; 4_800];
        comp.process(&mut loud);
        // Once the envelope settles, gain reduction is active.
        assert!(loud[4_000] < 0.9);
        assert!(loud[4_000] > 0.0);
    }

    #[test]
    fn compressor_leaves_quiet_signal_alone() {
        let mut comp = Compressor::new(48_000);
        let mut quiet = vec![0.01f32; 4_800];
        comp.process(&mut quiet);
        for (i, s) in quiet.iter().enumerate() {
            assert!((s - 0.01).abs() < 1e-6, "sample {i} changed: {s}");
        }
    }

    #[test]
    fn chain_is_stable_on_silence() {
        let mut chain = ConditioningChain::new(44_100);
        let mut block = vec![0.0f32; 4_096];
        chain.process(&mut block);
        assert!(block.iter().all(|s| s.abs() < 1e-9));
    }
}
