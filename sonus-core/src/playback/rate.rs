//! Sample-rate conversion for the playback path.
//!
//! Decoded audio arrives at a codec-fixed rate (24 kHz opus frames,
//! 22.05 kHz mp3 blobs) while the output device runs at whatever rate the
//! OS reports — commonly 44.1 or 48 kHz. `RateConverter` bridges that gap
//! on the playback worker thread with a rubato `FastFixedIn` session.
//!
//! When the rates already match, the converter is a passthrough and no
//! rubato session is created.

use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::warn;

use crate::error::{Result, SonusError};

/// Input frames fed to rubato per process call.
const CHUNK_FRAMES: usize = 480;

/// Converts mono f32 audio from one fixed sample rate to another.
pub struct RateConverter {
    /// `None` when source rate == device rate (passthrough mode).
    resampler: Option<FastFixedIn<f32>>,
    /// Holds partial input between calls.
    pending: Vec<f32>,
    /// Pre-allocated rubato output: `[1][output_frames_max]`.
    output_buf: Vec<Vec<f32>>,
}

impl RateConverter {
    pub fn new(source_rate: u32, device_rate: u32) -> Result<Self> {
        if source_rate == device_rate {
            return Ok(Self {
                resampler: None,
                pending: Vec::new(),
                output_buf: Vec::new(),
            });
        }

        let ratio = device_rate as f64 / source_rate as f64;
        let resampler = FastFixedIn::<f32>::new(
            ratio,
            1.0, // fixed ratio
            PolynomialDegree::Cubic,
            CHUNK_FRAMES,
            1, // mono
        )
        .map_err(|e| SonusError::AudioStream(format!("rate converter init: {e}")))?;

        let max_out = resampler.output_frames_max();
        Ok(Self {
            resampler: Some(resampler),
            pending: Vec::new(),
            output_buf: vec![vec![0f32; max_out]; 1],
        })
    }

    /// Convert `samples`, returning whatever full chunks produce. Partial
    /// input is held for the next call.
    pub fn process(&mut self, samples: &[f32]) -> Vec<f32> {
        let Some(ref mut resampler) = self.resampler else {
            return samples.to_vec();
        };

        self.pending.extend_from_slice(samples);

        let mut out = Vec::new();
        while self.pending.len() >= CHUNK_FRAMES {
            let chunk = &self.pending[..CHUNK_FRAMES];
            match resampler.process_into_buffer(&[chunk], &mut self.output_buf, None) {
                Ok((_consumed, produced)) => {
                    out.extend_from_slice(&self.output_buf[0][..produced]);
                }
                Err(e) => warn!("rate converter process error: {e}"),
            }
            self.pending.drain(..CHUNK_FRAMES);
        }
        out
    }

    /// Flush held input by zero-padding to a full chunk. Call before a
    /// stream discontinuity so the tail is not dropped.
    pub fn drain(&mut self) -> Vec<f32> {
        if self.resampler.is_none() || self.pending.is_empty() {
            self.pending.clear();
            return Vec::new();
        }
        let pad = CHUNK_FRAMES - self.pending.len() % CHUNK_FRAMES;
        if pad != CHUNK_FRAMES {
            self.pending.extend(std::iter::repeat(0f32).take(pad));
        }
        let held = std::mem::take(&mut self.pending);
        self.process(&held)
    }

    pub fn is_passthrough(&self) -> bool {
        self.resampler.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn passthrough_identity() {
        let mut rc = RateConverter::new(48_000, 48_000).unwrap();
        assert!(rc.is_passthrough());
        let samples: Vec<f32> = (0..480).map(|i| i as f32 * 0.001).collect();
        assert_eq!(rc.process(&samples), samples);
    }

    #[test]
    fn upsamples_24k_to_48k_roughly_doubling() {
        let mut rc = RateConverter::new(24_000, 48_000).unwrap();
        let samples = vec![0.1f32; 2400]; // 100 ms
        let mut out = rc.process(&samples);
        out.extend(rc.drain());
        let expected = 4800usize;
        assert!(
            (out.len() as isize - expected as isize).unsigned_abs() <= CHUNK_FRAMES * 2,
            "output len={} expected≈{}",
            out.len(),
            expected
        );
    }

    #[test]
    fn partial_input_is_held_until_drain() {
        let mut rc = RateConverter::new(24_000, 48_000).unwrap();
        let out = rc.process(&vec![0.0f32; 100]); // under one chunk
        assert!(out.is_empty());
        let tail = rc.drain();
        assert!(!tail.is_empty(), "drain flushes the held partial chunk");
    }

    #[test]
    fn discarded_drain_leaves_the_converter_clean() {
        // A stream closed mid-utterance drops its drain result; the next
        // stream must not replay the held samples.
        let mut rc = RateConverter::new(24_000, 48_000).unwrap();
        rc.process(&vec![0.9f32; 100]);
        let _ = rc.drain();

        let out = rc.process(&vec![0.0f32; CHUNK_FRAMES]);
        // Allow a handful of boundary samples of interpolator history.
        assert!(
            out[16..].iter().all(|&s| s.abs() < 1e-3),
            "stale samples leaked into the next stream"
        );
    }

    #[test]
    fn drain_on_passthrough_is_empty() {
        let mut rc = RateConverter::new(24_000, 24_000).unwrap();
        rc.process(&[0.1, 0.2]);
        assert!(rc.drain().is_empty());
    }
}
