//! Sample-level conversions for the outbound mic path.
//!
//! The server consumes 16-bit signed little-endian PCM, mono, 24 kHz,
//! base64-encoded. Capture hardware delivers f32 at the device rate
//! (commonly 48 kHz), so every frame passes through
//! `resample_linear_mono` → `float_to_pcm16` → `pcm16_to_base64`.
//!
//! Linear interpolation is deliberate: one multiply-add per output sample
//! keeps the per-frame cost negligible, and speech bandwidth survives a
//! 48 kHz → 24 kHz hop without a filter bank.

use std::borrow::Cow;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};

use crate::error::{Result, SonusError};

/// Linear-interpolation resampler for mono f32 audio.
///
/// Output length is `floor(len * out_rate / in_rate)`. For each output index
/// `i` the source position is `i * in_rate / out_rate`; the sample is the
/// linear blend of the floor and ceil source samples, with the ceil index
/// clamped to the last valid input index.
///
/// When `in_rate == out_rate` the input is returned as-is (borrowed, no
/// copy).
pub fn resample_linear_mono(input: &[f32], in_rate: u32, out_rate: u32) -> Cow<'_, [f32]> {
    if in_rate == out_rate {
        return Cow::Borrowed(input);
    }

    let ratio = out_rate as f64 / in_rate as f64;
    let new_len = (input.len() as f64 * ratio).floor() as usize;
    let mut out = Vec::with_capacity(new_len);

    for i in 0..new_len {
        let src_index = i as f64 / ratio;
        let i0 = src_index.floor() as usize;
        let i1 = (i0 + 1).min(input.len() - 1);
        let frac = (src_index - i0 as f64) as f32;
        out.push(input[i0] * (1.0 - frac) + input[i1] * frac);
    }

    Cow::Owned(out)
}

/// Quantize f32 samples in [-1, 1] to 16-bit signed PCM.
///
/// Samples are clamped first. Negative values scale by 32768 and
/// non-negative values by 32767 — the asymmetry avoids overflow at exactly
/// +1.0 and must be preserved as-is for wire compatibility.
pub fn float_to_pcm16(samples: &[f32]) -> Vec<i16> {
    samples
        .iter()
        .map(|&s| {
            let s = s.clamp(-1.0, 1.0);
            if s < 0.0 {
                (s * 32768.0) as i16
            } else {
                (s * 32767.0) as i16
            }
        })
        .collect()
}

/// Encode i16 samples as base64 over their little-endian byte representation.
pub fn pcm16_to_base64(pcm: &[i16]) -> String {
    let mut bytes = Vec::with_capacity(pcm.len() * 2);
    for s in pcm {
        bytes.extend_from_slice(&s.to_le_bytes());
    }
    BASE64.encode(bytes)
}

/// Encode arbitrary bytes as base64.
pub fn bytes_to_base64(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decode base64 into raw bytes.
pub fn base64_to_bytes(b64: &str) -> Result<Vec<u8>> {
    BASE64
        .decode(b64)
        .map_err(|e| SonusError::Codec(format!("base64 decode: {e}")))
}

/// Convert a mono f32 clip at `in_rate` to the server's PCM16LE/24 kHz
/// base64 form. Used for reference-voice uploads
/// (`scriptsession.setvoice`), which take the same encoding as mic frames.
pub fn samples_to_pcm16_base64(mono: &[f32], in_rate: u32, target_rate: u32) -> String {
    let resampled = resample_linear_mono(mono, in_rate, target_rate);
    let pcm = float_to_pcm16(&resampled);
    pcm16_to_base64(&pcm)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_identity_is_borrowed() {
        let samples: Vec<f32> = (0..480).map(|i| (i as f32 * 0.01).sin()).collect();
        let out = resample_linear_mono(&samples, 24_000, 24_000);
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out.as_ref(), samples.as_slice());
    }

    #[test]
    fn resample_output_length_is_floor_of_ratio() {
        let samples = vec![0.0f32; 4096];
        let out = resample_linear_mono(&samples, 48_000, 24_000);
        assert_eq!(out.len(), 2048);

        let out = resample_linear_mono(&samples, 44_100, 24_000);
        assert_eq!(out.len(), (4096.0f64 * 24_000.0 / 44_100.0).floor() as usize);
    }

    #[test]
    fn resample_empty_input_yields_empty_output() {
        let out = resample_linear_mono(&[], 48_000, 24_000);
        assert!(out.is_empty());
    }

    #[test]
    fn resample_interpolates_between_neighbours() {
        // Upsampling a ramp by 2 should land midpoints between samples.
        let samples = vec![0.0f32, 1.0, 2.0, 3.0];
        let out = resample_linear_mono(&samples, 1, 2);
        assert_eq!(out.len(), 8);
        assert!((out[1] - 0.5).abs() < 1e-6);
        assert!((out[3] - 1.5).abs() < 1e-6);
    }

    #[test]
    fn quantizer_is_bounded_and_clamps() {
        let samples = vec![-2.0f32, -1.0, -0.5, 0.0, 0.5, 1.0, 2.0];
        let pcm = float_to_pcm16(&samples);
        assert_eq!(pcm[0], i16::MIN); // clamped to -1.0
        assert_eq!(pcm[1], i16::MIN);
        assert_eq!(pcm[2], -16384);
        assert_eq!(pcm[3], 0);
        assert_eq!(pcm[4], 16383);
        assert_eq!(pcm[5], i16::MAX);
        assert_eq!(pcm[6], i16::MAX); // clamped to +1.0
    }

    #[test]
    fn pcm16_base64_round_trip_byte_equals() {
        let cases: [&[i16]; 3] = [&[], &[1, -1, 0], &[i16::MIN, i16::MAX, 12345, -12345]];
        for pcm in cases {
            let b64 = pcm16_to_base64(pcm);
            let bytes = base64_to_bytes(&b64).unwrap();
            let mut expected = Vec::new();
            for s in pcm {
                expected.extend_from_slice(&s.to_le_bytes());
            }
            assert_eq!(bytes, expected);
        }
    }

    #[test]
    fn invalid_base64_is_an_error() {
        assert!(base64_to_bytes("not base64!!!").is_err());
    }

    #[test]
    fn voice_sample_encoding_resamples_to_target() {
        let clip = vec![0.25f32; 4800]; // 100 ms at 48 kHz
        let b64 = samples_to_pcm16_base64(&clip, 48_000, 24_000);
        let bytes = base64_to_bytes(&b64).unwrap();
        // 2400 samples at 24 kHz, 2 bytes each
        assert_eq!(bytes.len(), 4800);
    }
}
