//! WAV container framing.
//!
//! The writer is hand-rolled: the wire contract requires a canonical
//! 44-byte RIFF/WAVE header with exact field offsets, so nothing may be
//! delegated to a library that could emit extra chunks. Reading user
//! supplied voice-sample files goes through `hound`, which tolerates the
//! chunk layouts found in the wild.

use std::path::Path;

use crate::error::{Result, SonusError};

/// Canonical PCM WAV header length in bytes.
pub const WAV_HEADER_LEN: usize = 44;

/// Frame i16 PCM samples into a canonical WAV buffer.
///
/// 44-byte header (`RIFF`/`WAVE`/`fmt `/`data`, format tag 1, 16 bits per
/// sample, little-endian fields) followed by the samples in little-endian
/// order. Byte-exact for interoperability with generic decoders.
pub fn pcm16_to_wav(pcm: &[i16], sample_rate: u32, channels: u16) -> Vec<u8> {
    let bytes_per_sample = 2u32;
    let block_align = channels as u32 * bytes_per_sample;
    let data_len = pcm.len() as u32 * bytes_per_sample;

    let mut buf = Vec::with_capacity(WAV_HEADER_LEN + data_len as usize);

    buf.extend_from_slice(b"RIFF");
    buf.extend_from_slice(&(36 + data_len).to_le_bytes());
    buf.extend_from_slice(b"WAVE");

    buf.extend_from_slice(b"fmt ");
    buf.extend_from_slice(&16u32.to_le_bytes()); // fmt chunk size
    buf.extend_from_slice(&1u16.to_le_bytes()); // PCM format tag
    buf.extend_from_slice(&channels.to_le_bytes());
    buf.extend_from_slice(&sample_rate.to_le_bytes());
    buf.extend_from_slice(&(sample_rate * block_align).to_le_bytes()); // byte rate
    buf.extend_from_slice(&(block_align as u16).to_le_bytes());
    buf.extend_from_slice(&16u16.to_le_bytes()); // bits per sample

    buf.extend_from_slice(b"data");
    buf.extend_from_slice(&data_len.to_le_bytes());
    for s in pcm {
        buf.extend_from_slice(&s.to_le_bytes());
    }

    buf
}

/// Read a WAV file as mono f32, returning `(samples, sample_rate)`.
///
/// Multi-channel files are mixed down by averaging. Integer sample formats
/// are normalised to [-1, 1].
pub fn read_wav_mono(path: &Path) -> Result<(Vec<f32>, u32)> {
    let mut reader =
        hound::WavReader::open(path).map_err(|e| SonusError::Codec(format!("wav open: {e}")))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| SonusError::Codec(format!("wav read: {e}")))?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()
                .map_err(|e| SonusError::Codec(format!("wav read: {e}")))?
        }
    };

    if channels == 1 {
        return Ok((interleaved, spec.sample_rate));
    }

    let frames = interleaved.len() / channels;
    let mut mono = Vec::with_capacity(frames);
    for f in 0..frames {
        let base = f * channels;
        let sum: f32 = interleaved[base..base + channels].iter().sum();
        mono.push(sum / channels as f32);
    }
    Ok((mono, spec.sample_rate))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn wav_header_is_byte_exact() {
        let buf = pcm16_to_wav(&[1, -1, 0], 24_000, 1);
        assert_eq!(buf.len(), 50); // 44 header + 6 data

        assert_eq!(&buf[0..4], b"RIFF");
        assert_eq!(u32::from_le_bytes(buf[4..8].try_into().unwrap()), 42);
        assert_eq!(&buf[8..12], b"WAVE");
        assert_eq!(&buf[12..16], b"fmt ");
        assert_eq!(u32::from_le_bytes(buf[16..20].try_into().unwrap()), 16);
        assert_eq!(u16::from_le_bytes(buf[20..22].try_into().unwrap()), 1);
        assert_eq!(u16::from_le_bytes(buf[22..24].try_into().unwrap()), 1);
        assert_eq!(u32::from_le_bytes(buf[24..28].try_into().unwrap()), 24_000);
        assert_eq!(u32::from_le_bytes(buf[28..32].try_into().unwrap()), 48_000);
        assert_eq!(u16::from_le_bytes(buf[32..34].try_into().unwrap()), 2);
        assert_eq!(u16::from_le_bytes(buf[34..36].try_into().unwrap()), 16);
        assert_eq!(&buf[36..40], b"data");
        assert_eq!(u32::from_le_bytes(buf[40..44].try_into().unwrap()), 6);

        // sample payload, little-endian
        assert_eq!(&buf[44..46], &1i16.to_le_bytes());
        assert_eq!(&buf[46..48], &(-1i16).to_le_bytes());
        assert_eq!(&buf[48..50], &0i16.to_le_bytes());
    }

    #[test]
    fn empty_pcm_yields_header_only() {
        let buf = pcm16_to_wav(&[], 24_000, 1);
        assert_eq!(buf.len(), WAV_HEADER_LEN);
        assert_eq!(u32::from_le_bytes(buf[40..44].try_into().unwrap()), 0);
    }

    #[test]
    fn stereo_block_align_and_byte_rate() {
        let buf = pcm16_to_wav(&[0; 4], 22_050, 2);
        assert_eq!(u16::from_le_bytes(buf[22..24].try_into().unwrap()), 2);
        assert_eq!(u32::from_le_bytes(buf[28..32].try_into().unwrap()), 88_200);
        assert_eq!(u16::from_le_bytes(buf[32..34].try_into().unwrap()), 4);
    }

    #[test]
    fn hound_can_read_our_output_back() {
        let pcm: Vec<i16> = (0..240).map(|i| (i * 100) as i16).collect();
        let buf = pcm16_to_wav(&pcm, 24_000, 1);
        let reader = hound::WavReader::new(std::io::Cursor::new(buf)).unwrap();
        assert_eq!(reader.spec().sample_rate, 24_000);
        assert_eq!(reader.spec().channels, 1);
        let back: Vec<i16> = reader
            .into_samples::<i16>()
            .collect::<std::result::Result<_, _>>()
            .unwrap();
        assert_eq!(back, pcm);
    }
}
