//! The 19-byte `OpusHead` identification header.
//!
//! Opus decoders that take out-of-band codec configuration expect this
//! block as the codec description. Field layout (all multi-byte fields
//! little-endian):
//!
//! | offset | field |
//! |--------|-------|
//! | 0–7    | ASCII `"OpusHead"` |
//! | 8      | version (1) |
//! | 9      | channel count |
//! | 10–11  | pre-skip (u16) |
//! | 12–15  | input sample rate (u32) |
//! | 16–17  | output gain (i16, Q7.8 dB) |
//! | 18     | channel mapping family |

use crate::error::{Result, SonusError};

const MAGIC: &[u8; 8] = b"OpusHead";

/// Length of the header block in bytes.
pub const OPUS_HEAD_LEN: usize = 19;

/// Parsed or to-be-serialized OpusHead fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OpusHead {
    pub channels: u8,
    pub pre_skip: u16,
    pub input_sample_rate: u32,
    pub output_gain: i16,
    pub channel_mapping: u8,
}

impl OpusHead {
    /// A mono header at the given input rate, no pre-skip, unity gain,
    /// mapping family 0.
    pub fn mono(input_sample_rate: u32) -> Self {
        Self {
            channels: 1,
            pre_skip: 0,
            input_sample_rate,
            output_gain: 0,
            channel_mapping: 0,
        }
    }

    /// Serialize to the fixed 19-byte wire layout.
    pub fn to_bytes(self) -> [u8; OPUS_HEAD_LEN] {
        let mut b = [0u8; OPUS_HEAD_LEN];
        b[0..8].copy_from_slice(MAGIC);
        b[8] = 1; // version
        b[9] = self.channels;
        b[10..12].copy_from_slice(&self.pre_skip.to_le_bytes());
        b[12..16].copy_from_slice(&self.input_sample_rate.to_le_bytes());
        b[16..18].copy_from_slice(&self.output_gain.to_le_bytes());
        b[18] = self.channel_mapping;
        b
    }

    /// Parse a header block, validating magic and version.
    pub fn parse(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < OPUS_HEAD_LEN {
            return Err(SonusError::Codec(format!(
                "OpusHead too short: {} bytes",
                bytes.len()
            )));
        }
        if &bytes[0..8] != MAGIC {
            return Err(SonusError::Codec("OpusHead magic mismatch".into()));
        }
        if bytes[8] != 1 {
            return Err(SonusError::Codec(format!(
                "unsupported OpusHead version {}",
                bytes[8]
            )));
        }
        Ok(Self {
            channels: bytes[9],
            pre_skip: u16::from_le_bytes(bytes[10..12].try_into().unwrap()),
            input_sample_rate: u32::from_le_bytes(bytes[12..16].try_into().unwrap()),
            output_gain: i16::from_le_bytes(bytes[16..18].try_into().unwrap()),
            channel_mapping: bytes[18],
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn byte_layout_matches_contract() {
        let head = OpusHead {
            channels: 1,
            pre_skip: 312,
            input_sample_rate: 24_000,
            output_gain: -256,
            channel_mapping: 0,
        };
        let b = head.to_bytes();

        assert_eq!(&b[0..8], b"OpusHead");
        assert_eq!(b[8], 1);
        assert_eq!(b[9], 1);
        assert_eq!(u16::from_le_bytes([b[10], b[11]]), 312);
        assert_eq!(u32::from_le_bytes([b[12], b[13], b[14], b[15]]), 24_000);
        assert_eq!(i16::from_le_bytes([b[16], b[17]]), -256);
        assert_eq!(b[18], 0);
    }

    #[test]
    fn round_trip() {
        let head = OpusHead::mono(24_000);
        assert_eq!(OpusHead::parse(&head.to_bytes()).unwrap(), head);
    }

    #[test]
    fn rejects_bad_magic_and_short_input() {
        let mut b = OpusHead::mono(24_000).to_bytes();
        b[0] = b'X';
        assert!(OpusHead::parse(&b).is_err());
        assert!(OpusHead::parse(&b[..10]).is_err());
    }
}
