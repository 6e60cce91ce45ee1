//! Pure wire-format utilities: resampling, PCM quantization, base64
//! framing, WAV container writing, and the OpusHead codec description.
//!
//! Everything in this module is deterministic and side-effect free. Zero
//! length inputs produce zero-length outputs; the only fallible operations
//! are parsing (base64, OpusHead, WAV files).

pub mod opus_head;
pub mod pcm;
pub mod wav;

pub use opus_head::OpusHead;
pub use pcm::{
    base64_to_bytes, bytes_to_base64, float_to_pcm16, pcm16_to_base64, resample_linear_mono,
    samples_to_pcm16_base64,
};
pub use wav::{pcm16_to_wav, read_wav_mono};
