//! Playback variant B: a continuous stream of Opus frames.
//!
//! Frames arrive individually over the wire, each with a sequence number
//! and optionally a source timestamp. Decoded audio is placed on a
//! play-head timeline against the output device clock: the first frame is
//! scheduled a short preroll into the future, and each subsequent frame
//! lands exactly where the previous one ended, so steady input plays
//! gaplessly while a stall re-primes the timeline instead of rushing.

use tracing::{debug, warn};

use super::output::{AudioOutput, VolumeControl};
use super::rate::RateConverter;
use super::timeline::Timeline;
use super::PlaybackConfig;
use crate::codec::OpusHead;
use crate::error::{Result, SonusError};

/// Worst-case samples in one Opus frame at 24 kHz (120 ms).
const MAX_FRAME_SAMPLES: usize = 2_880;

/// Streaming Opus playback with play-head scheduling.
pub struct OpusStreamPlayer {
    config: PlaybackConfig,
    decoder: Option<opus::Decoder>,
    head: Option<OpusHead>,
    output: AudioOutput,
    converter: RateConverter,
    timeline: Timeline,
    volume: VolumeControl,
}

impl OpusStreamPlayer {
    /// Open the output device. Decoding starts after [`configure`].
    ///
    /// [`configure`]: OpusStreamPlayer::configure
    pub fn new(config: PlaybackConfig) -> Result<Self> {
        let output = AudioOutput::open()?;
        let converter = RateConverter::new(config.sample_rate, output.device_rate())?;
        let timeline = Timeline::new(config.preroll_secs);
        let volume = output.volume_control();
        Ok(Self {
            config,
            decoder: None,
            head: None,
            output,
            converter,
            timeline,
            volume,
        })
    }

    /// Install the stream description and create the decoder.
    ///
    /// The identification header fixes the channel count; the decoder
    /// itself always runs at the pipeline rate regardless of the header's
    /// advisory input rate.
    pub fn configure(&mut self, head: OpusHead) -> Result<()> {
        validate_head(&head)?;
        let decoder = opus::Decoder::new(self.config.sample_rate, opus::Channels::Mono)
            .map_err(|e| SonusError::Decoder(format!("opus decoder: {e}")))?;
        debug!(
            input_rate = head.input_sample_rate,
            pre_skip = head.pre_skip,
            "opus stream configured"
        );
        self.decoder = Some(decoder);
        self.head = Some(head);
        Ok(())
    }

    pub fn is_configured(&self) -> bool {
        self.decoder.is_some()
    }

    /// Decode one frame and schedule it on the timeline.
    ///
    /// `timestamp_us` is the frame's position in the source stream; when
    /// absent it is derived as `seq * frame_duration_us`. Timestamps feed
    /// latency accounting only — placement on the device clock is purely
    /// sequential.
    pub fn decode_frame(
        &mut self,
        payload: &[u8],
        seq: u64,
        timestamp_us: Option<u64>,
    ) -> Result<()> {
        let decoder = self.decoder.as_mut().ok_or(SonusError::NotRunning)?;

        let mut pcm = vec![0f32; MAX_FRAME_SAMPLES];
        let frames = decoder
            .decode_float(payload, &mut pcm, false)
            .map_err(|e| SonusError::Decoder(format!("opus frame {seq}: {e}")))?;
        pcm.truncate(frames);

        let ts_us = timestamp_us.unwrap_or(seq * self.config.frame_duration_us);
        let duration = frames as f64 / self.config.sample_rate as f64;

        let now = self.output.clock_secs();
        let was_primed = self.timeline.is_primed();
        let start = self.timeline.schedule(now, duration);
        if !was_primed {
            // Lead-in silence covers the preroll so the first frame lands
            // at its scheduled start rather than immediately.
            self.output.write_silence(start - now);
            debug!(seq, ts_us, "opus playback primed");
        }

        let device = self.converter.process(&pcm);
        self.output.write_blocking(&device);
        Ok(())
    }

    /// Push any audio still held by the rate converter into the output.
    /// Call before a stream discontinuity (end of an utterance).
    pub fn flush(&mut self) {
        let tail = self.converter.drain();
        self.output.write_blocking(&tail);
    }

    /// Current play-head position in device-clock seconds.
    pub fn play_head(&self) -> f64 {
        self.timeline.play_head()
    }

    /// Clamped [0, 1].
    pub fn set_volume(&self, volume: f32) {
        self.volume.set(volume);
    }

    /// Drop the decoder and re-arm the timeline, discarding any partial
    /// audio still held by the rate converter. The next configured stream
    /// starts from a fresh preroll. Idempotent.
    pub fn close(&mut self) {
        if self.decoder.take().is_some() {
            let _ = self.converter.drain();
        }
        self.head = None;
        self.timeline.reset();
    }
}

fn validate_head(head: &OpusHead) -> Result<()> {
    if head.channels != 1 {
        return Err(SonusError::Codec(format!(
            "unsupported channel count {}, mono only",
            head.channels
        )));
    }
    Ok(())
}

impl Drop for OpusStreamPlayer {
    fn drop(&mut self) {
        self.close();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_timestamp_defaults_to_seq_times_duration() {
        let config = PlaybackConfig::default();
        assert_eq!(config.frame_duration_us, 20_000);
        let derived = |seq: u64| seq * config.frame_duration_us;
        assert_eq!(derived(0), 0);
        assert_eq!(derived(7), 140_000);
    }

    #[test]
    fn rejects_stereo_streams() {
        let head = OpusHead {
            channels: 2,
            ..OpusHead::mono(48_000)
        };
        assert!(validate_head(&head).is_err());
        assert!(validate_head(&OpusHead::mono(48_000)).is_ok());
    }
}
