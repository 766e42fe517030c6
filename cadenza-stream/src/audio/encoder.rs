//! Opus frame encoder
//!
//! One encoder per session, built for the fixed 48 kHz stereo transport
//! format. Quality changes reconfigure the existing encoder rather than
//! recreating it, so codec state carries across the change.

use crate::error::{Error, Result};
use cadenza_common::quality::{FRAME_VALUES, MAX_OPUS_PAYLOAD, TRANSPORT_SAMPLE_RATE};
use cadenza_common::{BitrateMode, Quality};
use tracing::info;

/// Opus encoder bound to the transport format.
pub struct FrameEncoder {
    inner: opus::Encoder,
    quality: Quality,
    mode: BitrateMode,
    out: Vec<u8>,
}

impl FrameEncoder {
    /// Create an encoder configured for the given tier and mode.
    pub fn new(quality: Quality, mode: BitrateMode) -> Result<Self> {
        let inner = opus::Encoder::new(
            TRANSPORT_SAMPLE_RATE,
            opus::Channels::Stereo,
            opus::Application::Audio,
        )
        .map_err(|e| Error::Encode(format!("cannot create Opus encoder: {}", e)))?;

        let mut encoder = Self {
            inner,
            quality,
            mode,
            out: vec![0u8; MAX_OPUS_PAYLOAD],
        };
        encoder.apply(quality, mode)?;
        Ok(encoder)
    }

    /// Apply a new tier and bitrate mode to the live encoder.
    pub fn reconfigure(&mut self, quality: Quality, mode: BitrateMode) -> Result<()> {
        self.apply(quality, mode)?;
        info!(
            "Encoder reconfigured: {} {} ({} kbps)",
            quality,
            mode,
            quality.bitrate() / 1000
        );
        Ok(())
    }

    fn apply(&mut self, quality: Quality, mode: BitrateMode) -> Result<()> {
        self.inner
            .set_bitrate(opus::Bitrate::Bits(quality.bitrate() as i32))
            .map_err(|e| Error::Encode(format!("set_bitrate failed: {}", e)))?;
        self.inner
            .set_vbr(mode == BitrateMode::Vbr)
            .map_err(|e| Error::Encode(format!("set_vbr failed: {}", e)))?;
        self.quality = quality;
        self.mode = mode;
        Ok(())
    }

    pub fn quality(&self) -> Quality {
        self.quality
    }

    pub fn mode(&self) -> BitrateMode {
        self.mode
    }

    /// Encode exactly one 20 ms frame of interleaved stereo f32 samples.
    pub fn encode(&mut self, pcm: &[f32]) -> Result<&[u8]> {
        if pcm.len() != FRAME_VALUES {
            return Err(Error::Encode(format!(
                "frame must be {} samples, got {}",
                FRAME_VALUES,
                pcm.len()
            )));
        }
        let len = self
            .inner
            .encode_float(pcm, &mut self.out)
            .map_err(|e| Error::Encode(format!("opus encode failed: {}", e)))?;
        Ok(&self.out[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::quality::FRAME_SAMPLES;

    fn sine_frame() -> Vec<f32> {
        let mut frame = Vec::with_capacity(FRAME_VALUES);
        for i in 0..FRAME_SAMPLES {
            let t = i as f32 / TRANSPORT_SAMPLE_RATE as f32;
            let s = (2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5;
            frame.push(s);
            frame.push(s);
        }
        frame
    }

    #[test]
    fn encodes_full_frame() {
        let mut enc = FrameEncoder::new(Quality::Standard, BitrateMode::Vbr).unwrap();
        let payload = enc.encode(&sine_frame()).unwrap();
        assert!(!payload.is_empty());
        assert!(payload.len() <= MAX_OPUS_PAYLOAD);
    }

    #[test]
    fn rejects_partial_frame() {
        let mut enc = FrameEncoder::new(Quality::Standard, BitrateMode::Vbr).unwrap();
        let short = vec![0.0f32; FRAME_VALUES - 2];
        assert!(enc.encode(&short).is_err());
    }

    #[test]
    fn reconfigure_keeps_encoding() {
        let mut enc = FrameEncoder::new(Quality::Voice, BitrateMode::Vbr).unwrap();
        enc.encode(&sine_frame()).unwrap();

        enc.reconfigure(Quality::HiFi, BitrateMode::Cbr).unwrap();
        assert_eq!(enc.quality(), Quality::HiFi);
        assert_eq!(enc.mode(), BitrateMode::Cbr);
        let payload = enc.encode(&sine_frame()).unwrap();
        assert!(!payload.is_empty());
    }
}
