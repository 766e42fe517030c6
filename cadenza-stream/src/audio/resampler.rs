//! Streaming sample rate conversion using rubato
//!
//! Converts source audio to the 48 kHz transport rate. Decoder packets vary
//! in length, so the converter is created once per track with a fixed
//! maximum chunk and fed through `process_partial`, which accepts short
//! inputs; output chunk sizes vary with the conversion ratio.

use crate::error::{Error, Result};
use cadenza_common::quality::TRANSPORT_SAMPLE_RATE;
use rubato::{FastFixedIn, PolynomialDegree, Resampler};
use tracing::debug;

/// Largest input chunk (frames per channel) accepted per call.
///
/// Decoder packets are far smaller (FLAC ~4096, MP3 1152); larger inputs are
/// processed in slices.
const MAX_CHUNK_FRAMES: usize = 8192;

/// Stateful resampler for one track's decode stream.
pub struct StreamResampler {
    inner: FastFixedIn<f32>,
    channels: usize,
    input_rate: u32,
    output_rate: u32,
}

impl StreamResampler {
    /// Create a converter from `input_rate` to the transport rate.
    pub fn new(input_rate: u32, channels: u16) -> Result<Self> {
        let output_rate = TRANSPORT_SAMPLE_RATE;
        debug!(
            "Resampling from {}Hz to {}Hz ({} channels)",
            input_rate, output_rate, channels
        );

        let inner = FastFixedIn::<f32>::new(
            output_rate as f64 / input_rate as f64,
            1.0, // fixed ratio, no runtime changes
            PolynomialDegree::Septic,
            MAX_CHUNK_FRAMES,
            channels as usize,
        )
        .map_err(|e| Error::Resample(format!("cannot create resampler: {}", e)))?;

        Ok(Self {
            inner,
            channels: channels as usize,
            input_rate,
            output_rate,
        })
    }

    pub fn input_rate(&self) -> u32 {
        self.input_rate
    }

    /// Convert one interleaved chunk, returning interleaved output.
    pub fn process(&mut self, input: &[f32]) -> Result<Vec<f32>> {
        let planar = deinterleave(input, self.channels);
        let total_frames = planar[0].len();
        let mut out = Vec::with_capacity(
            (total_frames as f64 * self.output_rate as f64 / self.input_rate as f64) as usize
                * self.channels
                + self.channels,
        );

        let mut offset = 0;
        while offset < total_frames {
            let end = (offset + MAX_CHUNK_FRAMES).min(total_frames);
            let slice: Vec<&[f32]> = planar.iter().map(|ch| &ch[offset..end]).collect();
            let chunk_out = self
                .inner
                .process_partial(Some(&slice), None)
                .map_err(|e| Error::Resample(format!("resampling failed: {}", e)))?;
            interleave_into(&chunk_out, &mut out);
            offset = end;
        }

        Ok(out)
    }
}

/// Convert interleaved samples to planar format.
///
/// Input:  [L, R, L, R, L, R, ...]
/// Output: [[L, L, L, ...], [R, R, R, ...]]
fn deinterleave(samples: &[f32], channels: usize) -> Vec<Vec<f32>> {
    let num_frames = samples.len() / channels;
    let mut planar = vec![Vec::with_capacity(num_frames); channels];

    for frame_idx in 0..num_frames {
        for (ch_idx, chan) in planar.iter_mut().enumerate() {
            chan.push(samples[frame_idx * channels + ch_idx]);
        }
    }

    planar
}

/// Append planar samples to an interleaved output vector.
fn interleave_into(planar: &[Vec<f32>], out: &mut Vec<f32>) {
    if planar.is_empty() {
        return;
    }
    let num_frames = planar[0].len();
    for frame_idx in 0..num_frames {
        for chan in planar {
            out.push(chan[frame_idx]);
        }
    }
}
