//! Audio pipeline building blocks
//!
//! Decode (symphonia) → resample (rubato, to the 48 kHz transport rate) →
//! encode (Opus). Each stage is an owned, movable resource; the playback
//! layer decides when to create, hand out, and destroy them.

pub mod decoder;
pub mod encoder;
pub mod resampler;

pub use decoder::TrackDecoder;
pub use encoder::FrameEncoder;
pub use resampler::StreamResampler;

/// Duplicate mono samples into interleaved stereo.
///
/// [S1, S2, ...] -> [S1, S1, S2, S2, ...]
pub fn mono_to_stereo(samples: &[f32], out: &mut Vec<f32>) {
    out.clear();
    out.reserve(samples.len() * 2);
    for &s in samples {
        out.push(s);
        out.push(s);
    }
}
