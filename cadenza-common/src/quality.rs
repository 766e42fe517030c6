//! Quality tiers and transport frame constants
//!
//! Every session encodes to Opus at a fixed 48 kHz stereo transport format;
//! the quality tier only selects the encoder bitrate. Tiers form a closed
//! enum indexed into a static bitrate table.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// Output sample rate of the streaming transport (Opus native rate).
pub const TRANSPORT_SAMPLE_RATE: u32 = 48_000;

/// Output channel count of the streaming transport.
pub const TRANSPORT_CHANNELS: usize = 2;

/// Samples per channel in one codec frame (20 ms at 48 kHz).
pub const FRAME_SAMPLES: usize = 960;

/// Interleaved f32 values in one codec frame (all channels).
pub const FRAME_VALUES: usize = FRAME_SAMPLES * TRANSPORT_CHANNELS;

/// Wall-clock duration of one codec frame.
pub const FRAME_DURATION: Duration = Duration::from_millis(20);

/// Largest possible Opus payload for a single frame.
pub const MAX_OPUS_PAYLOAD: usize = 1275;

/// Encoder bitrates for each quality tier, in bits per second.
///
/// Indexed by `Quality as usize`.
pub const QUALITY_BITRATES: [u32; 4] = [
    48_000,  // Voice
    96_000,  // Standard
    128_000, // High
    256_000, // HiFi
];

/// Streaming quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Quality {
    Voice,
    #[default]
    Standard,
    High,
    HiFi,
}

impl Quality {
    /// Encoder bitrate for this tier in bits per second.
    pub fn bitrate(self) -> u32 {
        QUALITY_BITRATES[self as usize]
    }

    /// Wire/display name ("voice", "standard", "high", "hifi").
    pub fn as_str(self) -> &'static str {
        match self {
            Quality::Voice => "voice",
            Quality::Standard => "standard",
            Quality::High => "high",
            Quality::HiFi => "hifi",
        }
    }

    /// Parse a tier name; unknown names fall back to [`Quality::Standard`].
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "voice" => Quality::Voice,
            "standard" => Quality::Standard,
            "high" => Quality::High,
            "hifi" => Quality::HiFi,
            _ => Quality::Standard,
        }
    }
}

impl fmt::Display for Quality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Encoder bitrate mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BitrateMode {
    #[default]
    Vbr,
    Cbr,
}

impl BitrateMode {
    pub fn as_str(self) -> &'static str {
        match self {
            BitrateMode::Vbr => "vbr",
            BitrateMode::Cbr => "cbr",
        }
    }

    /// Parse a mode name; anything other than "cbr" is VBR.
    pub fn parse_lossy(s: &str) -> Self {
        if s == "cbr" {
            BitrateMode::Cbr
        } else {
            BitrateMode::Vbr
        }
    }
}

impl fmt::Display for BitrateMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
