//! # Cadenza Streaming Service (cadenza-stream)
//!
//! Per-session real-time music streaming for the Cadenza voice-assistant
//! backend.
//!
//! **Purpose:** Decode library audio, convert it to the 48 kHz stereo
//! transport format, encode it to Opus, and deliver frames to each client at
//! playback rate — with pause/resume/seek/skip, dynamic quality changes,
//! and drop-based degradation under backpressure.
//!
//! **Architecture:** One control WebSocket per client plus an optional
//! dedicated audio channel; one streaming worker thread per active session
//! driving a symphonia → rubato → Opus pipeline.

pub mod audio;
pub mod config;
pub mod error;
pub mod library;
pub mod net;
pub mod playback;

pub use config::Config;
pub use error::{Error, Result};
