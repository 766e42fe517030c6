//! # Cadenza Common Library
//!
//! Shared code for the Cadenza music streaming service and its clients:
//! - Control and stream channel wire messages
//! - Playback state snapshots and error codes
//! - Quality tiers, bitrate tables, and transport frame constants
//! - Track metadata value type

pub mod protocol;
pub mod quality;
pub mod track;

pub use protocol::{ClientMessage, ErrorCode, ServerMessage, StateSnapshot};
pub use quality::{BitrateMode, Quality};
pub use track::Track;
