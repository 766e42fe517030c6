//! Per-session playback: state machine, worker loop, frame assembly, pacing
//!
//! The control path owns the state machine ([`session::Session`]); the
//! worker thread ([`worker`]) turns files into paced Opus frames through
//! the [`accum::AccumBuffer`] and [`pacer::FramePacer`].

pub mod accum;
pub mod pacer;
pub mod session;
pub(crate) mod worker;

pub use accum::AccumBuffer;
pub use pacer::FramePacer;
pub use session::{Session, MAX_QUEUE};
