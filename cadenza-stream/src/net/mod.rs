//! Network layer: control channel, stream channel, and frame delivery
//!
//! The control server owns session lifecycle and JSON dispatch; the stream
//! server owns the dedicated audio channel; [`sink`] decides per frame
//! which path delivers it, and [`outbound`] is the shared fallback queue
//! with its backpressure policy.

pub mod control;
pub mod outbound;
pub mod registry;
pub mod sink;
pub mod stream;

pub use control::AppContext;
pub use outbound::OutboundQueue;
pub use sink::{DedicatedChannel, Delivery, FrameSink};
