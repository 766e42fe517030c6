//! Frame delivery: dedicated channel or shared queue
//!
//! The worker always calls [`FrameSink::deliver`]; which path a frame takes
//! is an internal decision based on whether a dedicated stream channel is
//! currently attached.
//!
//! The dedicated path is a single-slot handoff, not a queue: while a frame
//! is pending or a write is in flight, a newly produced frame is dropped.
//! That bounds end-to-end latency at the cost of an occasional gap, which
//! the frame-independent codec tolerates. The fallback path goes through the
//! connection's shared outbound queue and its high-water mark.

use crate::net::outbound::OutboundQueue;
use cadenza_common::protocol::encode_audio_frame;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Where (or whether) a frame went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    /// Placed in the dedicated channel's pending slot.
    Streamed,
    /// Queued on the shared connection queue.
    Queued,
    /// Dropped by the single-slot or backpressure policy.
    Dropped,
}

/// Single-slot pending-frame handoff to the stream channel writer.
pub struct DedicatedChannel {
    pending: Mutex<Option<Vec<u8>>>,
    write_busy: AtomicBool,
    notify: Notify,
}

impl DedicatedChannel {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            pending: Mutex::new(None),
            write_busy: AtomicBool::new(false),
            notify: Notify::new(),
        })
    }

    /// Producer side: place a frame in the slot unless one is already
    /// pending or being written.
    fn offer(&self, frame: Vec<u8>) -> bool {
        if self.write_busy.load(Ordering::Acquire) {
            return false;
        }
        let mut slot = self.pending.lock().unwrap();
        if slot.is_some() {
            return false;
        }
        *slot = Some(frame);
        drop(slot);
        self.notify.notify_one();
        true
    }

    /// Consumer side: wait for the next pending frame and claim it.
    ///
    /// Marks the write in progress; the caller must follow up with
    /// [`write_complete`](Self::write_complete) once the frame is on the wire.
    pub async fn wait_frame(&self) -> Vec<u8> {
        loop {
            if let Some(frame) = self.pending.lock().unwrap().take() {
                self.write_busy.store(true, Ordering::Release);
                return frame;
            }
            self.notify.notified().await;
        }
    }

    /// Consumer side: the claimed frame has been transmitted (or the write
    /// failed terminally); new frames may be offered again.
    pub fn write_complete(&self) {
        self.write_busy.store(false, Ordering::Release);
    }
}

/// Per-session frame delivery strategy.
pub struct FrameSink {
    dedicated: Mutex<Option<Arc<DedicatedChannel>>>,
    fallback: OutboundQueue,
}

impl FrameSink {
    pub fn new(fallback: OutboundQueue) -> Self {
        Self {
            dedicated: Mutex::new(None),
            fallback,
        }
    }

    /// Attach an authenticated dedicated channel; subsequent frames bypass
    /// the shared queue.
    pub fn attach(&self, channel: Arc<DedicatedChannel>) {
        *self.dedicated.lock().unwrap() = Some(channel);
    }

    /// Detach the dedicated channel (connection closed); frames fall back
    /// to the shared queue.
    pub fn detach(&self) {
        *self.dedicated.lock().unwrap() = None;
    }

    pub fn has_dedicated(&self) -> bool {
        self.dedicated.lock().unwrap().is_some()
    }

    /// Deliver one encoded Opus payload, wrapped in the stream framing.
    pub fn deliver(&self, payload: &[u8]) -> Delivery {
        let frame = encode_audio_frame(payload);
        let dedicated = self.dedicated.lock().unwrap().clone();
        match dedicated {
            Some(channel) => {
                if channel.offer(frame) {
                    Delivery::Streamed
                } else {
                    Delivery::Dropped
                }
            }
            None => {
                if self.fallback.send_audio(frame) {
                    Delivery::Queued
                } else {
                    Delivery::Dropped
                }
            }
        }
    }
}
