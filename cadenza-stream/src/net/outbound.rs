//! Per-connection outbound message queue
//!
//! All server→client traffic on the control channel funnels through one
//! bounded queue drained by the connection's writer task; background threads
//! never touch the socket directly. Audio frames sent through this shared
//! path are gated by a high-water mark: above it they are dropped so that
//! music never starves control messages or grows the queue without bound.

use cadenza_common::ServerMessage;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::warn;

/// Queue capacity in messages.
pub const OUTBOUND_QUEUE_CAPACITY: usize = 128;

/// Fill percentage above which audio frames are dropped.
pub const HIGH_WATER_PCT: u8 = 75;

/// One warning per this many dropped frames.
const DROP_LOG_INTERVAL: u64 = 50;

/// One queued outbound item.
#[derive(Debug)]
pub enum Outbound {
    /// JSON control-channel message.
    Message(ServerMessage),
    /// Framed binary audio (fallback path).
    Audio(Vec<u8>),
}

/// Sending half of a connection's outbound queue.
///
/// Cheap to clone; the worker thread and control handlers share it.
#[derive(Clone)]
pub struct OutboundQueue {
    tx: mpsc::Sender<Outbound>,
    dropped: Arc<AtomicU64>,
}

impl OutboundQueue {
    pub fn new() -> (Self, mpsc::Receiver<Outbound>) {
        Self::with_capacity(OUTBOUND_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> (Self, mpsc::Receiver<Outbound>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Self {
                tx,
                dropped: Arc::new(AtomicU64::new(0)),
            },
            rx,
        )
    }

    /// Current fill level as a percentage.
    pub fn fill_pct(&self) -> u8 {
        let max = self.tx.max_capacity();
        let used = max - self.tx.capacity();
        (used * 100 / max) as u8
    }

    /// Total audio frames dropped on this queue.
    pub fn dropped_frames(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    /// Queue a JSON message. Never blocks; a full queue drops the message
    /// with a warning (the connection is already drowning).
    pub fn send_message(&self, message: ServerMessage) -> bool {
        match self.tx.try_send(Outbound::Message(message)) {
            Ok(()) => true,
            Err(e) => {
                warn!("Outbound queue: dropping control message: {}", e);
                false
            }
        }
    }

    /// Queue a framed audio message, subject to the high-water mark.
    ///
    /// Never blocks. Returns false when the frame was dropped.
    pub fn send_audio(&self, frame: Vec<u8>) -> bool {
        let fill = self.fill_pct();
        if fill > HIGH_WATER_PCT {
            self.note_drop(fill);
            return false;
        }
        match self.tx.try_send(Outbound::Audio(frame)) {
            Ok(()) => true,
            Err(_) => {
                self.note_drop(self.fill_pct());
                false
            }
        }
    }

    fn note_drop(&self, fill: u8) {
        let count = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
        if count % DROP_LOG_INTERVAL == 1 {
            warn!(
                "Outbound queue: backpressure dropping audio frames (queue {}%, dropped {})",
                fill, count
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use cadenza_common::ErrorCode;

    #[tokio::test]
    async fn send_message_reaches_receiver() {
        let (queue, mut rx) = OutboundQueue::with_capacity(4);
        assert!(queue.send_message(ServerMessage::error(ErrorCode::NotFound, "x")));
        match rx.recv().await.unwrap() {
            Outbound::Message(ServerMessage::Error { code, .. }) => {
                assert_eq!(code, ErrorCode::NotFound)
            }
            other => panic!("unexpected item: {other:?}"),
        }
    }

    #[tokio::test]
    async fn audio_dropped_above_high_water() {
        let (queue, _rx) = OutboundQueue::with_capacity(8);

        // Fill to 75% (6 of 8)
        for _ in 0..6 {
            assert!(queue.send_audio(vec![0u8; 4]));
        }
        assert_eq!(queue.fill_pct(), 75);

        // Above the mark: dropped, not blocked, not queued
        assert!(!queue.send_audio(vec![0u8; 4]));
        assert_eq!(queue.fill_pct(), 75);
        assert_eq!(queue.dropped_frames(), 1);
    }

    #[tokio::test]
    async fn audio_drop_never_blocks() {
        let (queue, _rx) = OutboundQueue::with_capacity(2);
        for _ in 0..100 {
            queue.send_audio(vec![0u8; 4]);
        }
        // 2 queued, 98 dropped, and we got here without blocking
        assert_eq!(queue.dropped_frames(), 98);
    }

    #[tokio::test]
    async fn fill_drains_with_receiver() {
        let (queue, mut rx) = OutboundQueue::with_capacity(4);
        queue.send_audio(vec![1]);
        queue.send_audio(vec![2]);
        assert_eq!(queue.fill_pct(), 50);
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();
        assert_eq!(queue.fill_pct(), 0);
    }
}
