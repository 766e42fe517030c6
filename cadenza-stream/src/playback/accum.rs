//! Sample accumulation buffer
//!
//! Bridges the resampler's variable-size output chunks to the encoder's
//! fixed frame size. Backed by a preallocated ring buffer; the hot path
//! never allocates.
//!
//! Capacity is ~100 ms of transport audio, far above the largest resampled
//! chunk, so an overflowing append indicates a stalled consumer and the
//! chunk is dropped rather than partially written.

use cadenza_common::quality::{FRAME_VALUES, TRANSPORT_CHANNELS, TRANSPORT_SAMPLE_RATE};
use ringbuf::{
    traits::{Consumer, Observer, Producer, Split},
    HeapRb,
};
use tracing::warn;

/// Buffer capacity in f32 values: 100 ms of interleaved stereo at 48 kHz.
pub const ACCUM_CAPACITY: usize = TRANSPORT_SAMPLE_RATE as usize / 10 * TRANSPORT_CHANNELS;

/// Fixed-capacity accumulator of interleaved transport-format samples.
pub struct AccumBuffer {
    producer: ringbuf::HeapProd<f32>,
    consumer: ringbuf::HeapCons<f32>,
    capacity: usize,
}

impl AccumBuffer {
    pub fn new() -> Self {
        Self::with_capacity(ACCUM_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let rb = HeapRb::new(capacity);
        let (producer, consumer) = rb.split();
        Self {
            producer,
            consumer,
            capacity,
        }
    }

    /// Append a chunk of interleaved samples.
    ///
    /// The whole chunk is dropped (with a warning) if it does not fit;
    /// partial appends would desynchronize the channel interleaving.
    pub fn append(&mut self, samples: &[f32]) -> bool {
        if samples.len() > self.producer.vacant_len() {
            warn!(
                "Accumulation buffer overflow ({} queued, {} incoming), dropping chunk",
                self.len(),
                samples.len()
            );
            return false;
        }
        let written = self.producer.push_slice(samples);
        debug_assert_eq!(written, samples.len());
        true
    }

    /// Number of buffered f32 values.
    pub fn len(&self) -> usize {
        self.consumer.occupied_len()
    }

    pub fn is_empty(&self) -> bool {
        self.consumer.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Whether a full codec frame can be consumed.
    pub fn has_full_frame(&self) -> bool {
        self.len() >= FRAME_VALUES
    }

    /// Copy out exactly one codec frame, advancing past it.
    ///
    /// `out` must hold at least [`FRAME_VALUES`] values. Returns false (and
    /// consumes nothing) when a full frame is not available.
    pub fn consume_frame(&mut self, out: &mut [f32]) -> bool {
        if !self.has_full_frame() {
            return false;
        }
        let read = self.consumer.pop_slice(&mut out[..FRAME_VALUES]);
        debug_assert_eq!(read, FRAME_VALUES);
        true
    }

    /// Discard all buffered samples (seek, track change).
    pub fn clear(&mut self) {
        self.consumer.clear();
    }
}

impl Default for AccumBuffer {
    fn default() -> Self {
        Self::new()
    }
}
