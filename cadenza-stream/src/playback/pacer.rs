//! Real-time frame pacing
//!
//! Frames must leave the server at the rate the client plays them. The
//! pacer anchors a start timestamp on the first frame of a playback run and
//! schedules frame *n* at `start + n * frame_duration`, sleeping off any
//! lead. Corrections are bounded: anything over ~100 ms means the schedule
//! is stale (seek, stall, resumed run), not jitter, and is ignored. The
//! anchor is dropped whenever the worker idles so a resumed run starts a
//! fresh schedule instead of bursting to catch up.

use cadenza_common::quality::FRAME_DURATION;
use std::time::{Duration, Instant};

/// Smallest correction worth sleeping for.
const MIN_CORRECTION: Duration = Duration::from_millis(1);

/// Largest believable correction; beyond this the schedule is stale.
const MAX_CORRECTION: Duration = Duration::from_millis(100);

/// Paces frame emission against wall-clock time.
pub struct FramePacer {
    start: Option<Instant>,
    frames_sent: u64,
}

impl FramePacer {
    pub fn new() -> Self {
        Self {
            start: None,
            frames_sent: 0,
        }
    }

    /// Drop the schedule anchor; the next frame starts a new run.
    pub fn reset(&mut self) {
        self.start = None;
        self.frames_sent = 0;
    }

    /// Account for one delivered frame and sleep until its deadline.
    pub fn pace(&mut self) {
        let start = *self.start.get_or_insert_with(Instant::now);
        self.frames_sent += 1;

        if let Some(delay) = correction(start, self.frames_sent, Instant::now()) {
            std::thread::sleep(delay);
        }
    }
}

impl Default for FramePacer {
    fn default() -> Self {
        Self::new()
    }
}

/// Bounded sleep needed before frame `frames_sent + 1` may be produced.
fn correction(start: Instant, frames_sent: u64, now: Instant) -> Option<Duration> {
    let expected = start + FRAME_DURATION * frames_sent as u32;
    let lead = expected.checked_duration_since(now)?;
    if lead > MIN_CORRECTION && lead < MAX_CORRECTION {
        Some(lead)
    } else {
        None
    }
}
