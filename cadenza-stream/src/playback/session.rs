//! Per-session playback state and control state machine
//!
//! Every connected client owns one [`Session`]: a queue of tracks, the open
//! decode/resample/encode pipeline for the current track, and the streaming
//! worker thread that drives it. All mutable state lives in [`SessionCore`]
//! behind one mutex; the worker and the control path never touch it without
//! that lock, with two deliberate exceptions (the atomic flags and the
//! pending-frame slot, which carry their own synchronization).
//!
//! # Structural mutations
//!
//! Any operation that replaces or closes the decoder (play, seek, stop,
//! skip, removing the live queue entry, teardown) first stops the worker
//! thread — a blocking request-then-join, never fire-and-forget — and then
//! waits for the decoder-idle condition. Pause is not structural: it leaves
//! the decoder open and the worker idling, so position is preserved exactly.

use crate::audio::{FrameEncoder, StreamResampler, TrackDecoder};
use crate::error::{Error, Result};
use crate::net::outbound::OutboundQueue;
use crate::net::sink::FrameSink;
use crate::playback::accum::AccumBuffer;
use crate::playback::worker;
use cadenza_common::quality::TRANSPORT_SAMPLE_RATE;
use cadenza_common::{BitrateMode, ErrorCode, Quality, ServerMessage, StateSnapshot, Track};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};
use std::time::Duration;
use tracing::{error, info, warn};

/// Maximum queue length per session.
pub const MAX_QUEUE: usize = 100;

/// Worker sleep while idle (no decoder, paused, or stopped).
pub(crate) const IDLE_SLEEP: Duration = Duration::from_millis(50);

/// Bound on waiting for the worker to release the decoder.
const DECODER_IDLE_TIMEOUT: Duration = Duration::from_secs(2);

/// Mutable per-session playback state, guarded by the session mutex.
pub struct SessionCore {
    pub queue: Vec<Track>,
    pub queue_index: usize,
    pub playing: bool,
    pub paused: bool,
    /// Samples since track start, at the source rate.
    pub position: u64,
    pub source_rate: u32,
    pub source_channels: u16,
    pub source_format: String,
    pub quality: Quality,
    pub bitrate_mode: BitrateMode,
    pub pending_quality: Quality,
    pub pending_bitrate_mode: BitrateMode,
    pub decoder: Option<TrackDecoder>,
    pub resampler: Option<StreamResampler>,
    pub encoder: Option<FrameEncoder>,
    pub accum: AccumBuffer,
}

impl SessionCore {
    /// Track at the current queue index, if any.
    pub fn current_track(&self) -> Option<&Track> {
        self.queue.get(self.queue_index)
    }

    /// Open the decoder (and resampler, if the rates differ) for the
    /// current queue entry, resetting position and the accumulator.
    pub(crate) fn open_current(&mut self) -> Result<()> {
        let track_path = self
            .current_track()
            .ok_or_else(|| Error::Playback("queue index out of range".to_string()))?
            .path
            .clone();
        let decoder = TrackDecoder::open(&track_path)?;

        self.source_rate = decoder.sample_rate();
        self.source_channels = decoder.channels();
        self.source_format = decoder.format_name().to_string();
        self.position = 0;
        self.resampler = if decoder.sample_rate() != TRANSPORT_SAMPLE_RATE {
            Some(StreamResampler::new(decoder.sample_rate(), decoder.channels())?)
        } else {
            None
        };
        self.decoder = Some(decoder);
        self.accum.clear();

        info!(
            "Opened track {} ({} {} Hz, {} ch)",
            track_path.display(),
            self.source_format,
            self.source_rate,
            self.source_channels
        );
        Ok(())
    }

    /// Drop the decode stream and its resampler.
    pub(crate) fn close_decoder(&mut self) {
        self.decoder = None;
        self.resampler = None;
    }

    /// Full state snapshot for the client.
    pub(crate) fn snapshot(&self) -> StateSnapshot {
        let position_sec = if self.source_rate > 0 {
            self.position as f64 / self.source_rate as f64
        } else {
            0.0
        };
        StateSnapshot {
            playing: self.playing,
            paused: self.paused,
            track: self.current_track().cloned(),
            position_sec,
            queue_length: self.queue.len(),
            queue_index: self.queue_index,
            source_format: self.source_format.clone(),
            source_rate: self.source_rate,
            quality: self.quality,
            bitrate: self.quality.bitrate(),
            bitrate_mode: self.bitrate_mode,
        }
    }
}

/// One client's playback session.
pub struct Session {
    core: Mutex<SessionCore>,
    /// Signaled by the worker whenever it releases the decoder.
    decoder_idle: Condvar,
    /// Set while the worker holds the decoder outside the lock.
    pub(crate) decoder_busy: AtomicBool,
    /// Worker exit request; paired with a join in `stop_worker`.
    pub(crate) stop_requested: AtomicBool,
    /// Whether a worker thread is currently running.
    pub(crate) streaming: AtomicBool,
    /// Pending encoder reconfiguration, consumed by the worker between frames.
    pub(crate) reconfigure_requested: AtomicBool,
    /// Serializes structural control operations (decoder swap, worker
    /// stop/start). Control messages arrive serialized per connection, but
    /// nothing else guarantees it; holding this across the whole
    /// stop-mutate-restart sequence keeps the one-worker invariant under
    /// concurrent callers.
    control_gate: Mutex<()>,
    worker: Mutex<Option<JoinHandle<()>>>,
    pub(crate) sink: FrameSink,
    pub(crate) outbound: OutboundQueue,
}

impl Session {
    /// Create a session with its encoder ready.
    ///
    /// Encoder creation failure fails the whole session (resource
    /// exhaustion) and leaves nothing half-built.
    pub fn new(
        quality: Quality,
        bitrate_mode: BitrateMode,
        outbound: OutboundQueue,
    ) -> Result<Arc<Self>> {
        let encoder = FrameEncoder::new(quality, bitrate_mode)?;
        let core = SessionCore {
            queue: Vec::new(),
            queue_index: 0,
            playing: false,
            paused: false,
            position: 0,
            source_rate: 0,
            source_channels: 0,
            source_format: String::new(),
            quality,
            bitrate_mode,
            pending_quality: quality,
            pending_bitrate_mode: bitrate_mode,
            decoder: None,
            resampler: None,
            encoder: Some(encoder),
            accum: AccumBuffer::new(),
        };
        Ok(Arc::new(Self {
            core: Mutex::new(core),
            decoder_idle: Condvar::new(),
            decoder_busy: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            streaming: AtomicBool::new(false),
            reconfigure_requested: AtomicBool::new(false),
            control_gate: Mutex::new(()),
            worker: Mutex::new(None),
            sink: FrameSink::new(outbound.clone()),
            outbound,
        }))
    }

    pub(crate) fn lock_core(&self) -> MutexGuard<'_, SessionCore> {
        self.core.lock().unwrap()
    }

    /// Worker-side: decoder released, wake any structural waiter.
    pub(crate) fn notify_decoder_idle(&self) {
        self.decoder_idle.notify_all();
    }

    /// Current state snapshot.
    pub fn snapshot(&self) -> StateSnapshot {
        self.lock_core().snapshot()
    }

    /// Push a state snapshot to the client.
    pub fn send_state(&self) {
        let snapshot = self.snapshot();
        self.outbound.send_message(ServerMessage::State(snapshot));
    }

    /// Push an error message to the client.
    pub fn send_error(&self, code: ErrorCode, message: impl Into<String>) {
        self.outbound.send_message(ServerMessage::error(code, message));
    }

    // ========================================
    // Worker lifecycle
    // ========================================

    /// Start the streaming worker if it is not already running.
    pub fn start_worker(self: &Arc<Self>) -> Result<()> {
        if self.streaming.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.stop_requested.store(false, Ordering::Release);

        let session = Arc::clone(self);
        let handle = thread::Builder::new()
            .name("cadenza-worker".to_string())
            .spawn(move || worker::run(session))
            .map_err(|e| {
                self.streaming.store(false, Ordering::Release);
                Error::Playback(format!("cannot spawn worker thread: {}", e))
            })?;
        *self.worker.lock().unwrap() = Some(handle);
        Ok(())
    }

    /// Stop the streaming worker and wait for it to exit.
    ///
    /// Blocking by design: callers that go on to replace the decoder rely on
    /// the join for exclusivity.
    pub fn stop_worker(&self) {
        let handle = self.worker.lock().unwrap().take();
        if let Some(handle) = handle {
            self.stop_requested.store(true, Ordering::Release);
            if handle.join().is_err() {
                error!("Streaming worker panicked");
            }
            self.stop_requested.store(false, Ordering::Release);
        }
        self.streaming.store(false, Ordering::Release);
    }

    /// Wait (bounded) for the worker to release the decoder.
    ///
    /// A timeout is logged and tolerated rather than deadlocking; after a
    /// `stop_worker` join this returns immediately.
    pub(crate) fn wait_decoder_idle(&self) -> bool {
        if !self.decoder_busy.load(Ordering::Acquire) {
            return true;
        }
        let core = self.core.lock().unwrap();
        let (core, timeout) = self
            .decoder_idle
            .wait_timeout_while(core, DECODER_IDLE_TIMEOUT, |_| {
                self.decoder_busy.load(Ordering::Acquire)
            })
            .unwrap();
        drop(core);
        if timeout.timed_out() {
            warn!("Timeout waiting for decoder to become idle");
            return false;
        }
        true
    }

    // ========================================
    // Playback control
    // ========================================

    /// Replace the queue with `tracks` and play from the first.
    pub fn play_tracks(self: &Arc<Self>, mut tracks: Vec<Track>) -> Result<()> {
        let _gate = self.control_gate.lock().unwrap();
        tracks.truncate(MAX_QUEUE);
        self.stop_worker();
        self.wait_decoder_idle();
        {
            let mut core = self.lock_core();
            core.close_decoder();
            core.queue = tracks;
            core.queue_index = 0;
            if let Err(e) = core.open_current() {
                core.playing = false;
                return Err(e);
            }
            core.playing = true;
            core.paused = false;
        }
        self.start_worker()
    }

    /// Insert a track at the head of the queue and play it.
    ///
    /// A full queue loses its last entry to make room.
    pub fn play_track_front(self: &Arc<Self>, track: Track) -> Result<()> {
        let _gate = self.control_gate.lock().unwrap();
        self.stop_worker();
        self.wait_decoder_idle();
        {
            let mut core = self.lock_core();
            core.close_decoder();
            if core.queue.len() >= MAX_QUEUE {
                core.queue.truncate(MAX_QUEUE - 1);
            }
            core.queue.insert(0, track);
            core.queue_index = 0;
            if let Err(e) = core.open_current() {
                core.playing = false;
                return Err(e);
            }
            core.playing = true;
            core.paused = false;
        }
        self.start_worker()
    }

    /// Jump to a specific queue entry and play it.
    pub fn play_index(self: &Arc<Self>, index: usize) -> Result<()> {
        let _gate = self.control_gate.lock().unwrap();
        {
            let core = self.lock_core();
            if index >= core.queue.len() {
                return Err(Error::IndexOutOfRange(index));
            }
        }
        self.stop_worker();
        self.wait_decoder_idle();
        {
            let mut core = self.lock_core();
            if index >= core.queue.len() {
                return Err(Error::IndexOutOfRange(index));
            }
            core.close_decoder();
            core.queue_index = index;
            if let Err(e) = core.open_current() {
                core.playing = false;
                return Err(e);
            }
            core.playing = true;
            core.paused = false;
        }
        self.start_worker()
    }

    /// Advance to the next queue entry; sticks at the end (no wraparound).
    ///
    /// Returns false when already at the last entry.
    pub fn next(self: &Arc<Self>) -> Result<bool> {
        let target = {
            let core = self.lock_core();
            if core.queue.is_empty() || core.queue_index + 1 >= core.queue.len() {
                None
            } else {
                Some(core.queue_index + 1)
            }
        };
        match target {
            Some(index) => {
                self.play_index(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Step back to the previous queue entry; sticks at the start.
    pub fn previous(self: &Arc<Self>) -> Result<bool> {
        let target = {
            let core = self.lock_core();
            if core.queue_index > 0 && !core.queue.is_empty() {
                Some(core.queue_index - 1)
            } else {
                None
            }
        };
        match target {
            Some(index) => {
                self.play_index(index)?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pause: the worker idles, the decoder stays open, position is frozen.
    pub fn pause(&self) {
        let mut core = self.lock_core();
        core.paused = true;
    }

    /// Clear the paused flag; the worker resumes where it left off.
    pub fn resume(&self) {
        let mut core = self.lock_core();
        core.paused = false;
    }

    /// Full stop: worker joined, decoder closed, position and index reset.
    pub fn stop(&self) {
        let _gate = self.control_gate.lock().unwrap();
        self.stop_worker();
        self.wait_decoder_idle();
        let mut core = self.lock_core();
        core.playing = false;
        core.paused = false;
        core.close_decoder();
        core.position = 0;
        core.queue_index = 0;
        core.accum.clear();
    }

    /// Seek within the current track.
    ///
    /// Converts seconds at the current source rate, clears the stale
    /// accumulator, and restarts the worker if it was streaming.
    pub fn seek(self: &Arc<Self>, position_sec: f64) -> Result<()> {
        let _gate = self.control_gate.lock().unwrap();
        let was_streaming = self.streaming.load(Ordering::Acquire);
        self.stop_worker();
        self.wait_decoder_idle();
        let restart = {
            let mut core = self.lock_core();
            if core.source_rate > 0 {
                if let Some(mut decoder) = core.decoder.take() {
                    let target = (position_sec.max(0.0) * core.source_rate as f64) as u64;
                    match decoder.seek_to_sample(target) {
                        Ok(actual) => {
                            core.position = actual;
                            core.accum.clear();
                        }
                        Err(e) => warn!("Seek to {:.1}s failed: {}", position_sec, e),
                    }
                    core.decoder = Some(decoder);
                }
            }
            was_streaming && core.playing
        };
        if restart {
            self.start_worker()?;
        }
        Ok(())
    }

    // ========================================
    // Queue edits
    // ========================================

    /// Append a track; returns false when the queue is full.
    pub fn add_track(&self, track: Track) -> bool {
        let mut core = self.lock_core();
        if core.queue.len() >= MAX_QUEUE {
            return false;
        }
        core.queue.push(track);
        true
    }

    /// Append several tracks; returns how many fit.
    pub fn add_tracks(&self, tracks: Vec<Track>) -> usize {
        let mut core = self.lock_core();
        let room = MAX_QUEUE.saturating_sub(core.queue.len());
        let added = tracks.len().min(room);
        core.queue.extend(tracks.into_iter().take(added));
        added
    }

    /// Remove a queue entry by index.
    ///
    /// Removing the currently playing entry performs the same
    /// close/advance/reopen sequence as end-of-track, synchronously.
    pub fn remove_track(self: &Arc<Self>, index: usize) -> Result<()> {
        let was_playing = {
            let mut core = self.lock_core();
            if index >= core.queue.len() {
                return Err(Error::IndexOutOfRange(index));
            }
            if index != core.queue_index {
                core.queue.remove(index);
                if index < core.queue_index {
                    core.queue_index -= 1;
                }
                return Ok(());
            }
            core.playing && !core.paused
        };

        // Removing the live entry: take the worker down first so the
        // decoder swap cannot race an in-flight decode.
        let _gate = self.control_gate.lock().unwrap();
        self.stop_worker();
        self.wait_decoder_idle();
        let restart = {
            let mut core = self.lock_core();
            // The worker may have advanced past `index` before it stopped.
            if index >= core.queue.len() {
                return Err(Error::IndexOutOfRange(index));
            }
            core.queue.remove(index);
            if index < core.queue_index {
                core.queue_index -= 1;
                // Still mid-track on some later entry; let it continue.
                core.playing && core.decoder.is_some()
            } else if index == core.queue_index {
                core.close_decoder();
                if core.queue.is_empty() {
                    core.playing = false;
                    core.paused = false;
                    core.queue_index = 0;
                    core.position = 0;
                    false
                } else {
                    if core.queue_index >= core.queue.len() {
                        core.queue_index = core.queue.len() - 1;
                    }
                    if was_playing {
                        match core.open_current() {
                            Ok(()) => {
                                core.playing = true;
                                core.paused = false;
                                true
                            }
                            Err(e) => {
                                core.playing = false;
                                return Err(e);
                            }
                        }
                    } else {
                        core.playing = false;
                        core.paused = false;
                        core.position = 0;
                        false
                    }
                }
            } else {
                core.playing && core.decoder.is_some()
            }
        };
        if restart {
            self.start_worker()?;
        }
        Ok(())
    }

    /// Drop the whole queue and stop playback.
    pub fn clear_queue(&self) {
        let _gate = self.control_gate.lock().unwrap();
        self.stop_worker();
        self.wait_decoder_idle();
        let mut core = self.lock_core();
        core.close_decoder();
        core.playing = false;
        core.paused = false;
        core.queue.clear();
        core.queue_index = 0;
        core.position = 0;
        core.accum.clear();
    }

    /// Snapshot of the queue for a `queue list` reply.
    pub fn queue_view(&self) -> (Vec<Track>, usize) {
        let core = self.lock_core();
        (core.queue.clone(), core.queue_index)
    }

    // ========================================
    // Encoder preferences
    // ========================================

    /// Record requested encoder settings.
    ///
    /// The live encoder is never touched from the control path: the values
    /// are staged and the worker applies them between frames. The display
    /// fields update immediately so snapshots reflect the request.
    pub fn set_encoder_prefs(&self, quality: Option<Quality>, bitrate_mode: Option<BitrateMode>) {
        let mut core = self.lock_core();
        let new_quality = quality.unwrap_or(core.quality);
        let new_mode = bitrate_mode.unwrap_or(core.bitrate_mode);
        if new_quality == core.quality && new_mode == core.bitrate_mode {
            return;
        }
        core.quality = new_quality;
        core.bitrate_mode = new_mode;
        core.pending_quality = new_quality;
        core.pending_bitrate_mode = new_mode;
        drop(core);
        self.reconfigure_requested.store(true, Ordering::Release);
        info!("Encoder change requested: {} {}", new_quality, new_mode);
    }

    // ========================================
    // Lifecycle
    // ========================================

    /// Stop streaming but keep the session (client unsubscribed).
    pub fn stop_streaming(&self) {
        let _gate = self.control_gate.lock().unwrap();
        {
            let mut core = self.lock_core();
            core.playing = false;
            core.paused = false;
        }
        self.stop_worker();
    }

    /// Tear the session down on connection close.
    ///
    /// The worker is joined before any owned pipeline resource is released;
    /// that ordering is what makes the release safe.
    pub fn teardown(&self) {
        let _gate = self.control_gate.lock().unwrap();
        self.stop_worker();
        self.wait_decoder_idle();
        let mut core = self.lock_core();
        core.close_decoder();
        core.encoder = None;
        info!("Session torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn test_session() -> (Arc<Session>, tokio::sync::mpsc::Receiver<crate::net::outbound::Outbound>) {
        let (outbound, rx) = OutboundQueue::with_capacity(64);
        let session = Session::new(Quality::Standard, BitrateMode::Vbr, outbound).unwrap();
        (session, rx)
    }

    fn track(n: usize) -> Track {
        Track {
            path: PathBuf::from(format!("/m/{n}.mp3")),
            title: format!("Track {n}"),
            artist: "Artist".into(),
            album: "Album".into(),
            duration_sec: 60,
        }
    }

    #[test]
    fn new_session_snapshot_is_stopped() {
        let (session, _rx) = test_session();
        let snap = session.snapshot();
        assert!(!snap.playing);
        assert!(!snap.paused);
        assert!(snap.track.is_none());
        assert_eq!(snap.queue_length, 0);
        assert_eq!(snap.quality, Quality::Standard);
        assert_eq!(snap.bitrate, 96_000);
    }

    #[test]
    fn queue_is_bounded() {
        let (session, _rx) = test_session();
        for n in 0..MAX_QUEUE {
            assert!(session.add_track(track(n)));
        }
        assert!(!session.add_track(track(999)));
        assert_eq!(session.snapshot().queue_length, MAX_QUEUE);

        // Batch add also respects the bound
        session.clear_queue();
        let added = session.add_tracks((0..MAX_QUEUE + 20).map(track).collect());
        assert_eq!(added, MAX_QUEUE);
    }

    #[test]
    fn next_previous_clamp_at_bounds() {
        let (session, _rx) = test_session();
        // Empty queue: both are no-ops
        assert!(!session.next().unwrap());
        assert!(!session.previous().unwrap());
        assert_eq!(session.snapshot().queue_index, 0);

        // Single entry: previous at 0 stays put without touching playback
        session.add_track(track(0));
        assert!(!session.previous().unwrap());
        assert!(!session.next().unwrap());
        assert_eq!(session.snapshot().queue_index, 0);
    }

    #[test]
    fn remove_noncurrent_adjusts_index() {
        let (session, _rx) = test_session();
        session.add_tracks((0..4).map(track).collect());
        {
            let mut core = session.lock_core();
            core.queue_index = 2;
        }
        // Removing before the current index shifts it down
        session.remove_track(0).unwrap();
        assert_eq!(session.snapshot().queue_index, 1);
        // Removing after the current index leaves it alone
        session.remove_track(2).unwrap();
        assert_eq!(session.snapshot().queue_index, 1);
        assert_eq!(session.snapshot().queue_length, 2);
    }

    #[test]
    fn remove_current_empty_queue_stops() {
        let (session, _rx) = test_session();
        session.add_track(track(0));
        session.remove_track(0).unwrap();
        let snap = session.snapshot();
        assert!(!snap.playing);
        assert_eq!(snap.queue_length, 0);
        assert_eq!(snap.queue_index, 0);
    }

    #[test]
    fn remove_rejects_bad_index() {
        let (session, _rx) = test_session();
        session.add_track(track(0));
        assert!(matches!(
            session.remove_track(5),
            Err(Error::IndexOutOfRange(5))
        ));
    }

    #[test]
    fn pause_is_idempotent_on_position() {
        let (session, _rx) = test_session();
        {
            let mut core = session.lock_core();
            core.position = 4242;
            core.source_rate = 44100;
        }
        session.pause();
        let first = session.snapshot().position_sec;
        session.pause();
        let second = session.snapshot().position_sec;
        assert_eq!(first, second);
        assert!(session.snapshot().paused);
    }

    #[test]
    fn encoder_prefs_are_staged_not_applied() {
        let (session, _rx) = test_session();
        session.set_encoder_prefs(Some(Quality::HiFi), None);
        assert!(session.reconfigure_requested.load(Ordering::Acquire));
        let core = session.lock_core();
        // Display fields update immediately
        assert_eq!(core.quality, Quality::HiFi);
        assert_eq!(core.pending_quality, Quality::HiFi);
        // Live encoder untouched until the worker picks it up
        assert_eq!(core.encoder.as_ref().unwrap().quality(), Quality::Standard);
    }

    #[test]
    fn unchanged_prefs_request_nothing() {
        let (session, _rx) = test_session();
        session.set_encoder_prefs(Some(Quality::Standard), Some(BitrateMode::Vbr));
        assert!(!session.reconfigure_requested.load(Ordering::Acquire));
    }

    #[test]
    fn wait_decoder_idle_immediate_when_not_busy() {
        let (session, _rx) = test_session();
        assert!(session.wait_decoder_idle());
    }

    #[test]
    fn stop_resets_position_and_index() {
        let (session, _rx) = test_session();
        session.add_tracks((0..3).map(track).collect());
        {
            let mut core = session.lock_core();
            core.queue_index = 2;
            core.position = 1000;
            core.playing = true;
        }
        session.stop();
        let snap = session.snapshot();
        assert!(!snap.playing);
        assert_eq!(snap.position_sec, 0.0);
        assert_eq!(snap.queue_index, 0);
        // Queue itself survives a stop
        assert_eq!(snap.queue_length, 3);
    }

    #[test]
    fn teardown_releases_pipeline() {
        let (session, _rx) = test_session();
        session.teardown();
        let core = session.lock_core();
        assert!(core.decoder.is_none());
        assert!(core.encoder.is_none());
    }
}
