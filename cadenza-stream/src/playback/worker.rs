//! Per-session streaming worker
//!
//! One thread per active session runs this loop: pull a chunk from the
//! decoder, resample it to the transport rate, widen mono to stereo,
//! accumulate, then encode and deliver full frames at real-time pace.
//!
//! # Locking discipline
//!
//! The session lock is held only to move handles and update shared state —
//! never across a decode, resample, or encode call. The worker `take()`s the
//! decoder and resampler out of the guarded state (with `decoder_busy` set)
//! for the duration of the unlocked decode, then returns them and signals
//! the decoder-idle condition. A control operation that needs to swap the
//! decoder either joins the whole thread or waits on that signal.

use crate::net::sink::Delivery;
use crate::playback::pacer::FramePacer;
use crate::playback::session::{Session, IDLE_SLEEP};
use cadenza_common::quality::FRAME_VALUES;
use cadenza_common::{ErrorCode, ServerMessage};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use tracing::{debug, info, trace, warn};

/// How often position reports go to the client while streaming.
const POSITION_UPDATE_INTERVAL: Duration = Duration::from_secs(1);

/// Worker thread entry point.
pub(crate) fn run(session: Arc<Session>) {
    debug!("Streaming worker started");

    let mut pacer = FramePacer::new();
    let mut chunk: Vec<f32> = Vec::new();
    let mut stereo: Vec<f32> = Vec::new();
    let mut frame = vec![0.0f32; FRAME_VALUES];
    let mut last_position_update = Instant::now();

    while !session.stop_requested.load(Ordering::Acquire) {
        // Encoder changes apply between frames, never mid-frame, and leave
        // the accumulation buffer intact.
        if session.reconfigure_requested.swap(false, Ordering::AcqRel) {
            let mut core = session.lock_core();
            let (quality, mode) = (core.pending_quality, core.pending_bitrate_mode);
            core.quality = quality;
            core.bitrate_mode = mode;
            if let Some(encoder) = core.encoder.as_mut() {
                if let Err(e) = encoder.reconfigure(quality, mode) {
                    warn!("Encoder reconfiguration failed: {}", e);
                }
            }
        }

        // Brief lock: check for work and move the handles out.
        let (mut decoder, mut resampler, source_channels) = {
            let mut core = session.lock_core();
            if core.decoder.is_none() || !core.playing || core.paused {
                drop(core);
                pacer.reset();
                thread::sleep(IDLE_SLEEP);
                continue;
            }
            session.decoder_busy.store(true, Ordering::Release);
            (
                core.decoder.take().expect("checked above"),
                core.resampler.take(),
                core.source_channels,
            )
        };

        // Decode without holding the lock; this call may take a while.
        chunk.clear();
        let frames_read = match decoder.read_chunk(&mut chunk) {
            Ok(n) => n,
            Err(e) => {
                warn!("Decode failed, skipping track: {}", e);
                0
            }
        };

        if frames_read == 0 {
            // Track finished (or is unreadable): decoder closes here.
            drop(decoder);
            drop(resampler);
            session.decoder_busy.store(false, Ordering::Release);
            pacer.reset();
            advance_queue(&session);
            continue;
        }

        // Resample and widen outside the lock as well.
        let processed: Vec<f32>;
        let samples: &[f32] = match resampler.as_mut() {
            Some(rs) => match rs.process(&chunk) {
                Ok(v) => {
                    processed = v;
                    &processed
                }
                Err(e) => {
                    warn!("Resample failed, dropping chunk: {}", e);
                    processed = Vec::new();
                    &processed
                }
            },
            None => &chunk,
        };
        let samples: &[f32] = if source_channels == 1 {
            crate::audio::mono_to_stereo(samples, &mut stereo);
            &stereo
        } else {
            samples
        };

        session.decoder_busy.store(false, Ordering::Release);
        {
            let mut core = session.lock_core();
            core.decoder = Some(decoder);
            core.resampler = resampler;
            session.notify_decoder_idle();
            core.position += frames_read as u64;
            core.accum.append(samples);
        }

        encode_ready_frames(&session, &mut frame, &mut pacer);

        if last_position_update.elapsed() >= POSITION_UPDATE_INTERVAL {
            send_position(&session);
            last_position_update = Instant::now();
        }
    }

    debug!("Streaming worker stopped");
}

/// Encode and deliver every full frame currently accumulated.
///
/// The encoder is moved out for the duration so no lock spans an encode;
/// frames are pulled one at a time under brief locks.
fn encode_ready_frames(session: &Arc<Session>, frame: &mut [f32], pacer: &mut FramePacer) {
    let encoder = session.lock_core().encoder.take();
    let Some(mut encoder) = encoder else {
        return;
    };

    loop {
        let has_frame = session.lock_core().accum.consume_frame(frame);
        if !has_frame {
            break;
        }
        match encoder.encode(frame) {
            Ok(payload) => {
                if session.sink.deliver(payload) == Delivery::Dropped {
                    trace!("Audio frame dropped by delivery policy");
                }
                pacer.pace();
            }
            Err(e) => {
                warn!("Opus encode failed: {}", e);
                break;
            }
        }
    }

    session.lock_core().encoder = Some(encoder);
}

/// End-of-track: advance the queue, open the next decoder, or stop at the
/// end of the queue. Runs on the worker thread with the decoder already
/// closed.
fn advance_queue(session: &Arc<Session>) {
    let mut core = session.lock_core();
    session.notify_decoder_idle();
    core.close_decoder();

    core.queue_index += 1;
    if core.queue_index >= core.queue.len() {
        info!("Queue finished");
        core.playing = false;
        core.paused = false;
        core.queue_index = 0;
        core.position = 0;
        drop(core);
        session.send_state();
        return;
    }

    match core.open_current() {
        Ok(()) => {
            drop(core);
            session.send_state();
        }
        Err(e) => {
            // Cannot open the next file: stop, report, keep the worker
            // alive for later control messages.
            warn!("Cannot open next track: {}", e);
            core.playing = false;
            drop(core);
            session.send_error(ErrorCode::PlaybackError, "Failed to open next track");
            session.send_state();
        }
    }
}

/// Periodic position report.
fn send_position(session: &Arc<Session>) {
    let (position_sec, duration_sec) = {
        let core = session.lock_core();
        let position_sec = if core.source_rate > 0 {
            core.position as f64 / core.source_rate as f64
        } else {
            0.0
        };
        let duration_sec = core.current_track().map(|t| t.duration_sec).unwrap_or(0);
        (position_sec, duration_sec)
    };
    session.outbound.send_message(ServerMessage::Position {
        position_sec,
        duration_sec,
    });
}
