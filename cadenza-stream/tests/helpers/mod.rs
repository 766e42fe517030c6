//! Test helpers for cadenza-stream integration tests
//!
//! Provides WAV fixture generation and a harness around a bare session
//! (no network): a session wired to an outbound queue whose receiver the
//! test drains directly.
#![allow(dead_code)]

use cadenza_common::{BitrateMode, Quality, ServerMessage, Track};
use cadenza_stream::net::outbound::{Outbound, OutboundQueue};
use cadenza_stream::playback::session::Session;
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::Receiver;

/// Write a sine-tone WAV fixture.
pub fn write_wav(path: &Path, rate: u32, channels: u16, seconds: f32) {
    let spec = hound::WavSpec {
        channels,
        sample_rate: rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let frames = (rate as f32 * seconds) as u32;
    for i in 0..frames {
        let t = i as f32 / rate as f32;
        let sample = ((2.0 * std::f32::consts::PI * 440.0 * t).sin() * 0.5 * i16::MAX as f32) as i16;
        for _ in 0..channels {
            writer.write_sample(sample).unwrap();
        }
    }
    writer.finalize().unwrap();
}

/// Track metadata for a fixture file.
pub fn track_for(path: &Path, duration_sec: u32) -> Track {
    let mut track = Track::untagged(path);
    track.duration_sec = duration_sec;
    track
}

/// Session wired to an outbound queue of the given capacity.
///
/// Returns the queue handle too so tests can watch fill level and drops.
pub fn new_session(capacity: usize) -> (Arc<Session>, OutboundQueue, Receiver<Outbound>) {
    let (outbound, rx) = OutboundQueue::with_capacity(capacity);
    let session = Session::new(Quality::Standard, BitrateMode::Vbr, outbound.clone()).unwrap();
    (session, outbound, rx)
}

/// Poll `predicate` every 10 ms until it holds or `timeout` elapses.
pub fn wait_until(timeout: Duration, mut predicate: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if predicate() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(10));
    }
    predicate()
}

/// Everything drained from an outbound queue so far.
#[derive(Default)]
pub struct Drained {
    pub messages: Vec<ServerMessage>,
    pub audio_frames: Vec<Vec<u8>>,
}

impl Drained {
    /// Pull whatever is currently queued (non-blocking).
    pub fn pump(&mut self, rx: &mut Receiver<Outbound>) {
        while let Ok(item) = rx.try_recv() {
            match item {
                Outbound::Message(msg) => self.messages.push(msg),
                Outbound::Audio(frame) => self.audio_frames.push(frame),
            }
        }
    }

    /// Latest state snapshot seen, if any.
    pub fn last_state(&self) -> Option<&cadenza_common::StateSnapshot> {
        self.messages.iter().rev().find_map(|m| match m {
            ServerMessage::State(snapshot) => Some(snapshot),
            _ => None,
        })
    }
}
