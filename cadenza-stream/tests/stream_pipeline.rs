//! Integration tests for the per-session streaming pipeline
//!
//! Drives a bare session (no network) against generated WAV fixtures and
//! watches the outbound queue: decode → resample → accumulate → encode →
//! pace → deliver, plus the playback state machine around it.

mod helpers;

use cadenza_common::protocol::decode_audio_frame;
use cadenza_common::quality::MAX_OPUS_PAYLOAD;
use cadenza_common::{ErrorCode, ServerMessage};
use helpers::{new_session, track_for, wait_until, write_wav, Drained};
use std::path::PathBuf;
use std::time::Duration;

fn fixture(dir: &tempfile::TempDir, name: &str, rate: u32, channels: u16, seconds: f32) -> PathBuf {
    let path = dir.path().join(name);
    write_wav(&path, rate, channels, seconds);
    path
}

#[test]
fn play_streams_frames_until_end_of_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "tone.wav", 44100, 2, 0.3);

    let (session, _queue, mut rx) = new_session(4096);
    let mut drained = Drained::default();

    session.play_tracks(vec![track_for(&path, 1)]).unwrap();
    assert!(session.snapshot().playing);

    let finished = wait_until(Duration::from_secs(5), || {
        drained.pump(&mut rx);
        !session.snapshot().playing
    });
    assert!(finished, "track never finished");
    drained.pump(&mut rx);

    // 0.3 s of audio is ~15 codec frames; the resampler tail may cost one.
    assert!(
        drained.audio_frames.len() >= 10,
        "expected a stream of frames, got {}",
        drained.audio_frames.len()
    );
    for frame in &drained.audio_frames {
        let payload = decode_audio_frame(frame).expect("bad frame header");
        assert!(!payload.is_empty());
        assert!(payload.len() <= MAX_OPUS_PAYLOAD);
    }

    // End of queue reported as stopped with the index rewound.
    let last = drained.last_state().expect("no state update seen");
    assert!(!last.playing);
    assert_eq!(last.queue_index, 0);
}

#[test]
fn position_is_monotonic_within_a_track() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "tone.wav", 44100, 2, 1.0);

    let (session, _queue, mut rx) = new_session(4096);
    session.play_tracks(vec![track_for(&path, 1)]).unwrap();

    let mut last = 0.0;
    let mut samples = 0;
    let mut drained = Drained::default();
    while session.snapshot().playing && samples < 20 {
        drained.pump(&mut rx);
        let position = session.snapshot().position_sec;
        assert!(position >= last, "position went backwards: {last} -> {position}");
        last = position;
        samples += 1;
        std::thread::sleep(Duration::from_millis(20));
    }
    assert!(last > 0.05, "position never advanced: {last}");

    session.stop();
    assert_eq!(session.snapshot().position_sec, 0.0);
}

#[test]
fn seek_sets_position_within_a_frame() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "tone.wav", 44100, 2, 2.0);

    let (session, _queue, mut rx) = new_session(4096);
    session.play_tracks(vec![track_for(&path, 2)]).unwrap();
    session.pause();

    session.seek(1.0).unwrap();

    let position = session.snapshot().position_sec;
    assert!(
        (position - 1.0).abs() < 0.05,
        "seek landed at {position}, wanted ~1.0"
    );

    // Paused session holds the seek position.
    std::thread::sleep(Duration::from_millis(120));
    let mut drained = Drained::default();
    drained.pump(&mut rx);
    assert_eq!(session.snapshot().position_sec, position);
}

#[test]
fn pause_freezes_position_resume_continues() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "tone.wav", 44100, 2, 2.0);

    let (session, _queue, mut rx) = new_session(4096);
    let mut drained = Drained::default();
    session.play_tracks(vec![track_for(&path, 2)]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        drained.pump(&mut rx);
        session.snapshot().position_sec > 0.05
    }));

    session.pause();
    // Let any in-flight decode land; after that the position must freeze.
    std::thread::sleep(Duration::from_millis(100));
    let frozen = session.snapshot().position_sec;
    std::thread::sleep(Duration::from_millis(150));
    drained.pump(&mut rx);
    assert_eq!(session.snapshot().position_sec, frozen);
    assert!(session.snapshot().paused);

    // Issuing pause again changes nothing.
    session.pause();
    assert_eq!(session.snapshot().position_sec, frozen);

    session.resume();
    assert!(wait_until(Duration::from_secs(2), || {
        drained.pump(&mut rx);
        session.snapshot().position_sec > frozen
    }));
}

#[test]
fn queue_advances_across_tracks() {
    let dir = tempfile::tempdir().unwrap();
    let first = fixture(&dir, "one.wav", 44100, 2, 0.2);
    let second = fixture(&dir, "two.wav", 44100, 2, 0.2);

    let (session, _queue, mut rx) = new_session(4096);
    let mut drained = Drained::default();
    session
        .play_tracks(vec![track_for(&first, 1), track_for(&second, 1)])
        .unwrap();

    let finished = wait_until(Duration::from_secs(10), || {
        drained.pump(&mut rx);
        !session.snapshot().playing
    });
    assert!(finished, "queue never finished");
    drained.pump(&mut rx);

    // Some state update along the way announced the second track.
    let saw_second = drained.messages.iter().any(|m| match m {
        ServerMessage::State(s) => s.playing && s.queue_index == 1,
        _ => false,
    });
    assert!(saw_second, "no state update for the second track");

    let snapshot = session.snapshot();
    assert_eq!(snapshot.queue_index, 0);
    assert_eq!(snapshot.queue_length, 2);
    assert_eq!(snapshot.position_sec, 0.0);
}

#[test]
fn unopenable_next_track_stops_with_error() {
    let dir = tempfile::tempdir().unwrap();
    let good = fixture(&dir, "good.wav", 44100, 2, 0.2);
    let missing = dir.path().join("missing.wav");

    let (session, _queue, mut rx) = new_session(4096);
    let mut drained = Drained::default();
    session
        .play_tracks(vec![track_for(&good, 1), track_for(&missing, 1)])
        .unwrap();

    let stopped = wait_until(Duration::from_secs(10), || {
        drained.pump(&mut rx);
        !session.snapshot().playing
    });
    assert!(stopped);
    drained.pump(&mut rx);

    let saw_error = drained.messages.iter().any(|m| {
        matches!(
            m,
            ServerMessage::Error {
                code: ErrorCode::PlaybackError,
                ..
            }
        )
    });
    assert!(saw_error, "no PLAYBACK_ERROR reported");
    assert!(!session.snapshot().playing);
}

#[test]
fn mono_low_rate_source_streams_fine() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "mono.wav", 22050, 1, 0.3);

    let (session, _queue, mut rx) = new_session(4096);
    let mut drained = Drained::default();
    session.play_tracks(vec![track_for(&path, 1)]).unwrap();

    let snapshot = session.snapshot();
    assert_eq!(snapshot.source_rate, 22050);
    assert_eq!(snapshot.source_format, "wav");

    let finished = wait_until(Duration::from_secs(5), || {
        drained.pump(&mut rx);
        !session.snapshot().playing
    });
    assert!(finished);
    drained.pump(&mut rx);

    assert!(drained.audio_frames.len() >= 10);
    for frame in &drained.audio_frames {
        assert!(decode_audio_frame(frame).is_some());
    }
}

#[test]
fn backpressure_drops_frames_without_blocking_playback() {
    let dir = tempfile::tempdir().unwrap();
    let path = fixture(&dir, "tone.wav", 44100, 2, 2.0);

    // Tiny shared queue, never drained: everything past the high-water mark
    // must be dropped while the worker keeps streaming.
    let (session, queue, _rx) = new_session(8);
    session.play_tracks(vec![track_for(&path, 2)]).unwrap();

    assert!(wait_until(Duration::from_secs(2), || {
        session.snapshot().position_sec > 0.2
    }));
    let early = session.snapshot().position_sec;
    std::thread::sleep(Duration::from_millis(300));
    let later = session.snapshot().position_sec;

    assert!(later > early, "worker stalled under backpressure");
    assert!(queue.dropped_frames() > 0, "no frames were dropped");

    session.stop();
}
