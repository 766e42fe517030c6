//! Structural-mutation stress test
//!
//! Control operations fire every few milliseconds from several threads while
//! the worker streams. The point is the absence of disaster: no operation
//! may observe a closed decoder, a torn queue, or a second worker — the
//! session's locking discipline has to hold up, and the queue-index
//! invariant must be visible at every snapshot.

mod helpers;

use helpers::{new_session, track_for, wait_until, write_wav, Drained};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn concurrent_control_ops_never_corrupt_session() {
    let dir = tempfile::tempdir().unwrap();
    let mut tracks = Vec::new();
    for i in 0..3 {
        let path = dir.path().join(format!("tone{i}.wav"));
        write_wav(&path, 44100, 2, 0.5);
        tracks.push(track_for(&path, 1));
    }

    let (session, _queue, mut rx) = new_session(4096);
    session.play_tracks(tracks.clone()).unwrap();

    let running = Arc::new(AtomicBool::new(true));
    let mut handles = Vec::new();

    // Pause/resume churn
    {
        let session = Arc::clone(&session);
        let running = Arc::clone(&running);
        handles.push(std::thread::spawn(move || {
            let mut flip = false;
            while running.load(Ordering::Relaxed) {
                if flip {
                    session.pause();
                } else {
                    session.resume();
                }
                flip = !flip;
                std::thread::sleep(Duration::from_millis(5));
            }
        }));
    }

    // Seek churn
    {
        let session = Arc::clone(&session);
        let running = Arc::clone(&running);
        handles.push(std::thread::spawn(move || {
            let mut n = 0u32;
            while running.load(Ordering::Relaxed) {
                let target = (n % 5) as f64 * 0.1;
                let _ = session.seek(target);
                n += 1;
                std::thread::sleep(Duration::from_millis(10));
            }
        }));
    }

    // Skip churn
    {
        let session = Arc::clone(&session);
        let running = Arc::clone(&running);
        handles.push(std::thread::spawn(move || {
            let mut flip = false;
            while running.load(Ordering::Relaxed) {
                if flip {
                    let _ = session.next();
                } else {
                    let _ = session.previous();
                }
                flip = !flip;
                std::thread::sleep(Duration::from_millis(15));
            }
        }));
    }

    // Queue-edit churn
    {
        let session = Arc::clone(&session);
        let running = Arc::clone(&running);
        let spare = tracks[0].clone();
        handles.push(std::thread::spawn(move || {
            while running.load(Ordering::Relaxed) {
                session.add_track(spare.clone());
                let len = session.snapshot().queue_length;
                if len > 2 {
                    let _ = session.remove_track(len - 1);
                }
                std::thread::sleep(Duration::from_millis(10));
            }
        }));
    }

    // Main thread: drain outbound traffic and check the queue invariant at
    // every observable snapshot.
    let mut drained = Drained::default();
    for _ in 0..80 {
        drained.pump(&mut rx);
        let snapshot = session.snapshot();
        assert!(snapshot.queue_length <= cadenza_stream::playback::MAX_QUEUE);
        assert!(
            snapshot.queue_length == 0 || snapshot.queue_index < snapshot.queue_length,
            "queue_index {} out of bounds (len {})",
            snapshot.queue_index,
            snapshot.queue_length
        );
        std::thread::sleep(Duration::from_millis(10));
    }

    running.store(false, Ordering::Relaxed);
    for handle in handles {
        handle.join().expect("control thread panicked");
    }

    // The session still responds normally after the storm.
    session.stop();
    let snapshot = session.snapshot();
    assert!(!snapshot.playing);
    assert_eq!(snapshot.queue_index, 0);
    assert_eq!(snapshot.position_sec, 0.0);

    // And can start playing again.
    session.play_tracks(vec![session.queue_view().0[0].clone()]).unwrap();
    assert!(session.snapshot().playing);
    assert!(wait_until(Duration::from_secs(2), || {
        session.snapshot().position_sec > 0.0
    }));

    session.teardown();
}
