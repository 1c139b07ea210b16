//! Timestamp, latch and thread-id primitives.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use borealis::sync::thread::current_tid;
use borealis::{CountDownLatch, Timestamp};

#[test]
fn now_is_non_decreasing() {
    let mut last = Timestamp::now();
    for _ in 0..10_000 {
        let next = Timestamp::now();
        assert!(next >= last, "clock went backwards: {next:?} < {last:?}");
        last = next;
    }
}

#[test]
fn now_is_non_decreasing_across_threads() {
    let threads: Vec<_> = (0..4)
        .map(|_| {
            std::thread::spawn(|| {
                let mut last = Timestamp::now();
                for _ in 0..10_000 {
                    let next = Timestamp::now();
                    assert!(next >= last);
                    last = next;
                }
            })
        })
        .collect();
    for thread in threads {
        thread.join().unwrap();
    }
}

#[test]
fn timestamp_arithmetic_and_validity() {
    assert!(!Timestamp::invalid().valid());
    let now = Timestamp::now();
    assert!(now.valid());

    let later = now + Duration::from_millis(1500);
    assert_eq!((later - now).as_millis(), 1500);
    // Saturating difference: earlier minus later is zero.
    assert_eq!(now - later, Duration::ZERO);
}

#[test]
fn timestamp_formats_nineteen_columns() {
    let rendered = Timestamp::now().format(false);
    assert_eq!(rendered.len(), 19, "got {rendered:?}");
    let with_micros = Timestamp::now().format(true);
    assert_eq!(with_micros.len(), 26, "got {with_micros:?}");
}

#[test]
fn latch_releases_waiters_at_zero() {
    let latch = Arc::new(CountDownLatch::new(3));
    let done = Arc::new(AtomicUsize::new(0));

    let workers: Vec<_> = (0..3)
        .map(|i: u64| {
            let latch = latch.clone();
            std::thread::spawn(move || {
                std::thread::sleep(Duration::from_millis(20 * (i + 1)));
                latch.count_down();
            })
        })
        .collect();

    let waiter = {
        let latch = latch.clone();
        let done = done.clone();
        std::thread::spawn(move || {
            latch.wait();
            done.store(1, Ordering::SeqCst);
        })
    };

    waiter.join().unwrap();
    assert_eq!(done.load(Ordering::SeqCst), 1);
    assert_eq!(latch.count(), 0);
    for worker in workers {
        worker.join().unwrap();
    }

    // Counting down past zero stays at zero.
    latch.count_down();
    assert_eq!(latch.count(), 0);
}

#[test]
fn tid_is_cached_and_stable() {
    let first = current_tid();
    let second = current_tid();
    assert_eq!(first, second);
    assert!(first > 0);

    let other = std::thread::spawn(current_tid).join().unwrap();
    assert_ne!(first, other, "distinct threads must observe distinct tids");
}
