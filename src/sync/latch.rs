//! Countdown latch for one-shot thread rendezvous.

use std::sync::{Condvar, Mutex};

/// Blocks waiters until the internal count reaches zero.
///
/// Used for start-up handshakes: a spawning thread waits on the latch while
/// the spawned thread publishes its state and counts down.
pub struct CountDownLatch {
    count: Mutex<usize>,
    cond: Condvar,
}

impl CountDownLatch {
    pub fn new(count: usize) -> Self {
        Self {
            count: Mutex::new(count),
            cond: Condvar::new(),
        }
    }

    /// Blocks until the count reaches zero.
    pub fn wait(&self) {
        let mut count = self.count.lock().unwrap();
        while *count > 0 {
            count = self.cond.wait(count).unwrap();
        }
    }

    /// Decrements the count; wakes all waiters when it reaches zero.
    /// Counting down past zero has no effect.
    pub fn count_down(&self) {
        let mut count = self.count.lock().unwrap();
        if *count > 0 {
            *count -= 1;
            if *count == 0 {
                self.cond.notify_all();
            }
        }
    }

    pub fn count(&self) -> usize {
        *self.count.lock().unwrap()
    }
}
