//! Timer queue driven by a timerfd.
//!
//! Timers are ordered by `(expiration, sequence)`: the sequence is a
//! process-wide monotonically allocated id, so simultaneous expirations
//! still have a total order and cancellation by identity is a map lookup
//! plus an `O(log n)` removal — no decrease-key primitive needed.
//!
//! The owning loop reads the timerfd, takes the due timers out of the
//! queue, runs their callbacks with no queue borrow held (callbacks may
//! add or cancel timers), then hands the batch back for repeating timers
//! to be re-armed from the post-fire clock.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::io;
use std::os::fd::RawFd;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use crate::time::timestamp::Timestamp;

use super::sys;

static SEQUENCE: AtomicU64 = AtomicU64::new(1);

/// Allocates the identity of a timer about to be scheduled.
pub(crate) fn next_sequence() -> u64 {
    SEQUENCE.fetch_add(1, Ordering::Relaxed)
}

/// Opaque id naming a scheduled timer; used to cancel it from any thread.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct TimerId(pub(crate) u64);

pub(crate) struct Timer {
    pub(crate) sequence: u64,
    pub(crate) expiration: Timestamp,
    pub(crate) interval: Option<Duration>,
    pub(crate) callback: Box<dyn FnMut()>,
}

pub(crate) struct TimerQueue {
    timer_fd: RawFd,
    timers: BTreeMap<(Timestamp, u64), Timer>,
    /// sequence → expiration, for cancellation by identity.
    active: HashMap<u64, Timestamp>,
    /// Repeating timers cancelled while their callback batch is running.
    cancelling: HashSet<u64>,
    calling_expired: bool,
}

impl TimerQueue {
    pub(crate) fn new() -> io::Result<TimerQueue> {
        Ok(TimerQueue {
            timer_fd: sys::timerfd()?,
            timers: BTreeMap::new(),
            active: HashMap::new(),
            cancelling: HashSet::new(),
            calling_expired: false,
        })
    }

    pub(crate) fn fd(&self) -> RawFd {
        self.timer_fd
    }

    pub(crate) fn insert(&mut self, timer: Timer) {
        let key = (timer.expiration, timer.sequence);
        let earliest_changed = self
            .timers
            .first_key_value()
            .is_none_or(|(first, _)| key < *first);
        self.active.insert(timer.sequence, timer.expiration);
        self.timers.insert(key, timer);
        if earliest_changed {
            self.arm(key.0);
        }
    }

    /// Cancels by identity. A timer that already fired (and is not
    /// repeating) is simply absent: the cancel is a no-op. A repeating
    /// timer cancelled from inside the current callback batch is flagged so
    /// it will not be re-armed.
    pub(crate) fn cancel(&mut self, id: TimerId) {
        if let Some(expiration) = self.active.remove(&id.0) {
            self.timers.remove(&(expiration, id.0));
        } else if self.calling_expired {
            self.cancelling.insert(id.0);
        }
    }

    /// Acknowledges the timerfd edge and removes every timer due at `now`,
    /// in `(expiration, sequence)` order.
    pub(crate) fn take_expired(&mut self, now: Timestamp) -> Vec<Timer> {
        sys::read_timerfd(self.timer_fd);

        let boundary = (Timestamp::from_micros(now.micros() + 1), 0);
        let later = self.timers.split_off(&boundary);
        let due = std::mem::replace(&mut self.timers, later);

        let mut expired = Vec::with_capacity(due.len());
        for (_, timer) in due {
            self.active.remove(&timer.sequence);
            expired.push(timer);
        }

        self.cancelling.clear();
        self.calling_expired = true;
        expired
    }

    /// Re-arms surviving repeating timers from the post-fire clock and
    /// programs the timerfd for the next deadline.
    pub(crate) fn restore(&mut self, expired: Vec<Timer>, now: Timestamp) {
        self.calling_expired = false;
        for mut timer in expired {
            if let Some(interval) = timer.interval {
                if !self.cancelling.contains(&timer.sequence) {
                    timer.expiration = now + interval;
                    self.active.insert(timer.sequence, timer.expiration);
                    self.timers
                        .insert((timer.expiration, timer.sequence), timer);
                }
            }
        }
        self.cancelling.clear();

        if let Some(((expiration, _), _)) = self.timers.first_key_value() {
            self.arm(*expiration);
        }
    }

    fn arm(&self, expiration: Timestamp) {
        if let Err(e) = sys::arm_timerfd(self.timer_fd, expiration - Timestamp::now()) {
            crate::error!("TimerQueue: timerfd_settime: {e}");
        }
    }
}

impl Drop for TimerQueue {
    fn drop(&mut self) {
        sys::close(self.timer_fd);
    }
}
