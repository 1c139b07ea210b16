//! Microsecond wall-clock timestamps.
//!
//! A [`Timestamp`] is a signed count of microseconds since the Unix epoch.
//! It is the time currency of the whole crate: poll return times, timer
//! deadlines and log-line clocks are all timestamps.
//!
//! `now()` is non-decreasing within a process even if the wall clock steps
//! backwards: a global high-water mark clamps every reading to at least the
//! previous one.

use std::ops::{Add, Sub};
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

pub const MICROS_PER_SECOND: i64 = 1_000_000;

/// Highest timestamp handed out so far.
static LAST_NOW: AtomicI64 = AtomicI64::new(0);

/// A point in time, in microseconds since the Unix epoch.
///
/// Copyable and cheap to pass by value. The default value is the invalid
/// timestamp (zero).
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp {
    micros: i64,
}

impl Timestamp {
    /// The invalid timestamp.
    pub const fn invalid() -> Self {
        Self { micros: 0 }
    }

    pub const fn from_micros(micros: i64) -> Self {
        Self { micros }
    }

    pub fn from_unix_seconds(seconds: i64) -> Self {
        Self {
            micros: seconds * MICROS_PER_SECOND,
        }
    }

    /// Current wall-clock time, clamped so that consecutive calls never
    /// decrease within this process.
    pub fn now() -> Self {
        let wall = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        let prev = LAST_NOW.fetch_max(wall, Ordering::Relaxed);
        Self {
            micros: wall.max(prev),
        }
    }

    pub const fn valid(&self) -> bool {
        self.micros > 0
    }

    pub const fn micros(&self) -> i64 {
        self.micros
    }

    pub const fn seconds(&self) -> i64 {
        self.micros / MICROS_PER_SECOND
    }

    /// Renders `YYYY/MM/DD HH:MM:SS` (local time), optionally with a
    /// `.ffffff` microsecond suffix.
    pub fn format(&self, with_micros: bool) -> String {
        use chrono::TimeZone;

        let secs = self.micros.div_euclid(MICROS_PER_SECOND);
        let sub = self.micros.rem_euclid(MICROS_PER_SECOND);
        let when = match chrono::Local.timestamp_opt(secs, (sub * 1000) as u32) {
            chrono::offset::LocalResult::Single(t) => t,
            _ => return String::from("<invalid time>"),
        };
        if with_micros {
            format!("{}.{:06}", when.format("%Y/%m/%d %H:%M:%S"), sub)
        } else {
            when.format("%Y/%m/%d %H:%M:%S").to_string()
        }
    }
}

impl Add<Duration> for Timestamp {
    type Output = Timestamp;

    fn add(self, rhs: Duration) -> Timestamp {
        Timestamp {
            micros: self.micros + rhs.as_micros() as i64,
        }
    }
}

impl Sub<Timestamp> for Timestamp {
    type Output = Duration;

    /// Saturating difference; an earlier `rhs` yields zero.
    fn sub(self, rhs: Timestamp) -> Duration {
        let delta = self.micros - rhs.micros;
        if delta <= 0 {
            Duration::ZERO
        } else {
            Duration::from_micros(delta as u64)
        }
    }
}
