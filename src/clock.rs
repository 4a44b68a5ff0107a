//! Time sources for stamping samples and driving retention.

use std::{
    sync::atomic::{AtomicI64, Ordering},
    time::{SystemTime, UNIX_EPOCH},
};

use crate::Time;

pub trait Clock: core::fmt::Debug + Send + Sync {
    /// Current time in seconds since the Unix epoch.
    fn now(&self) -> Time;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;
impl Clock for SystemClock {
    fn now(&self) -> Time {
        // A clock before 1970 reads as the epoch.
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| Time::try_from(d.as_secs()).unwrap_or(Time::MAX))
            .unwrap_or(0)
    }
}

/// A clock that only moves when told to.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}
impl ManualClock {
    pub fn new(now: Time) -> Self {
        Self {
            now: AtomicI64::new(now),
        }
    }

    pub fn set(&self, now: Time) {
        self.now.store(now, Ordering::Release);
    }
    pub fn advance(&self, secs: Time) -> Time {
        self.now.fetch_add(secs, Ordering::AcqRel) + secs
    }
}
impl Clock for ManualClock {
    fn now(&self) -> Time {
        self.now.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.now() > 1_577_836_800);
    }

    #[test]
    fn manual_clock_advances() {
        let clock = ManualClock::new(100);
        assert_eq!(clock.now(), 100);
        assert_eq!(clock.advance(5), 105);
        clock.set(7);
        assert_eq!(clock.now(), 7);
    }
}
