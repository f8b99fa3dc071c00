//! Time sources.
//!
//! Every expiry, maturity and timeout comparison goes through a [`Clock`] so sweeps can be
//! driven by a virtual clock in tests and simulations.

use crate::types::Timestamp;
use std::sync::atomic::{AtomicI64, Ordering};

pub trait Clock: Send + Sync {
    fn now(&self) -> Timestamp;
}

/// Wall clock. Never moves backwards even if the system time does.
#[derive(Debug, Default)]
pub struct SystemClock {
    last: AtomicI64,
}

impl SystemClock {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        let wall = Timestamp::now().as_millis();
        let prev = self.last.fetch_max(wall, Ordering::SeqCst);
        Timestamp::from_millis(prev.max(wall))
    }
}

/// Virtual clock moved explicitly by the caller.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start: Timestamp) -> Self {
        Self {
            millis: AtomicI64::new(start.as_millis()),
        }
    }

    // ignores attempts to move backwards
    pub fn set(&self, timestamp: Timestamp) {
        self.millis.fetch_max(timestamp.as_millis(), Ordering::SeqCst);
    }

    pub fn advance(&self, millis: i64) {
        self.millis.fetch_add(millis.max(0), Ordering::SeqCst);
    }

    pub fn advance_days(&self, days: i64) {
        self.advance(days * crate::types::MILLIS_PER_DAY);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        Timestamp::from_millis(self.millis.load(Ordering::SeqCst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_is_monotonic() {
        let clock = ManualClock::new(Timestamp::from_millis(1_000));
        clock.advance(500);
        assert_eq!(clock.now(), Timestamp::from_millis(1_500));

        clock.set(Timestamp::from_millis(100));
        assert_eq!(clock.now(), Timestamp::from_millis(1_500));

        clock.advance(-10);
        assert_eq!(clock.now(), Timestamp::from_millis(1_500));
    }

    #[test]
    fn system_clock_never_decreases() {
        let clock = SystemClock::new();
        let a = clock.now();
        let b = clock.now();
        assert!(b >= a);
    }
}
