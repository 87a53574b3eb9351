//! Time source shared by the store engine and the services built on it.

use std::fmt::Debug;
use std::sync::atomic::{AtomicI64, Ordering};
use std::time::Duration;

/// Wall clock in Unix milliseconds
pub trait Clock: Send + Sync + Debug {
    fn now_millis(&self) -> i64;

    /// Unix seconds
    fn now_secs(&self) -> i64 {
        self.now_millis().div_euclid(1000)
    }
}

/// Real time
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// Clock that only moves when told to. Used to drive TTLs, leases and
/// throttling deterministically.
#[derive(Debug, Default)]
pub struct ManualClock {
    millis: AtomicI64,
}

impl ManualClock {
    pub fn new(start_millis: i64) -> Self {
        Self {
            millis: AtomicI64::new(start_millis),
        }
    }

    pub fn at_secs(secs: i64) -> Self {
        Self::new(secs * 1000)
    }

    pub fn advance(&self, by: Duration) {
        self.millis
            .fetch_add(by.as_millis() as i64, Ordering::SeqCst);
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: i64) {
        self.set_millis(secs * 1000);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_manual_clock_advance() {
        let clock = ManualClock::at_secs(100);
        assert_eq!(clock.now_secs(), 100);

        clock.advance(Duration::from_millis(2500));
        assert_eq!(clock.now_millis(), 102_500);
        assert_eq!(clock.now_secs(), 102);
    }

    #[test]
    fn test_negative_millis_floor() {
        let clock = ManualClock::new(-1);
        assert_eq!(clock.now_secs(), -1);
    }
}
