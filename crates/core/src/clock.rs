//! Injectable time source

use chrono::{TimeDelta, Utc};
use parking_lot::Mutex;

use crate::types::{truncate_ms, Timestamp};

/// Source of "now" for every service
pub trait Clock: Send + Sync {
    /// Current instant, millisecond precision
    fn now(&self) -> Timestamp;
}

/// Wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> Timestamp {
        truncate_ms(Utc::now())
    }
}

/// Manually driven clock for tests and simulations
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<Timestamp>,
}

impl ManualClock {
    /// Start at the given instant
    pub fn new(start: Timestamp) -> Self {
        Self {
            now: Mutex::new(truncate_ms(start)),
        }
    }

    /// Move forward by a duration
    pub fn advance(&self, by: TimeDelta) {
        let mut now = self.now.lock();
        *now += by;
    }

    /// Jump to an instant
    pub fn set(&self, at: Timestamp) {
        *self.now.lock() = truncate_ms(at);
    }
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new(Utc::now())
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Timestamp {
        *self.now.lock()
    }
}
