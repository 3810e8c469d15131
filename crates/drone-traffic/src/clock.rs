//! Shared simulated time-of-day.

use chrono::{NaiveTime, TimeDelta};
use std::sync::{PoisonError, RwLock};

/// Simulated clock with a single writer (the dispatcher) and many readers.
///
/// Readers always get a complete `NaiveTime` snapshot. The value never moves
/// backwards: an advance that would wrap past midnight stops at 23:59:59.
#[derive(Debug)]
pub struct SimClock {
    now: RwLock<NaiveTime>,
}

impl SimClock {
    #[must_use]
    pub const fn new(start: NaiveTime) -> Self {
        Self {
            now: RwLock::new(start),
        }
    }

    /// Current simulated time.
    pub fn now(&self) -> NaiveTime {
        *self.now.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move the clock forward by whole seconds and return the new value.
    pub fn advance(&self, seconds: u32) -> NaiveTime {
        let mut now = self.now.write().unwrap_or_else(PoisonError::into_inner);
        let (next, wrapped) = now.overflowing_add_signed(TimeDelta::seconds(i64::from(seconds)));
        *now = if wrapped == 0 { next } else { last_second().max(*now) };
        *now
    }
}

fn last_second() -> NaiveTime {
    NaiveTime::from_hms_opt(23, 59, 59).unwrap_or_default()
}
