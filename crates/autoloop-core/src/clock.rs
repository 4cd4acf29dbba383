//! Monotonic time source for suspension deadlines
//!
//! All timeout math in the engine is performed against `Clock::now()` read
//! at suspension entry. Deadlines must never be derived from a cached
//! loop-tick start value: an action entered mid-tick, after a sibling
//! already consumed time, would otherwise see a stale timestamp and time
//! out early.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// A monotonic time source
///
/// `now()` returns the elapsed time since the clock's own epoch. Only
/// differences between readings are meaningful.
pub trait Clock: Send + Sync + fmt::Debug {
    fn now(&self) -> Duration;
}

/// Production clock backed by `std::time::Instant`
#[derive(Debug)]
pub struct MonotonicClock {
    origin: Instant,
}

impl MonotonicClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Manually advanced clock for deterministic tests
///
/// Time only moves when `advance` is called, so tick-by-tick timing
/// behavior can be asserted exactly.
#[derive(Debug, Default)]
pub struct ManualClock {
    micros: AtomicU64,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&self, by: Duration) {
        self.micros
            .fetch_add(by.as_micros() as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        Duration::from_micros(self.micros.load(Ordering::SeqCst))
    }
}
