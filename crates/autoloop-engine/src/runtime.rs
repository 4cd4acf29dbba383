//! Tokio driver for the engine
//!
//! The engine core is poll-driven and runtime-agnostic; this module is the
//! async boundary for hosts that tick it from a tokio task. Tests use
//! tokio's paused clock, so driver timing is deterministic.

use crate::Engine;
use autoloop_core::Clock;
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Clock backed by `tokio::time::Instant`, so paused/auto-advanced test
/// time is visible to engine deadlines.
#[derive(Debug)]
pub struct TokioClock {
    origin: tokio::time::Instant,
}

impl TokioClock {
    pub fn new() -> Self {
        Self {
            origin: tokio::time::Instant::now(),
        }
    }
}

impl Default for TokioClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }
}

/// Tick the engine at the given interval until it deregisters loop interest.
pub async fn run_until_idle(engine: &mut Engine, tick_interval: Duration) {
    let mut interval = tokio::time::interval(tick_interval);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);
    loop {
        interval.tick().await;
        engine.tick();
        if !engine.needs_poll() {
            break;
        }
    }
}
