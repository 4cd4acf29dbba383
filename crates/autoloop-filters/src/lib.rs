//! Sliding-window sensor filters
//!
//! A fixed-capacity ring buffer aggregated over the trailing window of
//! values, following the same resource-constrained discipline as the
//! action engine: constant memory, constant work per sample, no
//! allocation after construction (beyond the one scratch sort).
//!
//! The cadence mirrors the device's filter chain: with `send_first_at = 1`
//! the first sample emits immediately, then every `send_every`-th sample
//! after that. NaN samples occupy window slots but are ignored by the
//! aggregates.

use serde::{Deserialize, Serialize};
use tracing::trace;

/// Aggregate computed over the trailing window
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowOp {
    Min,
    Max,
    Median,
    /// Quantile in (0, 1]; 0.9 is the device default
    Quantile(f32),
    MovingAverage,
}

/// Sliding window configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SlidingWindowConfig {
    /// Number of trailing samples aggregated
    pub window_size: usize,
    /// Emit every Nth sample
    pub send_every: usize,
    /// Position of the first emission (1 = on the first sample)
    pub send_first_at: usize,
}

impl SlidingWindowConfig {
    pub fn new(window_size: usize, send_every: usize) -> Self {
        Self {
            window_size,
            send_every,
            send_first_at: 1,
        }
    }

    pub fn send_first_at(mut self, position: usize) -> Self {
        self.send_first_at = position;
        self
    }
}

/// Sliding-window filter over a ring buffer of f32 samples
#[derive(Debug)]
pub struct SlidingWindowFilter {
    op: WindowOp,
    config: SlidingWindowConfig,
    buffer: Vec<f32>,
    head: usize,
    len: usize,
    send_at: usize,
}

impl SlidingWindowFilter {
    pub fn new(op: WindowOp, config: SlidingWindowConfig) -> Self {
        let send_first_at = config.send_first_at.clamp(1, config.send_every.max(1));
        Self {
            op,
            config,
            buffer: Vec::with_capacity(config.window_size),
            head: 0,
            len: 0,
            // Counts up so the first emission lands at send_first_at
            send_at: config.send_every.max(1) - send_first_at,
        }
    }

    /// Push one sample; returns the aggregate when this position emits.
    pub fn push(&mut self, value: f32) -> Option<f32> {
        if self.config.window_size == 0 {
            return None;
        }

        if self.buffer.len() < self.config.window_size {
            self.buffer.push(value);
        } else {
            // Wraparound: overwrite the oldest slot
            self.buffer[self.head] = value;
        }
        self.head = (self.head + 1) % self.config.window_size;
        self.len = (self.len + 1).min(self.config.window_size);

        self.send_at += 1;
        if self.send_at < self.config.send_every.max(1) {
            return None;
        }
        self.send_at = 0;

        let result = self.aggregate();
        trace!(op = ?self.op, value, result, "window emit");
        Some(result)
    }

    /// Aggregate over the valid (non-NaN) samples in the window
    fn aggregate(&self) -> f32 {
        let mut valid: Vec<f32> = self
            .buffer
            .iter()
            .copied()
            .filter(|v| !v.is_nan())
            .collect();
        if valid.is_empty() {
            return f32::NAN;
        }

        match self.op {
            WindowOp::Min => valid.iter().copied().fold(f32::INFINITY, f32::min),
            WindowOp::Max => valid.iter().copied().fold(f32::NEG_INFINITY, f32::max),
            WindowOp::MovingAverage => valid.iter().sum::<f32>() / valid.len() as f32,
            WindowOp::Median => {
                valid.sort_by(|a, b| a.total_cmp(b));
                let n = valid.len();
                if n % 2 == 1 {
                    valid[n / 2]
                } else {
                    (valid[n / 2 - 1] + valid[n / 2]) / 2.0
                }
            }
            WindowOp::Quantile(q) => {
                valid.sort_by(|a, b| a.total_cmp(b));
                let n = valid.len();
                let index = ((q * n as f32).ceil() as usize).clamp(1, n) - 1;
                valid[index]
            }
        }
    }
}
