//! Types shared between the telemetry, pool, and autoscale crates.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

/// Point-in-time view of broker load, published wholesale by a metrics
/// source after each successful poll.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Messages ready in the monitored queues (backlog).
    pub pending_messages: u64,
    /// Aggregate publish rate across the monitored queues (msg/s).
    pub arrival_rate: f64,
    /// Smoothed time for one worker to complete one task (s/msg).
    pub processing_time: f64,
    /// Response-time target the pool should meet (s).
    pub target_response_time: f64,
    /// Unix timestamp (seconds) of the poll that produced this snapshot.
    pub epoch: u64,
}

impl MetricsSnapshot {
    /// Tasks per second a single worker sustains.
    ///
    /// Falls back to 1.0 when the processing time is zero, negative, or
    /// not a number.
    pub fn capacity_per_worker(&self) -> f64 {
        if self.processing_time.is_finite() && self.processing_time > 0.0 {
            1.0 / self.processing_time
        } else {
            1.0
        }
    }
}

/// The outcome of one controller tick.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    /// Workers tracked by the pool when the tick started.
    pub current: u32,
    /// Workers the formula asked for.
    pub required: u32,
    /// `required - current`; positive means scale up.
    pub delta: i64,
}

impl ScalingDecision {
    pub fn new(current: u32, required: u32) -> Self {
        Self {
            current,
            required,
            delta: i64::from(required) - i64::from(current),
        }
    }

    /// Whether this decision leaves the pool untouched.
    pub fn is_noop(&self) -> bool {
        self.delta == 0
    }
}

pub fn epoch_secs() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
