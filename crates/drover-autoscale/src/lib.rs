//! drover-autoscale — backlog-driven worker scaling.
//!
//! Reads the latest `MetricsSnapshot` from a `QueueMetricsSource`,
//! computes how many workers are needed to clear the backlog plus the
//! expected arrivals within the response-time target, and pushes or pops
//! workers on a `WorkerPool` to match.
//!
//! # Scaling Algorithm
//!
//! ```text
//! B = pending_messages          backlog
//! λ = arrival_rate              msg/s
//! R = target_response_time      s
//! C = 1 / processing_time       msg/s one worker sustains
//!
//! N        = ceil((B + λ·R) / C)
//! required = clamp(N, 1, max_workers)
//!
//! required > current  → push() × (required - current)
//! required < current  → pop()  × (current - required)
//! ```
//!
//! There is no cooldown between ticks: each tick moves straight to the
//! computed target.

pub mod scaler;

pub use scaler::{ControllerConfig, ScalingController, calculate_required_workers};
