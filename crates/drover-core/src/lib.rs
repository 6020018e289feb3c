//! drover-core — shared types and configuration for the Drover autoscaler.
//!
//! Parses `drover.toml`, handles human-friendly duration strings, and
//! defines the snapshot and decision types exchanged between the
//! telemetry, pool, and autoscale crates. `LoopTask` is the shared
//! handle for the monitor and controller background loops.

pub mod config;
pub mod duration;
pub mod error;
pub mod task;
pub mod types;

pub use config::{BrokerConfig, DroverConfig, ScalerConfig, TrackerConfig, WorkerConfig};
pub use duration::{format_duration, parse_duration};
pub use error::{ConfigError, ConfigResult};
pub use task::LoopTask;
pub use types::*;
