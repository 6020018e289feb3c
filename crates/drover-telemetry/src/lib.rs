//! drover-telemetry — the inputs to every scaling decision.
//!
//! Polls the broker's management API for queue depth and publish rate,
//! keeps a sliding window of task processing times, and publishes an
//! immutable `MetricsSnapshot` that the controller reads without blocking
//! on network I/O.
//!
//! # Architecture
//!
//! ```text
//! BrokerMonitor
//!   ├── poll loop (every poll_interval)
//!   │   ├── fetch_queue_stats() per queue (bounded timeout)
//!   │   ├── ProcessingTimeTracker::average()
//!   │   └── SnapshotCell::publish()
//!   └── get_metrics() → latest Arc<MetricsSnapshot>
//!
//! Prometheus exposition
//!   └── render_prometheus() → text/plain for /metrics endpoint
//! ```

pub mod broker;
pub mod error;
#[cfg(any(test, feature = "test-util"))]
pub mod fake_broker;
pub mod prometheus;
pub mod source;
pub mod window;

pub use broker::{BrokerMonitor, QueueStats, fetch_queue_stats};
pub use error::TelemetryError;
pub use prometheus::render_prometheus;
pub use source::{QueueMetricsSource, SnapshotCell};
pub use window::ProcessingTimeTracker;
