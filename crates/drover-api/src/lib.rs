//! drover-api — HTTP surface of the Drover daemon.
//!
//! # API Routes
//!
//! | Method | Path | Description |
//! |---|---|---|
//! | GET | `/api/v1/status` | Latest snapshot, pool size, controller state |
//! | GET | `/api/v1/workers/statistics` | Smoothed worker count since the last call |
//! | POST | `/api/v1/processing-time` | Record task durations into the window |
//! | GET | `/metrics` | Prometheus exposition |

pub mod handlers;

use std::sync::Arc;

use axum::Router;
use axum::routing::{get, post};

use drover_autoscale::ScalingController;
use drover_pool::WorkerPoolManager;
use drover_telemetry::{ProcessingTimeTracker, QueueMetricsSource};

/// Shared state for API handlers.
#[derive(Clone)]
pub struct ApiState {
    pub metrics: Arc<dyn QueueMetricsSource>,
    pub tracker: ProcessingTimeTracker,
    pub pool: Arc<WorkerPoolManager>,
    pub controller: Arc<ScalingController>,
}

/// Build the complete API router.
pub fn build_router(state: ApiState) -> Router {
    let api_routes = Router::new()
        .route("/status", get(handlers::status))
        .route("/workers/statistics", get(handlers::worker_statistics))
        .route("/processing-time", post(handlers::record_processing_time));

    Router::new()
        .nest("/api/v1", api_routes)
        .route("/metrics", get(handlers::prometheus_metrics))
        .with_state(state)
}
