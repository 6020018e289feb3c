//! API handlers.
//!
//! Each handler reads from the shared `ApiState` and returns JSON in the
//! `{success, data, error}` envelope, except `/metrics`.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::IntoResponse;
use serde::{Deserialize, Serialize};
use tracing::debug;

use drover_core::{MetricsSnapshot, ScalingDecision};
use drover_pool::WorkerPool;

use crate::ApiState;

/// Response wrapper for consistent API format.
#[derive(Serialize)]
struct ApiResponse<T: Serialize> {
    success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    data: Option<T>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl<T: Serialize> ApiResponse<T> {
    fn ok(data: T) -> Json<Self> {
        Json(Self {
            success: true,
            data: Some(data),
            error: None,
        })
    }
}

fn error_response(msg: &str, status: StatusCode) -> impl IntoResponse {
    (
        status,
        Json(ApiResponse::<()> {
            success: false,
            data: None,
            error: Some(msg.to_string()),
        }),
    )
}

// ── Status ─────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct WindowReport {
    pub len: usize,
    pub capacity: usize,
    pub average: f64,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct StatusReport {
    /// Latest published snapshot, `null` before the first poll.
    pub snapshot: Option<MetricsSnapshot>,
    /// Worker count the controller would ask for right now.
    pub required: Option<u32>,
    pub workers: u32,
    pub pids: Vec<u32>,
    pub max_workers: u32,
    pub controller_running: bool,
    /// Controller ticks started since the daemon came up.
    pub ticks: u64,
    pub last_decision: Option<ScalingDecision>,
    pub window: WindowReport,
}

/// GET /api/v1/status
pub async fn status(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_metrics().map(|s| *s);
    let required = snapshot
        .as_ref()
        .map(|s| state.controller.calculate_required_workers(s));

    ApiResponse::ok(StatusReport {
        snapshot,
        required,
        workers: state.pool.count(),
        pids: state.pool.pids(),
        max_workers: state.controller.config().max_workers,
        controller_running: state.controller.is_running(),
        ticks: state.controller.ticks(),
        last_decision: state.controller.last_decision(),
        window: WindowReport {
            len: state.tracker.len(),
            capacity: state.tracker.capacity(),
            average: state.tracker.average(),
        },
    })
}

// ── Workers ────────────────────────────────────────────────────

/// GET /api/v1/workers/statistics
///
/// Reading compacts the sample buffer, so consecutive calls report
/// consecutive intervals.
pub async fn worker_statistics(State(state): State<ApiState>) -> impl IntoResponse {
    let average_workers = state.pool.get_statistics();
    ApiResponse::ok(serde_json::json!({
        "average_workers": average_workers,
        "current_workers": state.pool.count(),
    }))
}

// ── Processing time ────────────────────────────────────────────

/// One sample or a batch, in seconds.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum ProcessingTimeRequest {
    One { seconds: f64 },
    Many { samples: Vec<f64> },
}

impl ProcessingTimeRequest {
    fn into_samples(self) -> Vec<f64> {
        match self {
            Self::One { seconds } => vec![seconds],
            Self::Many { samples } => samples,
        }
    }
}

/// POST /api/v1/processing-time
///
/// The batch is rejected whole if any sample is negative or not finite.
pub async fn record_processing_time(
    State(state): State<ApiState>,
    Json(req): Json<ProcessingTimeRequest>,
) -> impl IntoResponse {
    let samples = req.into_samples();

    if let Some(bad) = samples.iter().find(|s| !s.is_finite() || **s < 0.0) {
        return error_response(
            &format!("invalid processing time {bad}: must be a non-negative number of seconds"),
            StatusCode::BAD_REQUEST,
        )
        .into_response();
    }

    for s in &samples {
        state.tracker.record(*s);
    }
    debug!(recorded = samples.len(), "processing-time samples ingested");

    ApiResponse::ok(serde_json::json!({
        "recorded": samples.len(),
        "window_len": state.tracker.len(),
        "average": state.tracker.average(),
    }))
    .into_response()
}

// ── Prometheus ─────────────────────────────────────────────────

/// GET /metrics
pub async fn prometheus_metrics(State(state): State<ApiState>) -> impl IntoResponse {
    let snapshot = state.metrics.get_metrics();
    let body = drover_telemetry::render_prometheus(snapshot.as_deref(), state.pool.count());
    (
        StatusCode::OK,
        [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
        body,
    )
}
