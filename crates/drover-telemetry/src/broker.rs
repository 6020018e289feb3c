//! Broker monitor: polls the management API and publishes snapshots.
//!
//! Each poll issues one bounded-timeout `GET /api/queues/{vhost}/{queue}`
//! per monitored queue, sums `messages_ready` and the publish rate, reads
//! the smoothed processing time from the tracker, and swaps the result
//! into the `SnapshotCell`. A queue that cannot be fetched or decoded
//! contributes zero; the rest of the poll proceeds.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use serde::Deserialize;
use tracing::{debug, info, warn};

use drover_core::{BrokerConfig, LoopTask, MetricsSnapshot, epoch_secs};

use crate::error::TelemetryError;
use crate::source::{QueueMetricsSource, SnapshotCell};
use crate::window::ProcessingTimeTracker;

const DEFAULT_STOP_GRACE: Duration = Duration::from_secs(3);

/// The subset of the management API's queue object Drover reads.
///
/// Absent fields decode as zero.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct QueueStats {
    #[serde(default)]
    pub messages_ready: u64,
    #[serde(default)]
    pub message_stats: MessageStats,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct MessageStats {
    #[serde(default)]
    pub publish_details: RateDetails,
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct RateDetails {
    #[serde(default)]
    pub rate: f64,
}

impl QueueStats {
    /// Publish rate in msg/s, never negative.
    pub fn publish_rate(&self) -> f64 {
        self.message_stats.publish_details.rate.max(0.0)
    }
}

/// Fetch one queue's statistics with a hard timeout.
///
/// `path` is the origin-form request target, `authorization` the full
/// header value.
pub async fn fetch_queue_stats(
    address: &str,
    path: &str,
    authorization: &str,
    timeout: Duration,
) -> Result<QueueStats, TelemetryError> {
    tokio::time::timeout(timeout, request_queue_stats(address, path, authorization))
        .await
        .map_err(|_| TelemetryError::Timeout(timeout))?
}

async fn request_queue_stats(
    address: &str,
    path: &str,
    authorization: &str,
) -> Result<QueueStats, TelemetryError> {
    let stream = tokio::net::TcpStream::connect(address)
        .await
        .map_err(|source| TelemetryError::Connect {
            address: address.to_string(),
            source,
        })?;

    let io = hyper_util::rt::TokioIo::new(stream);
    let (mut sender, conn) = hyper::client::conn::http1::handshake(io)
        .await
        .map_err(TelemetryError::Handshake)?;

    // Drive the connection in the background.
    tokio::spawn(async move {
        let _ = conn.await;
    });

    let req = http::Request::builder()
        .method("GET")
        .uri(path)
        .header("host", address)
        .header("authorization", authorization)
        .header("accept", "application/json")
        .header("user-agent", "drover/0.1")
        .body(Empty::<Bytes>::new())?;

    let resp = sender.send_request(req).await.map_err(TelemetryError::Send)?;
    if !resp.status().is_success() {
        return Err(TelemetryError::Status(resp.status()));
    }

    let body = resp
        .into_body()
        .collect()
        .await
        .map_err(TelemetryError::Body)?
        .to_bytes();

    Ok(serde_json::from_slice(&body)?)
}

/// Request target for a queue: `/api/queues/{vhost}/{queue}`, both
/// segments percent-encoded (the default vhost `/` becomes `%2F`).
pub fn queue_path(vhost: &str, queue: &str) -> String {
    format!(
        "/api/queues/{}/{}",
        urlencoding::encode(vhost),
        urlencoding::encode(queue)
    )
}

fn basic_auth(user: &str, password: &str) -> String {
    format!("Basic {}", STANDARD.encode(format!("{user}:{password}")))
}

/// Everything one poll needs; shared with the background loop.
struct Poller {
    config: BrokerConfig,
    address: String,
    authorization: String,
    target_response_time: f64,
    tracker: ProcessingTimeTracker,
    snapshot: SnapshotCell,
}

impl Poller {
    async fn poll(&self) -> MetricsSnapshot {
        let mut pending_messages: u64 = 0;
        let mut arrival_rate = 0.0;

        for queue in &self.config.queues {
            let path = queue_path(&self.config.vhost, queue);
            match fetch_queue_stats(
                &self.address,
                &path,
                &self.authorization,
                self.config.metrics_timeout,
            )
            .await
            {
                Ok(stats) => {
                    pending_messages = pending_messages.saturating_add(stats.messages_ready);
                    arrival_rate += stats.publish_rate();
                }
                Err(e) => {
                    warn!(%queue, address = %self.address, error = %e, "failed to fetch queue metrics");
                }
            }
        }

        let snapshot = MetricsSnapshot {
            pending_messages,
            arrival_rate,
            processing_time: self.tracker.average(),
            target_response_time: self.target_response_time,
            epoch: epoch_secs(),
        };
        self.snapshot.publish(snapshot);

        debug!(
            pending = snapshot.pending_messages,
            rate = snapshot.arrival_rate,
            processing_time = snapshot.processing_time,
            "metrics snapshot published"
        );
        snapshot
    }

    async fn run(self: Arc<Self>, mut shutdown: tokio::sync::watch::Receiver<bool>) {
        info!(
            address = %self.address,
            queues = ?self.config.queues,
            interval_ms = self.config.poll_interval.as_millis() as u64,
            "broker monitor started"
        );

        loop {
            tokio::select! {
                _ = self.poll() => {}
                _ = shutdown.changed() => break,
            }
            tokio::select! {
                _ = tokio::time::sleep(self.config.poll_interval) => {}
                _ = shutdown.changed() => break,
            }
        }

        info!("broker monitor shutting down");
    }
}

/// Polls a RabbitMQ-style management API on its own schedule.
pub struct BrokerMonitor {
    poller: Arc<Poller>,
    stop_grace: Duration,
    task: Mutex<Option<LoopTask>>,
}

impl BrokerMonitor {
    /// Create a monitor. `target_response_time` is copied into every
    /// snapshot.
    pub fn new(
        config: BrokerConfig,
        tracker: ProcessingTimeTracker,
        target_response_time: Duration,
    ) -> Self {
        let address = config.address();
        let authorization = basic_auth(&config.user, &config.password);
        Self {
            poller: Arc::new(Poller {
                config,
                address,
                authorization,
                target_response_time: target_response_time.as_secs_f64(),
                tracker,
                snapshot: SnapshotCell::new(),
            }),
            stop_grace: DEFAULT_STOP_GRACE,
            task: Mutex::new(None),
        }
    }

    /// Set how long `stop()` waits before aborting the poll loop.
    pub fn with_stop_grace(mut self, grace: Duration) -> Self {
        self.stop_grace = grace;
        self
    }

    /// Handle to the published snapshot.
    pub fn snapshot_cell(&self) -> SnapshotCell {
        self.poller.snapshot.clone()
    }

    pub fn tracker(&self) -> &ProcessingTimeTracker {
        &self.poller.tracker
    }

    /// Poll every queue once and publish the result.
    pub async fn poll(&self) -> MetricsSnapshot {
        self.poller.poll().await
    }

    /// Start the background poll loop. Returns `false` if it is already
    /// running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let poller = self.poller.clone();
        *task = Some(LoopTask::spawn("broker-monitor", move |shutdown| {
            poller.run(shutdown)
        }));
        true
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    /// Stop the poll loop. Safe to call repeatedly.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(task) = task {
            task.shutdown(self.stop_grace).await;
        }
    }
}

impl QueueMetricsSource for BrokerMonitor {
    fn get_metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.poller.snapshot.latest()
    }
}
