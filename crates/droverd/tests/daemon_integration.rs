//! Daemon integration tests.
//!
//! Runs the full monitor → controller → pool chain against an in-process
//! fake management API, with real `sleep` processes as workers, and
//! drives the status API through the router.

#![cfg(unix)]

use std::time::Duration;

use axum::body::{Body, to_bytes};
use axum::http::{Request, StatusCode};
use tower::ServiceExt;

use drover_core::{BrokerConfig, DroverConfig, ScalerConfig, TrackerConfig, WorkerConfig};
use drover_pool::WorkerPool;
use drover_telemetry::QueueMetricsSource;
use drover_telemetry::fake_broker::FakeBroker;
use droverd::Daemon;

fn test_config(broker: &FakeBroker, program: &str) -> DroverConfig {
    DroverConfig {
        scaler: ScalerConfig {
            tick_interval: Duration::from_millis(100),
            max_workers: 5,
            target_response_time: Duration::from_secs(1),
            stop_grace: Duration::from_secs(1),
        },
        broker: BrokerConfig {
            host: broker.address().ip().to_string(),
            port: broker.address().port(),
            queues: vec!["jobs".to_string()],
            poll_interval: Duration::from_millis(20),
            metrics_timeout: Duration::from_millis(500),
            ..BrokerConfig::default()
        },
        tracker: TrackerConfig { window_capacity: 50 },
        worker: WorkerConfig {
            program: program.to_string(),
            args: vec!["30".to_string()],
            initial_workers: 1,
            ..WorkerConfig::default()
        },
    }
}

async fn wait_for_workers(daemon: &Daemon, expected: u32) -> bool {
    for _ in 0..100 {
        if daemon.pool.count() == expected {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    false
}

async fn get_json(daemon: &Daemon, uri: &str) -> serde_json::Value {
    let req = Request::builder().uri(uri).body(Body::empty()).unwrap();
    let resp = daemon.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn scales_up_and_down_with_backlog() {
    let broker = FakeBroker::start().await.unwrap();
    broker.set_queue("jobs", 3, 0.0);

    let daemon = Daemon::build(test_config(&broker, "sleep")).unwrap();
    daemon.start().unwrap();
    assert_eq!(daemon.pool.count(), 1);

    // ceil((3 + 0) / 1) = 3
    assert!(wait_for_workers(&daemon, 3).await, "pool never reached 3 workers");

    // Backlog far above capacity is clamped to max_workers.
    broker.set_queue("jobs", 500, 20.0);
    assert!(wait_for_workers(&daemon, 5).await, "pool never reached max_workers");

    // Drained queue falls back to a single consumer.
    broker.set_queue("jobs", 0, 0.0);
    assert!(wait_for_workers(&daemon, 1).await, "pool never scaled down to 1");

    daemon.shutdown().await;
    assert_eq!(daemon.pool.count(), 0);
    assert!(!daemon.controller.is_running());
    assert!(!daemon.monitor.is_running());
}

#[tokio::test]
async fn status_api_reports_live_state() {
    let broker = FakeBroker::start().await.unwrap();
    broker.set_queue("jobs", 2, 0.0);

    let daemon = Daemon::build(test_config(&broker, "sleep")).unwrap();
    daemon.start().unwrap();
    assert!(wait_for_workers(&daemon, 2).await);

    let json = get_json(&daemon, "/api/v1/status").await;
    assert_eq!(json["success"], true);
    assert_eq!(json["data"]["snapshot"]["pending_messages"], 2);
    assert_eq!(json["data"]["required"], 2);
    assert_eq!(json["data"]["workers"], 2);
    assert_eq!(json["data"]["pids"].as_array().unwrap().len(), 2);
    assert_eq!(json["data"]["controller_running"], true);
    assert!(json["data"]["ticks"].as_u64().unwrap() >= 1);

    let req = Request::builder().uri("/metrics").body(Body::empty()).unwrap();
    let resp = daemon.router().oneshot(req).await.unwrap();
    let text = String::from_utf8(to_bytes(resp.into_body(), usize::MAX).await.unwrap().to_vec()).unwrap();
    assert!(text.contains("drover_pending_messages 2"));
    assert!(text.contains("drover_workers 2"));

    daemon.shutdown().await;
}

#[tokio::test]
async fn ingested_processing_times_drive_capacity() {
    let broker = FakeBroker::start().await.unwrap();
    broker.set_queue("jobs", 8, 0.0);

    let daemon = Daemon::build(test_config(&broker, "sleep")).unwrap();
    daemon.start().unwrap();

    // Workers finish a task every 0.25s, so ceil(8 · 0.25) = 2 suffice.
    let req = Request::builder()
        .method("POST")
        .uri("/api/v1/processing-time")
        .header("content-type", "application/json")
        .body(Body::from(r#"{"samples": [0.25, 0.25, 0.25]}"#))
        .unwrap();
    let resp = daemon.router().oneshot(req).await.unwrap();
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(daemon.tracker.len(), 3);

    let mut seen = false;
    for _ in 0..100 {
        if daemon
            .monitor
            .get_metrics()
            .is_some_and(|s| s.processing_time == 0.25)
        {
            seen = true;
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(seen, "snapshot never picked up the ingested samples");
    assert!(wait_for_workers(&daemon, 2).await);

    daemon.shutdown().await;
}

#[tokio::test]
async fn unreachable_broker_keeps_one_worker() {
    let broker = FakeBroker::start().await.unwrap();
    let mut config = test_config(&broker, "sleep");
    config.broker.port = 1;
    config.broker.metrics_timeout = Duration::from_millis(100);
    config.worker.initial_workers = 3;

    let daemon = Daemon::build(config).unwrap();
    daemon.start().unwrap();

    // Every queue contributes zero, so the controller settles on one worker.
    assert!(wait_for_workers(&daemon, 1).await);
    assert!(daemon.controller.is_running());

    daemon.shutdown().await;
}

#[tokio::test]
async fn spawn_failure_at_startup_is_reported() {
    let broker = FakeBroker::start().await.unwrap();
    let daemon = Daemon::build(test_config(&broker, "/nonexistent/drover-worker")).unwrap();

    let err = daemon.start().unwrap_err();
    assert!(format!("{err:#}").contains("starting initial workers"));
    assert_eq!(daemon.pool.count(), 0);

    daemon.shutdown().await;
}

#[test]
fn build_rejects_invalid_config() {
    let config = DroverConfig::default();
    let err = Daemon::build(config).err().unwrap();
    assert!(format!("{err:#}").contains("worker.program"));
}

#[tokio::test]
async fn config_file_drives_daemon() {
    let broker = FakeBroker::start().await.unwrap();
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("drover.toml");

    test_config(&broker, "sleep").write_to(&path).unwrap();
    let loaded = DroverConfig::from_file(&path).unwrap();
    assert_eq!(loaded.scaler.tick_interval, Duration::from_millis(100));

    let daemon = Daemon::build(loaded).unwrap();
    assert_eq!(daemon.controller.config().max_workers, 5);
}
