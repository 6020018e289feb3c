//! Daemon wiring: builds every subsystem from one `DroverConfig` and
//! owns their start/stop order.

use std::sync::Arc;

use anyhow::Context;
use axum::Router;
use tracing::info;

use drover_api::ApiState;
use drover_autoscale::{ControllerConfig, ScalingController};
use drover_core::DroverConfig;
use drover_pool::{WorkerCommand, WorkerPool, WorkerPoolManager};
use drover_telemetry::{BrokerMonitor, ProcessingTimeTracker};

pub struct Daemon {
    pub config: DroverConfig,
    pub tracker: ProcessingTimeTracker,
    pub monitor: Arc<BrokerMonitor>,
    pub pool: Arc<WorkerPoolManager>,
    pub controller: Arc<ScalingController>,
}

impl Daemon {
    /// Validate `config` and construct every subsystem, stopped.
    pub fn build(config: DroverConfig) -> anyhow::Result<Self> {
        config.validate().context("invalid configuration")?;

        let tracker = ProcessingTimeTracker::new(config.tracker.window_capacity);
        info!(capacity = tracker.capacity(), "processing-time tracker initialized");

        let monitor = Arc::new(
            BrokerMonitor::new(
                config.broker.clone(),
                tracker.clone(),
                config.scaler.target_response_time,
            )
            .with_stop_grace(config.scaler.stop_grace),
        );
        info!(address = %config.broker.address(), queues = ?config.broker.queues, "broker monitor initialized");

        let pool = Arc::new(WorkerPoolManager::new(WorkerCommand::from(&config.worker)));
        info!(program = %config.worker.program, "worker pool initialized");

        let controller = Arc::new(ScalingController::new(
            monitor.clone(),
            pool.clone(),
            ControllerConfig::from(&config.scaler),
        ));
        info!(
            max_workers = config.scaler.max_workers,
            interval_ms = config.scaler.tick_interval.as_millis() as u64,
            "scaling controller initialized"
        );

        Ok(Self {
            config,
            tracker,
            monitor,
            pool,
            controller,
        })
    }

    /// Router for the status API.
    pub fn router(&self) -> Router {
        drover_api::build_router(ApiState {
            metrics: self.monitor.clone(),
            tracker: self.tracker.clone(),
            pool: self.pool.clone(),
            controller: self.controller.clone(),
        })
    }

    /// Start the initial workers, then the monitor, then the controller.
    pub fn start(&self) -> anyhow::Result<()> {
        for _ in 0..self.config.worker.initial_workers {
            self.pool.push().context("starting initial workers")?;
        }
        self.monitor.start();
        self.controller.start();

        info!(workers = self.pool.count(), "drover started");
        Ok(())
    }

    /// Stop the controller, then the monitor, then every worker.
    pub async fn shutdown(&self) {
        self.controller.stop().await;
        self.monitor.stop().await;
        let drained = self.pool.pop_all();
        info!(drained, "drover stopped");
    }
}
