//! Scaling controller: periodic worker-count reconciliation.
//!
//! Each tick reads the most recent snapshot from the metrics source,
//! computes the required worker count, and issues exactly the push/pop
//! delta needed to reach it. A failed tick is logged and the loop keeps
//! going.

use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use anyhow::Context;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use drover_core::{LoopTask, MetricsSnapshot, ScalerConfig, ScalingDecision};
use drover_pool::{PoolError, WorkerPool};
use drover_telemetry::QueueMetricsSource;

/// Controller timing and bounds.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ControllerConfig {
    pub tick_interval: Duration,
    pub max_workers: u32,
    pub stop_grace: Duration,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self::from(&ScalerConfig::default())
    }
}

impl From<&ScalerConfig> for ControllerConfig {
    fn from(config: &ScalerConfig) -> Self {
        Self {
            tick_interval: config.tick_interval,
            max_workers: config.max_workers,
            stop_grace: config.stop_grace,
        }
    }
}

/// Workers needed to absorb the backlog plus expected arrivals within
/// the target response time, clamped to `[1, max_workers]`.
pub fn calculate_required_workers(snapshot: &MetricsSnapshot, max_workers: u32) -> u32 {
    let max_workers = max_workers.max(1);

    let backlog = snapshot.pending_messages as f64;
    let arrival_rate = non_negative(snapshot.arrival_rate);
    let response_time = non_negative(snapshot.target_response_time);
    let capacity = snapshot.capacity_per_worker();

    let needed = ((backlog + arrival_rate * response_time) / capacity).ceil();

    if needed.is_nan() || needed < 1.0 {
        1
    } else if needed >= f64::from(max_workers) {
        max_workers
    } else {
        needed as u32
    }
}

fn non_negative(v: f64) -> f64 {
    if v.is_finite() && v > 0.0 { v } else { 0.0 }
}

/// State shared between the controller handle and its background loop.
struct ControllerCore {
    metrics: Arc<dyn QueueMetricsSource>,
    pool: Arc<dyn WorkerPool>,
    config: ControllerConfig,
    last_decision: Mutex<Option<ScalingDecision>>,
    ticks: AtomicU64,
}

impl ControllerCore {
    fn compute_once(&self) -> anyhow::Result<Option<ScalingDecision>> {
        let Some(snapshot) = self.metrics.get_metrics() else {
            debug!("no metrics published yet, skipping tick");
            return Ok(None);
        };

        let required = calculate_required_workers(&snapshot, self.config.max_workers);
        let current = self.pool.count();

        let decision = self
            .scale(current, required)
            .with_context(|| format!("scaling from {current} to {required} workers"))?;

        debug!(
            pending = snapshot.pending_messages,
            rate = snapshot.arrival_rate,
            processing_time = snapshot.processing_time,
            current,
            required,
            "scaling tick evaluated"
        );
        Ok(Some(decision))
    }

    fn scale(&self, current: u32, required: u32) -> Result<ScalingDecision, PoolError> {
        let decision = ScalingDecision::new(current, required);

        if required > current {
            info!(required, current, adding = decision.delta, "scaling up");
            for _ in current..required {
                self.pool.push()?;
            }
        } else if required < current {
            info!(required, current, removing = -decision.delta, "scaling down");
            for _ in required..current {
                self.pool.pop();
            }
        }

        *self
            .last_decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner) = Some(decision);
        Ok(decision)
    }

    /// One tick with failures and panics contained.
    fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
        match std::panic::catch_unwind(AssertUnwindSafe(|| self.compute_once())) {
            Ok(Ok(_)) => {}
            Ok(Err(e)) => error!(error = %format!("{e:#}"), "scaling tick failed"),
            Err(_) => error!("scaling tick panicked"),
        }
    }

    async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_ms = self.config.tick_interval.as_millis() as u64,
            max_workers = self.config.max_workers,
            "scaling controller started"
        );

        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.config.tick_interval) => {
                    self.tick();
                }
                _ = shutdown.changed() => {
                    info!("scaling controller shutting down");
                    break;
                }
            }
        }
    }
}

/// Sizes a worker pool from queue telemetry on a fixed tick.
///
/// STOPPED until `start()`, RUNNING until `stop()`. Both transitions are
/// idempotent and may be requested from any task.
pub struct ScalingController {
    core: Arc<ControllerCore>,
    task: Mutex<Option<LoopTask>>,
}

impl ScalingController {
    pub fn new(
        metrics: Arc<dyn QueueMetricsSource>,
        pool: Arc<dyn WorkerPool>,
        config: ControllerConfig,
    ) -> Self {
        Self {
            core: Arc::new(ControllerCore {
                metrics,
                pool,
                config,
                last_decision: Mutex::new(None),
                ticks: AtomicU64::new(0),
            }),
            task: Mutex::new(None),
        }
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.core.config
    }

    /// Required worker count for `snapshot` under this controller's bounds.
    pub fn calculate_required_workers(&self, snapshot: &MetricsSnapshot) -> u32 {
        calculate_required_workers(snapshot, self.core.config.max_workers)
    }

    /// Run one reconciliation pass.
    ///
    /// Returns `Ok(None)` without touching the pool when no snapshot has
    /// been published yet.
    pub fn compute_once(&self) -> anyhow::Result<Option<ScalingDecision>> {
        self.core.compute_once()
    }

    /// Move the pool from `current` to `required` in a single pass.
    ///
    /// Stops at the first spawn failure; the next tick observes the
    /// shortfall and tries again.
    pub fn scale(&self, current: u32, required: u32) -> Result<ScalingDecision, PoolError> {
        self.core.scale(current, required)
    }

    /// The decision applied by the most recent successful tick.
    pub fn last_decision(&self) -> Option<ScalingDecision> {
        *self
            .core
            .last_decision
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    /// Ticks started since construction.
    pub fn ticks(&self) -> u64 {
        self.core.ticks.load(Ordering::Relaxed)
    }

    /// Start the background loop. Returns `false` if already running.
    pub fn start(&self) -> bool {
        let mut task = self.task.lock().unwrap_or_else(PoisonError::into_inner);
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return false;
        }

        let core = self.core.clone();
        *task = Some(LoopTask::spawn("scaling-controller", move |shutdown| {
            core.run(shutdown)
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

    /// Stop the loop, waiting at most `stop_grace` before aborting it.
    pub async fn stop(&self) {
        let task = self
            .task
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        match task {
            Some(task) => {
                if !task.shutdown(self.core.config.stop_grace).await {
                    warn!("scaling controller aborted after grace period");
                }
            }
            None => debug!("scaling controller already stopped"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use drover_telemetry::SnapshotCell;

    /// Pool that only counts calls.
    #[derive(Default)]
    struct FakePool {
        workers: AtomicU32,
        pushes: AtomicU32,
        pops: AtomicU32,
        /// Fail every push once this many have succeeded.
        fail_after: Option<u32>,
    }

    impl FakePool {
        fn with_workers(n: u32) -> Self {
            let pool = Self::default();
            pool.workers.store(n, Ordering::SeqCst);
            pool
        }

        fn pushes(&self) -> u32 {
            self.pushes.load(Ordering::SeqCst)
        }

        fn pops(&self) -> u32 {
            self.pops.load(Ordering::SeqCst)
        }
    }

    impl WorkerPool for FakePool {
        fn push(&self) -> Result<u32, PoolError> {
            if let Some(limit) = self.fail_after
                && self.pushes.load(Ordering::SeqCst) >= limit
            {
                return Err(PoolError::Spawn {
                    program: "fake".to_string(),
                    source: std::io::Error::other("resource exhausted"),
                });
            }
            self.pushes.fetch_add(1, Ordering::SeqCst);
            Ok(self.workers.fetch_add(1, Ordering::SeqCst) + 1000)
        }

        fn pop(&self) -> Option<u32> {
            self.pops.fetch_add(1, Ordering::SeqCst);
            self.workers
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .ok()
        }

        fn pop_all(&self) -> usize {
            self.workers.swap(0, Ordering::SeqCst) as usize
        }

        fn count(&self) -> u32 {
            self.workers.load(Ordering::SeqCst)
        }
    }

    /// Source that panics on its first read.
    struct FlakySource {
        calls: AtomicU32,
        inner: SnapshotCell,
    }

    impl QueueMetricsSource for FlakySource {
        fn get_metrics(&self) -> Option<Arc<MetricsSnapshot>> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                panic!("telemetry backend exploded");
            }
            self.inner.get_metrics()
        }
    }

    fn snapshot(pending: u64, rate: f64, response: f64, processing: f64) -> MetricsSnapshot {
        MetricsSnapshot {
            pending_messages: pending,
            arrival_rate: rate,
            processing_time: processing,
            target_response_time: response,
            epoch: 1000,
        }
    }

    fn config(max_workers: u32) -> ControllerConfig {
        ControllerConfig {
            tick_interval: Duration::from_secs(5),
            max_workers,
            stop_grace: Duration::from_secs(3),
        }
    }

    fn controller(
        cell: &SnapshotCell,
        pool: &Arc<FakePool>,
        max_workers: u32,
    ) -> ScalingController {
        ScalingController::new(Arc::new(cell.clone()), pool.clone(), config(max_workers))
    }

    #[test]
    fn backlog_scenario_clamps_to_max() {
        // N = ceil((100 + 10·1) / 2) = 55 → clamped to 15.
        let snap = snapshot(100, 10.0, 1.0, 0.5);
        assert_eq!(calculate_required_workers(&snap, 15), 15);
        assert_eq!(calculate_required_workers(&snap, 100), 55);
    }

    #[test]
    fn idle_queue_keeps_one_worker() {
        let snap = snapshot(0, 0.0, 1.0, 1.0);
        assert_eq!(calculate_required_workers(&snap, 15), 1);
    }

    #[test]
    fn required_matches_formula_inside_clamp() {
        let max_workers = 50;
        for backlog in [0u64, 1, 7, 40, 250] {
            for rate in [0.0, 0.5, 3.0, 12.0] {
                for response in [0.1, 1.0, 2.5] {
                    for processing in [0.01, 0.2, 1.0, 3.0] {
                        let snap = snapshot(backlog, rate, response, processing);
                        let required = calculate_required_workers(&snap, max_workers);
                        assert!((1..=max_workers).contains(&required));

                        let exact = ((backlog as f64 + rate * response) / (1.0 / processing)).ceil();
                        if exact >= 1.0 && exact <= f64::from(max_workers) {
                            assert_eq!(required, exact as u32, "B={backlog} λ={rate} R={response} T={processing}");
                        }
                    }
                }
            }
        }
    }

    #[test]
    fn degenerate_inputs_stay_in_range() {
        // Zero processing time falls back to one task per second.
        assert_eq!(calculate_required_workers(&snapshot(3, 0.0, 1.0, 0.0), 15), 3);
        assert_eq!(calculate_required_workers(&snapshot(3, f64::NAN, 1.0, 1.0), 15), 3);
        assert_eq!(calculate_required_workers(&snapshot(0, -5.0, 1.0, 1.0), 15), 1);
        assert_eq!(calculate_required_workers(&snapshot(u64::MAX, 1.0, 1.0, 1e300), 15), 15);
        // A zero upper clamp still yields one worker.
        assert_eq!(calculate_required_workers(&snapshot(10, 0.0, 1.0, 1.0), 0), 1);
    }

    #[test]
    fn no_snapshot_means_no_action() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::with_workers(2));
        let ctl = controller(&cell, &pool, 15);

        assert_eq!(ctl.compute_once().unwrap(), None);
        assert_eq!(pool.pushes(), 0);
        assert_eq!(pool.pops(), 0);
        assert_eq!(ctl.last_decision(), None);
    }

    #[test]
    fn scale_down_pops_exactly_delta() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::with_workers(3));
        let ctl = controller(&cell, &pool, 15);

        let decision = ctl.scale(3, 1).unwrap();
        assert_eq!(decision, ScalingDecision::new(3, 1));
        assert_eq!(pool.pops(), 2);
        assert_eq!(pool.pushes(), 0);
        assert_eq!(pool.count(), 1);
    }

    #[test]
    fn scale_up_pushes_exactly_delta() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::with_workers(1));
        let ctl = controller(&cell, &pool, 15);

        ctl.scale(1, 4).unwrap();
        assert_eq!(pool.pushes(), 3);
        assert_eq!(pool.pops(), 0);
    }

    #[test]
    fn scale_at_target_is_a_noop() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::with_workers(4));
        let ctl = controller(&cell, &pool, 15);

        let decision = ctl.scale(4, 4).unwrap();
        assert!(decision.is_noop());
        assert_eq!(pool.pushes(), 0);
        assert_eq!(pool.pops(), 0);
    }

    #[test]
    fn compute_once_reaches_target_in_one_pass() {
        let cell = SnapshotCell::new();
        cell.publish(snapshot(100, 10.0, 1.0, 0.5));
        let pool = Arc::new(FakePool::with_workers(1));
        let ctl = controller(&cell, &pool, 15);

        let decision = ctl.compute_once().unwrap().unwrap();
        assert_eq!(decision.current, 1);
        assert_eq!(decision.required, 15);
        assert_eq!(pool.count(), 15);

        // A second tick against the same snapshot changes nothing.
        let decision = ctl.compute_once().unwrap().unwrap();
        assert!(decision.is_noop());
        assert_eq!(pool.pushes(), 14);
        assert_eq!(ctl.last_decision(), Some(decision));
    }

    #[test]
    fn spawn_failure_surfaces_from_tick() {
        let cell = SnapshotCell::new();
        cell.publish(snapshot(10, 0.0, 1.0, 1.0));
        let pool = Arc::new(FakePool {
            fail_after: Some(3),
            ..FakePool::default()
        });
        let ctl = controller(&cell, &pool, 15);

        let err = ctl.compute_once().unwrap_err();
        assert!(format!("{err:#}").contains("resource exhausted"));
        assert_eq!(pool.count(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn loop_ticks_on_interval() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::with_workers(1));
        let ctl = controller(&cell, &pool, 15);

        assert!(ctl.start());
        assert!(!ctl.start());
        assert!(ctl.is_running());

        // First tick: nothing published yet.
        tokio::time::sleep(Duration::from_millis(5_100)).await;
        assert_eq!(ctl.ticks(), 1);
        assert_eq!(pool.count(), 1);

        cell.publish(snapshot(6, 0.0, 1.0, 1.0));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(ctl.ticks(), 2);
        assert_eq!(pool.count(), 6);

        cell.publish(snapshot(2, 0.0, 1.0, 1.0));
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(pool.count(), 2);

        ctl.stop().await;
        assert!(!ctl.is_running());
    }

    #[tokio::test(start_paused = true)]
    async fn failing_ticks_do_not_stop_the_loop() {
        let cell = SnapshotCell::new();
        cell.publish(snapshot(5, 0.0, 1.0, 1.0));
        let pool = Arc::new(FakePool {
            fail_after: Some(0),
            ..FakePool::default()
        });
        let ctl = controller(&cell, &pool, 15);

        ctl.start();
        tokio::time::sleep(Duration::from_millis(15_100)).await;

        assert_eq!(ctl.ticks(), 3);
        assert!(ctl.is_running());
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn panicking_source_does_not_stop_the_loop() {
        let cell = SnapshotCell::new();
        cell.publish(snapshot(4, 0.0, 1.0, 1.0));
        let source = Arc::new(FlakySource {
            calls: AtomicU32::new(0),
            inner: cell,
        });
        let pool = Arc::new(FakePool::default());
        let ctl = ScalingController::new(source, pool.clone(), config(15));

        ctl.start();
        tokio::time::sleep(Duration::from_millis(10_100)).await;

        assert!(ctl.is_running());
        assert_eq!(pool.count(), 4);
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_idempotent_and_restartable() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::default());
        let ctl = controller(&cell, &pool, 15);

        ctl.stop().await;
        ctl.start();
        ctl.stop().await;
        ctl.stop().await;
        assert!(!ctl.is_running());

        assert!(ctl.start());
        assert!(ctl.is_running());
        ctl.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn stop_is_prompt_mid_interval() {
        let cell = SnapshotCell::new();
        let pool = Arc::new(FakePool::default());
        let ctl = controller(&cell, &pool, 15);

        ctl.start();
        tokio::time::sleep(Duration::from_secs(1)).await;

        let started = tokio::time::Instant::now();
        ctl.stop().await;
        assert!(started.elapsed() < Duration::from_secs(1));
        assert_eq!(ctl.ticks(), 0);
    }
}
