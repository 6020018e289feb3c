//! Sliding window of task processing times.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::debug;

/// Average reported while no samples have been recorded.
///
/// Keeps the capacity estimate defined on a cold start.
pub const DEFAULT_AVERAGE: f64 = 1.0;

pub const DEFAULT_CAPACITY: usize = 500;

/// Bounded FIFO of per-task durations (seconds), shared by every writer.
///
/// Cloning yields another handle to the same window.
#[derive(Debug, Clone)]
pub struct ProcessingTimeTracker {
    window: Arc<Mutex<VecDeque<f64>>>,
    capacity: usize,
}

impl Default for ProcessingTimeTracker {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

impl ProcessingTimeTracker {
    /// Create a tracker retaining at most `capacity` samples (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            window: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
            capacity,
        }
    }

    /// Record one task duration in seconds.
    ///
    /// Negative and non-finite samples are dropped; returns whether the
    /// sample was kept.
    pub fn record(&self, seconds: f64) -> bool {
        if !seconds.is_finite() || seconds < 0.0 {
            debug!(seconds, "ignoring invalid processing-time sample");
            return false;
        }

        let mut window = self.lock();
        if window.len() >= self.capacity {
            window.pop_front();
        }
        window.push_back(seconds);
        true
    }

    /// Arithmetic mean of the window, or `DEFAULT_AVERAGE` when empty.
    pub fn average(&self) -> f64 {
        let window = self.lock();
        if window.is_empty() {
            return DEFAULT_AVERAGE;
        }
        window.iter().sum::<f64>() / window.len() as f64
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Copy of the current samples, oldest first.
    pub fn samples(&self) -> Vec<f64> {
        self.lock().iter().copied().collect()
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<f64>> {
        self.window.lock().unwrap_or_else(PoisonError::into_inner)
    }
}
