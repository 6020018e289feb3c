//! The metrics-source seam and the atomically swapped snapshot cell.

use std::sync::{Arc, PoisonError, RwLock};

use drover_core::MetricsSnapshot;

/// Anything that can hand the controller the latest broker snapshot.
///
/// Implementations must return a complete snapshot or `None` if nothing
/// has been published yet; they must not block on network I/O.
pub trait QueueMetricsSource: Send + Sync {
    fn get_metrics(&self) -> Option<Arc<MetricsSnapshot>>;
}

/// Holds the most recently published snapshot.
///
/// Publishing replaces the whole `Arc` under a write lock, so readers see
/// either the previous snapshot or the new one, never a mix.
#[derive(Debug, Clone, Default)]
pub struct SnapshotCell {
    current: Arc<RwLock<Option<Arc<MetricsSnapshot>>>>,
}

impl SnapshotCell {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn publish(&self, snapshot: MetricsSnapshot) {
        let next = Arc::new(snapshot);
        let mut current = self.current.write().unwrap_or_else(PoisonError::into_inner);
        *current = Some(next);
    }

    pub fn latest(&self) -> Option<Arc<MetricsSnapshot>> {
        self.current
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl QueueMetricsSource for SnapshotCell {
    fn get_metrics(&self) -> Option<Arc<MetricsSnapshot>> {
        self.latest()
    }
}
