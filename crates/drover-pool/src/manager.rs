//! Worker pool manager: owns the live worker processes.
//!
//! Records are kept in spawn order; `pop()` always removes the newest.
//! Terminated children are dropped without waiting and reaped by the
//! tokio runtime in the background.

use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Instant;

use tokio::process::Child;
use tracing::{debug, info, warn};

use crate::command::WorkerCommand;
use crate::error::PoolError;

/// The operations the controller needs from a pool.
pub trait WorkerPool: Send + Sync {
    /// Start one worker and return its pid.
    fn push(&self) -> Result<u32, PoolError>;

    /// Stop the most recently started worker. Returns its pid, or `None`
    /// if the pool was empty.
    fn pop(&self) -> Option<u32>;

    /// Stop every worker. Returns how many were tracked.
    fn pop_all(&self) -> usize;

    /// Number of tracked workers.
    fn count(&self) -> u32;
}

struct WorkerRecord {
    child: Child,
    pid: u32,
    started_at: Instant,
}

#[derive(Default)]
struct PoolState {
    workers: Vec<WorkerRecord>,
    /// Pool size observed after each push/pop since the last
    /// `get_statistics()` call.
    samples: Vec<u32>,
    /// Monotonic spawn counter, exported to workers as their index.
    spawned: u64,
}

impl PoolState {
    fn observe(&mut self) {
        let len = self.workers.len() as u32;
        self.samples.push(len);
    }
}

/// Spawns and terminates worker processes from a single `WorkerCommand`.
pub struct WorkerPoolManager {
    command: WorkerCommand,
    state: Mutex<PoolState>,
}

impl WorkerPoolManager {
    pub fn new(command: WorkerCommand) -> Self {
        Self {
            command,
            state: Mutex::new(PoolState::default()),
        }
    }

    /// Pids of tracked workers, oldest first.
    pub fn pids(&self) -> Vec<u32> {
        self.lock().workers.iter().map(|w| w.pid).collect()
    }

    /// Smoothed pool size for reporting.
    ///
    /// Returns the ceiling of the mean of the sizes observed since the
    /// previous call (0 if none), then keeps only the latest observation.
    pub fn get_statistics(&self) -> u32 {
        let mut state = self.lock();
        if state.samples.is_empty() {
            return 0;
        }

        let sum: u64 = state.samples.iter().map(|&s| u64::from(s)).sum();
        let avg = sum.div_ceil(state.samples.len() as u64) as u32;

        let start = state.samples.len() - 1;
        state.samples.drain(..start);
        avg
    }

    fn lock(&self) -> MutexGuard<'_, PoolState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl WorkerPool for WorkerPoolManager {
    fn push(&self) -> Result<u32, PoolError> {
        let mut state = self.lock();
        let index = state.spawned;

        let mut child = self
            .command
            .build(index)
            .spawn()
            .map_err(|source| PoolError::Spawn {
                program: self.command.program.clone(),
                source,
            })?;
        let pid = child_pid(&mut child, &self.command.program)?;

        state.spawned += 1;
        state.workers.push(WorkerRecord {
            child,
            pid,
            started_at: Instant::now(),
        });
        state.observe();

        info!(pid, index, workers = state.workers.len(), "worker started");
        Ok(pid)
    }

    fn pop(&self) -> Option<u32> {
        let mut state = self.lock();
        let mut record = state.workers.pop()?;
        terminate(&mut record);
        state.observe();

        info!(pid = record.pid, workers = state.workers.len(), "worker stopped");
        Some(record.pid)
    }

    fn pop_all(&self) -> usize {
        let mut state = self.lock();
        let drained = state.workers.len();
        while let Some(mut record) = state.workers.pop() {
            terminate(&mut record);
        }
        if drained > 0 {
            state.observe();
        }

        info!(drained, "all workers stopped");
        drained
    }

    fn count(&self) -> u32 {
        self.lock().workers.len() as u32
    }
}

impl Drop for WorkerPoolManager {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        if !state.workers.is_empty() {
            debug!(workers = state.workers.len(), "pool dropped with live workers, terminating");
        }
        while let Some(mut record) = state.workers.pop() {
            terminate(&mut record);
        }
    }
}

/// Pid of a freshly spawned child.
///
/// A child without a pid is killed rather than left running untracked.
fn child_pid(child: &mut Child, program: &str) -> Result<u32, PoolError> {
    match child.id() {
        Some(pid) => Ok(pid),
        None => {
            if let Err(e) = child.start_kill() {
                debug!(program, error = %e, "kill of pid-less worker failed");
            }
            Err(PoolError::NoPid {
                program: program.to_string(),
            })
        }
    }
}

/// Ask a worker to exit gracefully.
///
/// A worker that has already exited is left alone; that is not an error.
fn terminate(record: &mut WorkerRecord) {
    let uptime_ms = record.started_at.elapsed().as_millis() as u64;

    match record.child.try_wait() {
        Ok(Some(status)) => {
            debug!(pid = record.pid, %status, uptime_ms, "worker already exited");
            return;
        }
        Ok(None) => {}
        Err(e) => {
            debug!(pid = record.pid, error = %e, "could not query worker status");
        }
    }

    #[cfg(unix)]
    {
        // SAFETY: kill(2) has no memory-safety preconditions. The child is
        // still unreaped, so its pid cannot have been recycled.
        let rc = unsafe { libc::kill(record.pid as libc::pid_t, libc::SIGTERM) };
        if rc != 0 {
            let err = std::io::Error::last_os_error();
            if err.raw_os_error() == Some(libc::ESRCH) {
                debug!(pid = record.pid, "worker vanished before SIGTERM");
            } else {
                warn!(pid = record.pid, error = %err, "failed to signal worker");
            }
            return;
        }
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = record.child.start_kill() {
            debug!(pid = record.pid, error = %e, "worker already gone");
            return;
        }
    }

    debug!(pid = record.pid, uptime_ms, "termination requested");
}
