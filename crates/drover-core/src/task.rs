//! Background loop handle with cooperative shutdown and a forced abort.

use std::future::Future;
use std::time::Duration;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// A spawned loop plus the watch channel used to ask it to stop.
pub struct LoopTask {
    name: &'static str,
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
}

impl LoopTask {
    /// Spawn `body` on the tokio runtime, handing it the shutdown receiver.
    pub fn spawn<F, Fut>(name: &'static str, body: F) -> Self
    where
        F: FnOnce(watch::Receiver<bool>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(body(shutdown_rx));
        debug!(task = name, "background loop spawned");
        Self {
            name,
            handle,
            shutdown_tx,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Signal the loop, wait up to `grace`, then abort it.
    ///
    /// Returns `true` if the loop exited on its own.
    pub async fn shutdown(self, grace: Duration) -> bool {
        let _ = self.shutdown_tx.send(true);
        let mut handle = self.handle;

        match tokio::time::timeout(grace, &mut handle).await {
            Ok(_) => {
                debug!(task = self.name, "background loop exited");
                true
            }
            Err(_) => {
                warn!(
                    task = self.name,
                    grace_ms = grace.as_millis() as u64,
                    "background loop did not exit in time, aborting"
                );
                handle.abort();
                false
            }
        }
    }
}
