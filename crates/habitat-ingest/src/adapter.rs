//! The common capability of every ingestion adapter.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use habitat_core::SensorHub;

/// A source of producer registrations and readings.
///
/// `start` spawns whatever background tasks the adapter needs and must be
/// called from within a Tokio runtime. The adapter derives a child token
/// from `cancel`, so cancelling the parent stops every adapter while
/// [`AdapterHandle::stop`] stops just this one.
pub trait Adapter: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &'static str;

    /// Begin feeding `hub`.
    fn start(&self, hub: Arc<SensorHub>, cancel: &CancellationToken) -> AdapterHandle;
}

/// A running adapter's tasks and cancellation token.
#[derive(Debug)]
pub struct AdapterHandle {
    name: &'static str,
    cancel: CancellationToken,
    tasks: Vec<JoinHandle<()>>,
}

impl AdapterHandle {
    /// Wrap spawned tasks.
    pub const fn new(name: &'static str, cancel: CancellationToken, tasks: Vec<JoinHandle<()>>) -> Self {
        Self {
            name,
            cancel,
            tasks,
        }
    }

    /// Adapter name.
    pub const fn name(&self) -> &'static str {
        self.name
    }

    /// Number of background tasks.
    pub fn task_count(&self) -> usize {
        self.tasks.len()
    }

    /// Whether every task has exited.
    pub fn is_finished(&self) -> bool {
        self.tasks.iter().all(JoinHandle::is_finished)
    }

    /// Cancel the adapter and wait for its tasks to exit.
    pub async fn stop(self) {
        self.cancel.cancel();
        for task in self.tasks {
            if let Err(e) = task.await {
                warn!(adapter = self.name, error = %e, "Adapter task ended abnormally");
            }
        }
        info!(adapter = self.name, "Adapter stopped");
    }
}
