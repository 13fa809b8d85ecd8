//! Background task bookkeeping.
//!
//! Check runs and recovery cycles are spawned here so shutdown can wait for
//! them instead of cancelling them halfway through an external mutation.

use std::future::Future;

use parking_lot::Mutex;
use tokio::task::JoinSet;
use tracing::error;

/// Set of detached tasks that can be drained on shutdown.
#[derive(Default)]
pub struct TaskSet {
    tasks: Mutex<JoinSet<()>>,
}

impl TaskSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Spawn a task, reaping any that already finished.
    pub fn spawn<F>(&self, task: F)
    where
        F: Future<Output = ()> + Send + 'static,
    {
        let mut tasks = self.tasks.lock();
        while let Some(finished) = tasks.try_join_next() {
            if let Err(e) = finished {
                error!(error = %e, "Background task panicked");
            }
        }
        tasks.spawn(task);
    }

    /// Number of tasks not yet reaped.
    pub fn len(&self) -> usize {
        self.tasks.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.lock().is_empty()
    }

    /// Wait for every task, including ones spawned while draining.
    pub async fn drain(&self) {
        loop {
            let mut batch = std::mem::take(&mut *self.tasks.lock());
            if batch.is_empty() {
                return;
            }
            while let Some(finished) = batch.join_next().await {
                if let Err(e) = finished {
                    error!(error = %e, "Background task panicked");
                }
            }
        }
    }
}
