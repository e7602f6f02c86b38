// src/exec/backend.rs

//! Pluggable executor backend abstraction.
//!
//! The runtime talks to an `ExecutorBackend` instead of spawning processes
//! itself. This makes it easy to swap in a fake executor in tests while
//! keeping the production implementation in [`task_runner`](super::task_runner).
//!
//! - `RealExecutorBackend` is the default implementation used by `flowdag`.
//!   Every scheduled task runs in its own Tokio task, optionally bounded by
//!   a concurrency limit.
//! - Tests can provide their own `ExecutorBackend` that, for example, records
//!   which tasks were scheduled and directly emits `TaskCompleted` events.

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{mpsc, Semaphore};
use tracing::debug;

use crate::dag::ScheduledTask;
use crate::engine::RuntimeEvent;
use crate::errors::Result;

use super::task_runner::run_task;

/// Trait abstracting how scheduled tasks are executed.
///
/// Production code uses [`RealExecutorBackend`]; tests can provide their own
/// implementation that doesn't spawn real processes.
pub trait ExecutorBackend: Send {
    /// Dispatch the given tasks for execution.
    ///
    /// Must not wait for the tasks to finish; completions come back as
    /// `RuntimeEvent::TaskCompleted`.
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>>;
}

/// Real executor backend used in production.
pub struct RealExecutorBackend {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    limit: Option<Arc<Semaphore>>,
}

impl RealExecutorBackend {
    /// Create a backend reporting completions to `runtime_tx`.
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>) -> Self {
        Self {
            runtime_tx,
            limit: None,
        }
    }

    /// Run at most `n` jobs at the same time. `0` means unbounded.
    pub fn with_max_parallel(mut self, n: usize) -> Self {
        self.limit = (n > 0).then(|| Arc::new(Semaphore::new(n)));
        self
    }
}

impl ExecutorBackend for RealExecutorBackend {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        // Clone what the spawned jobs need so they don't borrow `self`.
        let tx = self.runtime_tx.clone();
        let limit = self.limit.clone();

        Box::pin(async move {
            for task in tasks {
                let tx = tx.clone();
                let limit = limit.clone();
                debug!(task = %task.label, "dispatching task");
                tokio::spawn(async move {
                    // Held until the job finishes; a closed semaphore just
                    // means unbounded.
                    let _permit = match limit {
                        Some(sem) => sem.acquire_owned().await.ok(),
                        None => None,
                    };
                    run_task(task, tx).await;
                });
            }
            Ok(())
        })
    }
}
