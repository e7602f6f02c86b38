use std::collections::{BTreeMap, BTreeSet};
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use flowdag::dag::ScheduledTask;
use flowdag::engine::{RuntimeEvent, TaskOutcome};
use flowdag::errors::Result;
use flowdag::exec::ExecutorBackend;
use tokio::sync::mpsc;

/// Which tasks misbehave, by qualified label (`work.task`).
#[derive(Debug, Clone, Default)]
pub struct FakeScript {
    /// Report `Failed` for these.
    pub fail: BTreeSet<String>,
    /// Report `Success` but leave no outputs behind.
    pub no_outputs: BTreeSet<String>,
}

impl FakeScript {
    pub fn all_ok() -> Self {
        Self::default()
    }

    pub fn failing(mut self, label: &str) -> Self {
        self.fail.insert(label.to_string());
        self
    }

    pub fn without_outputs(mut self, label: &str) -> Self {
        self.no_outputs.insert(label.to_string());
        self
    }

    fn outcome_for(&self, task: &ScheduledTask) -> TaskOutcome {
        if self.fail.contains(&task.label) {
            TaskOutcome::Failed(format!("scripted failure of {}", task.label))
        } else if self.no_outputs.contains(&task.label) {
            TaskOutcome::Success(BTreeMap::new())
        } else {
            TaskOutcome::Success(task.outputs.iter().cloned().collect())
        }
    }
}

/// A fake executor that:
/// - records which tasks were handed to it, by qualified label
/// - never touches the filesystem; declared outputs are reported at the
///   paths the flow expects them
/// - immediately reports a `TaskCompleted` per task, as scripted.
pub struct FakeExecutor {
    runtime_tx: mpsc::Sender<RuntimeEvent>,
    script: FakeScript,
    executed: Arc<Mutex<Vec<String>>>,
}

impl FakeExecutor {
    pub fn new(runtime_tx: mpsc::Sender<RuntimeEvent>, script: FakeScript) -> Self {
        Self {
            runtime_tx,
            script,
            executed: Arc::new(Mutex::new(Vec::new())),
        }
    }

    /// Shared handle to the dispatch log.
    pub fn executed(&self) -> Arc<Mutex<Vec<String>>> {
        Arc::clone(&self.executed)
    }
}

impl ExecutorBackend for FakeExecutor {
    fn spawn_ready_tasks(
        &mut self,
        tasks: Vec<ScheduledTask>,
    ) -> Pin<Box<dyn Future<Output = Result<()>> + Send + '_>> {
        let tx = self.runtime_tx.clone();
        let executed = Arc::clone(&self.executed);
        let script = self.script.clone();

        Box::pin(async move {
            for t in tasks {
                executed
                    .lock()
                    .expect("executed lock poisoned")
                    .push(t.label.clone());

                let outcome = script.outcome_for(&t);
                tx.send(RuntimeEvent::TaskCompleted { task: t.id, outcome })
                    .await
                    .map_err(anyhow::Error::from)?;
            }
            Ok(())
        })
    }
}
