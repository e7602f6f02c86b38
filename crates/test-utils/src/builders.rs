use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use flowdag::config::{
    ConfigFile, ConfigSection, DepConfig, FinishConfig, RawConfigFile, TaskConfig, WorkConfig,
};
use flowdag::dag::{Artifact, Deps, JobSpec, Vars};
use flowdag::errors::Result;
use flowdag::flow::{FinishContext, Finisher, Flow, OnAllOk, WorkResult};
use flowdag::types::{TaskId, TaskKind, WorkId};
use serde_json::Value;

/// Builder for `ConfigFile` to simplify test setup.
pub struct PlanBuilder {
    config: RawConfigFile,
}

impl PlanBuilder {
    pub fn new() -> Self {
        Self {
            config: RawConfigFile {
                config: ConfigSection::default(),
                work: BTreeMap::new(),
            },
        }
    }

    pub fn workdir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.config.workdir = dir.into();
        self
    }

    pub fn lazy_artifact_check(mut self) -> Self {
        self.config.config.eager_artifact_check = false;
        self
    }

    pub fn work(mut self, name: &str, finish: FinishConfig) -> Self {
        self.config
            .work
            .entry(name.to_string())
            .or_insert_with(|| WorkConfig {
                finish: FinishConfig::Noop,
                task: BTreeMap::new(),
            })
            .finish = finish;
        self
    }

    /// Add a task, creating its work with a no-op finisher if needed.
    pub fn task(mut self, work: &str, name: &str, task: TaskConfig) -> Self {
        self.config
            .work
            .entry(work.to_string())
            .or_insert_with(|| WorkConfig {
                finish: FinishConfig::Noop,
                task: BTreeMap::new(),
            })
            .task
            .insert(name.to_string(), task);
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn try_build(self) -> Result<ConfigFile> {
        ConfigFile::try_from(self.config)
    }

    pub fn build(self) -> ConfigFile {
        self.try_build()
            .expect("Failed to build valid config from builder")
    }
}

impl Default for PlanBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Builder for `TaskConfig`.
pub struct TaskConfigBuilder {
    task: TaskConfig,
}

impl TaskConfigBuilder {
    pub fn new(kind: TaskKind) -> Self {
        Self {
            task: TaskConfig {
                kind,
                cmd: None,
                outputs: None,
                vars: Vars::new(),
                deps: Vec::new(),
                dedup: Vec::new(),
                reduced: Vec::new(),
            },
        }
    }

    /// A `generic` task declaring `outputs`.
    pub fn generic(outputs: &[&str]) -> Self {
        Self::new(TaskKind::Generic).outputs(outputs)
    }

    pub fn cmd(mut self, cmd: &str) -> Self {
        self.task.cmd = Some(cmd.to_string());
        self
    }

    pub fn outputs(mut self, outputs: &[&str]) -> Self {
        self.task.outputs = Some(outputs.iter().map(|o| o.to_string()).collect());
        self
    }

    pub fn dep(mut self, producer: &str, artifacts: &[&str]) -> Self {
        self.task.deps.push(DepConfig {
            producer: producer.to_string(),
            artifacts: artifacts.iter().map(|a| a.to_string()).collect(),
        });
        self
    }

    pub fn var(mut self, key: &str, value: Value) -> Self {
        self.task.vars.insert(key.to_string(), value);
        self
    }

    pub fn dedup(mut self, keys: &[&str]) -> Self {
        self.task.dedup = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn reduced(mut self, keys: &[&str]) -> Self {
        self.task.reduced = keys.iter().map(|k| k.to_string()).collect();
        self
    }

    pub fn build(self) -> TaskConfig {
        self.task
    }
}

/// Finishing action counting its invocations.
#[derive(Debug, Clone, Default)]
pub struct CountingFinisher {
    calls: Arc<AtomicUsize>,
}

impl CountingFinisher {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl OnAllOk for CountingFinisher {
    fn on_all_ok(&self, ctx: &FinishContext<'_>) -> WorkResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        WorkResult::ok(format!("{} members", ctx.members.len()))
    }
}

/// Work A with one task producing `X`; work B with `consumers` tasks each
/// reading `X` from it. B finishes through the named action `count`.
pub struct FanOut {
    pub flow: Flow,
    pub producer_work: WorkId,
    pub consumer_work: WorkId,
    pub producer: TaskId,
    pub consumers: Vec<TaskId>,
    pub finisher: CountingFinisher,
}

pub fn fan_out(workdir: impl Into<PathBuf>, consumers: usize) -> FanOut {
    let mut flow = Flow::new(workdir);
    let finisher = CountingFinisher::default();
    flow.register_finisher("count", Arc::new(finisher.clone()));

    let producer_work = flow.new_work("A", Finisher::Noop);
    let producer = flow
        .register_task(producer_work, JobSpec::generic(["X"]), Deps::new())
        .expect("register producer");

    let consumer_work = flow.new_work("B", Finisher::Named("count".to_string()));
    let consumers = (0..consumers)
        .map(|_| {
            flow.register_task(
                consumer_work,
                JobSpec::generic(["Y"]),
                Deps::new().on(producer, "X"),
            )
            .expect("register consumer")
        })
        .collect();

    FanOut {
        flow,
        producer_work,
        consumer_work,
        producer,
        consumers,
        finisher,
    }
}

/// Declared outputs of `task`, placed where the flow expects them.
pub fn expected_outputs(flow: &Flow, task: TaskId) -> BTreeMap<Artifact, PathBuf> {
    let job = flow.schedule(task).expect("schedule task");
    job.outputs.into_iter().collect()
}

pub fn outputs_in(dir: &Path, artifacts: &[&str]) -> BTreeMap<Artifact, PathBuf> {
    artifacts
        .iter()
        .map(|a| (Artifact::from(*a), dir.join(format!("out_{a}"))))
        .collect()
}

/// Mark `task` running and successful with its declared outputs.
pub fn succeed(flow: &mut Flow, task: TaskId) {
    let outputs = expected_outputs(flow, task);
    flow.mark_running(task).expect("mark running");
    flow.mark_succeeded(task, outputs).expect("mark succeeded");
}

/// Drive `flow` synchronously until nothing is runnable. Tasks for which
/// `fails` returns true are reported as failed. Returns tasks in the order
/// they were started.
pub fn drive<F>(flow: &mut Flow, mut fails: F) -> Vec<TaskId>
where
    F: FnMut(&Flow, TaskId) -> bool,
{
    let mut started = Vec::new();
    loop {
        let batch = flow.next_runnable();
        if batch.is_empty() {
            return started;
        }
        for task in batch {
            started.push(task);
            if fails(flow, task) {
                flow.mark_running(task).expect("mark running");
                flow.mark_failed(task, "scripted failure")
                    .expect("mark failed");
            } else {
                succeed(flow, task);
            }
        }
    }
}
