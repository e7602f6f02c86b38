// src/dag/task.rs

//! Task records: the immutable job spec, the descriptor built from it, and
//! the mutable per-task state the driver updates.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::dag::edge::{Artifact, DependencyEdge};
use crate::errors::{FlowError, Result};
use crate::types::{TaskId, TaskKind, TaskStatus, WorkId};

/// Opaque job parameters. The engine never interprets them except through
/// the deduplication rules the caller supplies.
pub type Vars = BTreeMap<String, Value>;

/// What the caller asks for: a kind plus its parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobSpec {
    pub kind: TaskKind,
    /// Human-readable label, used in logs and reports only.
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub vars: Vars,
}

impl JobSpec {
    pub fn new(kind: TaskKind, vars: Vars) -> Self {
        Self {
            kind,
            name: None,
            vars,
        }
    }

    /// A `Generic` job declaring the given outputs.
    pub fn generic<I, A>(outputs: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Artifact>,
    {
        let outputs: Vec<Value> = outputs
            .into_iter()
            .map(|a| Value::String(a.into().to_string()))
            .collect();
        let mut vars = Vars::new();
        vars.insert("outputs".to_string(), Value::Array(outputs));
        Self::new(TaskKind::Generic, vars)
    }

    pub fn named(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn with_var(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.vars.insert(key.into(), value.into());
        self
    }
}

/// Ready-to-submit description returned by a [`JobBuilder`](crate::exec::JobBuilder).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobDescriptor {
    pub kind: TaskKind,
    /// Shell command the real executor runs, if any.
    #[serde(default)]
    pub cmd: Option<String>,
    /// Artifacts the job must expose when it succeeds.
    pub outputs: Vec<Artifact>,
    #[serde(default)]
    pub vars: Vars,
}

/// A registered task. Permanent record: tasks are never removed from a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub(crate) id: TaskId,
    pub(crate) work: WorkId,
    /// Position inside the owning work.
    pub(crate) pos: usize,
    pub(crate) label: String,
    pub(crate) spec: JobSpec,
    pub(crate) job: JobDescriptor,
    pub(crate) deps: Vec<DependencyEdge>,
    pub(crate) outputs: BTreeMap<Artifact, PathBuf>,
    pub(crate) status: TaskStatus,
    #[serde(default)]
    pub(crate) failure: Option<String>,
}

impl Task {
    pub(crate) fn new(
        id: TaskId,
        work: WorkId,
        pos: usize,
        spec: JobSpec,
        job: JobDescriptor,
        deps: Vec<DependencyEdge>,
    ) -> Self {
        let label = match &spec.name {
            Some(name) => name.clone(),
            None => format!("{}{}", spec.kind, pos),
        };
        Self {
            id,
            work,
            pos,
            label,
            spec,
            job,
            deps,
            outputs: BTreeMap::new(),
            status: TaskStatus::Init,
            failure: None,
        }
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn work(&self) -> WorkId {
        self.work
    }

    pub fn pos(&self) -> usize {
        self.pos
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn kind(&self) -> TaskKind {
        self.spec.kind
    }

    pub fn spec(&self) -> &JobSpec {
        &self.spec
    }

    pub fn job(&self) -> &JobDescriptor {
        &self.job
    }

    pub fn deps(&self) -> &[DependencyEdge] {
        &self.deps
    }

    pub fn status(&self) -> TaskStatus {
        self.status
    }

    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    pub fn declared_outputs(&self) -> &[Artifact] {
        &self.job.outputs
    }

    pub fn outputs(&self) -> &BTreeMap<Artifact, PathBuf> {
        &self.outputs
    }

    /// Location of a produced artifact. `None` until the task succeeded.
    pub fn output(&self, artifact: &Artifact) -> Option<&Path> {
        self.outputs.get(artifact).map(|p| p.as_path())
    }

    pub(crate) fn hand_out(&mut self) {
        if self.status == TaskStatus::Init {
            self.status = TaskStatus::Ready;
        }
    }

    pub(crate) fn start(&mut self) -> Result<()> {
        match self.status {
            TaskStatus::Init | TaskStatus::Ready => {
                self.status = TaskStatus::Running;
                Ok(())
            }
            from => Err(self.invalid(from, TaskStatus::Running)),
        }
    }

    pub(crate) fn succeed(&mut self, outputs: BTreeMap<Artifact, PathBuf>) -> Result<()> {
        if self.status != TaskStatus::Running {
            return Err(self.invalid(self.status, TaskStatus::Succeeded));
        }

        let missing: Vec<String> = self
            .job
            .outputs
            .iter()
            .filter(|a| !outputs.contains_key(*a))
            .map(|a| a.to_string())
            .collect();
        if !missing.is_empty() {
            return Err(FlowError::MissingOutputs {
                task: self.id,
                missing,
            });
        }

        self.outputs = outputs;
        self.status = TaskStatus::Succeeded;
        Ok(())
    }

    pub(crate) fn fail(&mut self, reason: String) -> Result<()> {
        if self.status.is_terminal() {
            return Err(self.invalid(self.status, TaskStatus::Failed));
        }
        self.status = TaskStatus::Failed;
        self.failure = Some(reason);
        Ok(())
    }

    /// Mark as blocked by a failed ancestor. Returns `true` if the status
    /// changed. Running or finished tasks are left alone.
    pub(crate) fn block(&mut self) -> bool {
        match self.status {
            TaskStatus::Init | TaskStatus::Ready => {
                self.status = TaskStatus::Unreachable;
                true
            }
            _ => false,
        }
    }

    fn invalid(&self, from: TaskStatus, to: TaskStatus) -> FlowError {
        FlowError::InvalidTransition {
            task: self.id,
            from,
            to,
        }
    }
}

/// Description of a task the engine wants an executor to run now.
#[derive(Debug, Clone)]
pub struct ScheduledTask {
    pub id: TaskId,
    pub work: WorkId,
    pub label: String,
    pub kind: TaskKind,
    pub cmd: Option<String>,
    /// Directory the job runs in and leaves its outputs in.
    pub workdir: PathBuf,
    /// Resolved input artifact locations.
    pub inputs: Vec<(Artifact, PathBuf)>,
    /// Where each declared output is expected to appear.
    pub outputs: Vec<(Artifact, PathBuf)>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running_task(outputs: &[&str]) -> Task {
        let spec = JobSpec::generic(outputs.iter().copied());
        let job = JobDescriptor {
            kind: TaskKind::Generic,
            cmd: None,
            outputs: outputs.iter().map(|a| Artifact::from(*a)).collect(),
            vars: Vars::new(),
        };
        let mut task = Task::new(TaskId(0), WorkId(0), 0, spec, job, Vec::new());
        task.start().unwrap();
        task
    }

    #[test]
    fn succeed_requires_every_declared_output() {
        let mut task = running_task(&["X", "Y"]);
        let mut outputs = BTreeMap::new();
        outputs.insert(Artifact::from("X"), PathBuf::from("/tmp/x"));

        let err = task.succeed(outputs.clone()).unwrap_err();
        assert!(matches!(err, FlowError::MissingOutputs { ref missing, .. } if missing == &["Y"]));
        assert_eq!(task.status(), TaskStatus::Running);
        assert!(task.outputs().is_empty());

        outputs.insert(Artifact::from("Y"), PathBuf::from("/tmp/y"));
        task.succeed(outputs).unwrap();
        assert_eq!(task.status(), TaskStatus::Succeeded);
        assert_eq!(task.output(&Artifact::from("Y")), Some(Path::new("/tmp/y")));
    }

    #[test]
    fn cannot_succeed_without_running() {
        let spec = JobSpec::generic(["X"]);
        let job = JobDescriptor {
            kind: TaskKind::Generic,
            cmd: None,
            outputs: vec![Artifact::from("X")],
            vars: Vars::new(),
        };
        let mut task = Task::new(TaskId(1), WorkId(0), 1, spec, job, Vec::new());
        let err = task.succeed(BTreeMap::new()).unwrap_err();
        assert!(matches!(
            err,
            FlowError::InvalidTransition {
                from: TaskStatus::Init,
                to: TaskStatus::Succeeded,
                ..
            }
        ));
    }

    #[test]
    fn block_only_touches_waiting_tasks() {
        let mut task = running_task(&[]);
        assert!(!task.block());
        assert_eq!(task.status(), TaskStatus::Running);
        task.fail("boom".into()).unwrap();
        assert!(task.fail("again".into()).is_err());
        assert_eq!(task.failure(), Some("boom"));
    }

    #[test]
    fn default_label_uses_kind_and_position() {
        let spec = JobSpec::new(TaskKind::Phonon, Vars::new());
        let job = JobDescriptor {
            kind: TaskKind::Phonon,
            cmd: None,
            outputs: vec![],
            vars: Vars::new(),
        };
        let task = Task::new(TaskId(4), WorkId(1), 2, spec, job, Vec::new());
        assert_eq!(task.label(), "phonon2");
    }
}
