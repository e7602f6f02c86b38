// src/flow/mod.rs

//! Works, flows and the execution-driver interface.
//!
//! A [`Flow`] owns every [`WorkNode`] and [`Task`] plus the global dependency
//! graph. Registration lives in [`build`], the driver calls (`next_runnable`,
//! `mark_*`, `is_done`) in [`driver`], failure reporting in [`report`] and
//! persistence in [`snapshot`].

pub mod build;
pub mod dedup;
pub mod driver;
pub mod finish;
pub mod report;
pub mod snapshot;
pub mod work;

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::dag::{DepGraph, Task};
use crate::errors::{FlowError, Result};
use crate::exec::{DefaultJobBuilder, JobBuilder};
use crate::types::{TaskId, TaskKind, WorkId};

pub use dedup::{canonicalize, CanonicalRules, DedupIndex, Fingerprint};
pub use finish::{FinishContext, Finisher, MemberOutputs, MergeRule, OnAllOk, WorkResult};
pub use report::{Blocked, FailureChain, FailureLink, FailureRoot, FlowSummary};
pub use snapshot::{FlowSnapshot, SNAPSHOT_VERSION};
pub use work::{PendingTask, Work, WorkNode};

/// Behaviour switches of a flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FlowOptions {
    /// Reject, at registration time, edges asking a producer for an artifact
    /// it does not declare.
    #[serde(default)]
    pub eager_artifact_check: bool,
}

/// Top-level collection of works with a global dependency graph.
pub struct Flow {
    pub(crate) workdir: PathBuf,
    pub(crate) options: FlowOptions,
    pub(crate) works: Vec<WorkNode>,
    pub(crate) tasks: Vec<Task>,
    pub(crate) graph: DepGraph,
    default_builder: Arc<dyn JobBuilder>,
    builders: BTreeMap<TaskKind, Arc<dyn JobBuilder>>,
    finishers: BTreeMap<String, Arc<dyn OnAllOk>>,
}

impl fmt::Debug for Flow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Flow")
            .field("workdir", &self.workdir)
            .field("options", &self.options)
            .field("works", &self.works.len())
            .field("tasks", &self.tasks.len())
            .field("finishers", &self.finishers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl Flow {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self::with_options(workdir, FlowOptions::default())
    }

    pub fn with_options(workdir: impl Into<PathBuf>, options: FlowOptions) -> Self {
        Self {
            workdir: workdir.into(),
            options,
            works: Vec::new(),
            tasks: Vec::new(),
            graph: DepGraph::new(),
            default_builder: Arc::new(DefaultJobBuilder),
            builders: BTreeMap::new(),
            finishers: BTreeMap::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn options(&self) -> FlowOptions {
        self.options
    }

    /// Use `builder` for every task of `kind` registered from now on.
    pub fn set_builder(&mut self, kind: TaskKind, builder: Arc<dyn JobBuilder>) {
        self.builders.insert(kind, builder);
    }

    /// Make a strategy available to works using `Finisher::Named(name)`.
    pub fn register_finisher(&mut self, name: impl Into<String>, action: Arc<dyn OnAllOk>) {
        self.finishers.insert(name.into(), action);
    }

    pub(crate) fn builder_for(&self, kind: TaskKind) -> &dyn JobBuilder {
        self.builders
            .get(&kind)
            .map(|b| b.as_ref())
            .unwrap_or(self.default_builder.as_ref())
    }

    /// Resolve a work's finishing action.
    pub(crate) fn finisher_of(&self, finisher: &Finisher) -> Option<Arc<dyn OnAllOk>> {
        match finisher {
            Finisher::Named(name) => self.finishers.get(name).cloned(),
            other => Some(Arc::new(other.clone())),
        }
    }

    /// Works whose `Finisher::Named` action has not been registered, with
    /// the missing name. Such a work can only end in a failed aggregation.
    pub fn unregistered_finishers(&self) -> Vec<(WorkId, &str)> {
        self.works
            .iter()
            .filter_map(|w| match w.finisher() {
                Finisher::Named(name) if !self.finishers.contains_key(name) => {
                    Some((w.id(), name.as_str()))
                }
                _ => None,
            })
            .collect()
    }

    pub fn works(&self) -> &[WorkNode] {
        &self.works
    }

    pub fn tasks(&self) -> &[Task] {
        &self.tasks
    }

    pub fn work(&self, id: WorkId) -> Result<&WorkNode> {
        self.works.get(id.0).ok_or(FlowError::UnknownWork(id))
    }

    pub fn task(&self, id: TaskId) -> Result<&Task> {
        self.tasks.get(id.0).ok_or(FlowError::UnknownTask(id))
    }

    pub(crate) fn task_mut(&mut self, id: TaskId) -> Result<&mut Task> {
        self.tasks.get_mut(id.0).ok_or(FlowError::UnknownTask(id))
    }

    /// Directory a task runs in: `<workdir>/w<N>/t<pos>`.
    pub fn task_dir(&self, id: TaskId) -> Result<PathBuf> {
        let task = self.task(id)?;
        Ok(self
            .workdir
            .join(task.work.to_string())
            .join(format!("t{}", task.pos)))
    }

    /// Directory for a work's consolidated artifacts: `<workdir>/w<N>/outdata`.
    pub fn work_outdir(&self, id: WorkId) -> PathBuf {
        self.workdir.join(id.to_string()).join("outdata")
    }

    /// `work.task` style label of a task.
    pub fn qualified_label(&self, id: TaskId) -> String {
        match self.tasks.get(id.0) {
            Some(t) => format!("{}.{}", self.works[t.work.0].label, t.label),
            None => id.to_string(),
        }
    }

    pub fn len_tasks(&self) -> usize {
        self.tasks.len()
    }

    pub fn len_works(&self) -> usize {
        self.works.len()
    }
}
