// src/flow/snapshot.rs

//! JSON persistence of a flow's state, so an interrupted run can resume.
//!
//! Only data is saved. Custom job builders and named finishing actions are
//! code and must be registered again on the loaded flow.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::dag::{DepGraph, NodeId, Producer, Task};
use crate::errors::{FlowError, Result};
use crate::flow::work::WorkNode;
use crate::flow::{Flow, FlowOptions};
use crate::types::{TaskId, TaskStatus, WorkId};

pub const SNAPSHOT_VERSION: u32 = 1;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowSnapshot {
    pub version: u32,
    pub workdir: PathBuf,
    #[serde(default)]
    pub options: FlowOptions,
    pub works: Vec<WorkNode>,
    pub tasks: Vec<Task>,
}

impl Flow {
    pub fn snapshot(&self) -> FlowSnapshot {
        FlowSnapshot {
            version: SNAPSHOT_VERSION,
            workdir: self.workdir.clone(),
            options: self.options,
            works: self.works.clone(),
            tasks: self.tasks.clone(),
        }
    }

    /// Rebuild a flow from a snapshot.
    ///
    /// Tasks that were handed out or running when the snapshot was taken go
    /// back to `Init`: whatever ran them is gone.
    pub fn from_snapshot(snapshot: FlowSnapshot) -> Result<Flow> {
        if snapshot.version != SNAPSHOT_VERSION {
            return Err(FlowError::config(format!(
                "unsupported snapshot version {} (expected {SNAPSHOT_VERSION})",
                snapshot.version
            )));
        }

        let mut flow = Flow::with_options(snapshot.workdir, snapshot.options);
        let mut graph = DepGraph::new();

        for (i, work) in snapshot.works.iter().enumerate() {
            if work.id != WorkId(i) {
                return Err(FlowError::config(format!(
                    "snapshot work #{i} carries id {}",
                    work.id
                )));
            }
            graph.add_work(work.id);
        }

        let mut tasks = snapshot.tasks;
        let task_count = tasks.len();

        for (i, work) in snapshot.works.iter().enumerate() {
            for (j, id) in work.tasks.iter().enumerate() {
                let member = tasks.get(id.0).filter(|t| t.work == work.id && t.pos == j);
                if member.is_none() {
                    return Err(FlowError::config(format!(
                        "work {} lists task {id} as member #{j}, which it does not own",
                        WorkId(i)
                    )));
                }
            }
        }
        for (i, task) in tasks.iter_mut().enumerate() {
            if task.id != TaskId(i) {
                return Err(FlowError::config(format!(
                    "snapshot task #{i} carries id {}",
                    task.id
                )));
            }
            let owner = snapshot.works.get(task.work.0).ok_or_else(|| {
                FlowError::config(format!("task {} belongs to unknown work {}", task.id, task.work))
            })?;
            if owner.tasks.get(task.pos) != Some(&task.id) {
                return Err(FlowError::config(format!(
                    "task {} is not member #{} of work {}",
                    task.id, task.pos, task.work
                )));
            }

            graph.add_task(task.id, task.work);
            for edge in &task.deps {
                let known = match edge.producer {
                    Producer::Task(t) => t.0 < task_count,
                    Producer::Work(w) => w.0 < snapshot.works.len(),
                    Producer::Sibling(_) => false,
                };
                let node = NodeId::from_producer(edge.producer).filter(|_| known);
                let Some(node) = node else {
                    return Err(FlowError::config(format!(
                        "task {} has an invalid producer {}",
                        task.id, edge.producer
                    )));
                };
                graph.add_dependency(node, task.id);
            }

            if matches!(task.status, TaskStatus::Ready | TaskStatus::Running) {
                debug!(task = %task.id, from = %task.status, "resetting interrupted task");
                task.status = TaskStatus::Init;
            }
        }

        if graph.is_cyclic() {
            return Err(FlowError::DagCycle("snapshot graph contains a cycle".into()));
        }

        flow.works = snapshot.works;
        flow.tasks = tasks;
        flow.graph = graph;
        Ok(flow)
    }

    /// Write the snapshot atomically (temp file + rename).
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let tmp = path.with_extension("json.tmp");
        let bytes = serde_json::to_vec_pretty(&self.snapshot())?;
        fs::write(&tmp, bytes)?;
        fs::rename(&tmp, path)?;
        debug!(path = %path.display(), "flow snapshot saved");
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Flow> {
        let bytes = fs::read(path)?;
        let snapshot: FlowSnapshot = serde_json::from_slice(&bytes)?;
        let flow = Flow::from_snapshot(snapshot)?;
        info!(
            path = %path.display(),
            works = flow.works.len(),
            tasks = flow.tasks.len(),
            "flow restored from snapshot"
        );
        Ok(flow)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::dag::{Artifact, Deps, JobSpec};
    use crate::flow::work::Work;
    use crate::types::WorkStatus;

    fn two_step(workdir: &Path) -> Flow {
        let mut flow = Flow::new(workdir);
        let mut work = Work::new().with_label("pair");
        let a = work.register_task(JobSpec::generic(["X"]), Deps::new());
        work.register_task(JobSpec::generic(["Y"]), Deps::new().on(a, "X"));
        flow.register_work(work).unwrap();
        flow
    }

    #[test]
    fn save_and_load_preserve_progress() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = two_step(dir.path());
        flow.next_runnable();
        flow.mark_running(TaskId(0)).unwrap();
        let outputs = BTreeMap::from([(Artifact::from("X"), PathBuf::from("/data/out_X"))]);
        flow.mark_succeeded(TaskId(0), outputs).unwrap();
        flow.next_runnable();
        flow.mark_running(TaskId(1)).unwrap();

        let path = dir.path().join("state").join("flow.json");
        flow.save(&path).unwrap();
        assert!(!path.with_extension("json.tmp").exists());

        let mut restored = Flow::load(&path).unwrap();
        assert_eq!(restored.task(TaskId(0)).unwrap().status(), TaskStatus::Succeeded);
        assert_eq!(restored.task(TaskId(1)).unwrap().status(), TaskStatus::Init);
        assert_eq!(restored.works()[0].status(), WorkStatus::Pending);
        assert_eq!(restored.next_runnable(), vec![TaskId(1)]);
    }

    #[test]
    fn rejects_unknown_versions_and_dangling_ids() {
        let dir = tempfile::tempdir().unwrap();
        let flow = two_step(dir.path());

        let mut snap = flow.snapshot();
        snap.version = 99;
        assert!(Flow::from_snapshot(snap).unwrap_err().is_configuration());

        let mut snap = flow.snapshot();
        snap.tasks.pop();
        snap.works[0].tasks.pop();
        snap.tasks[0].deps.push(crate::dag::DependencyEdge {
            producer: Producer::Task(TaskId(7)),
            artifact: Artifact::from("Q"),
        });
        assert!(Flow::from_snapshot(snap).is_err());

        // Work membership naming a task that does not exist.
        let mut snap = flow.snapshot();
        snap.works[0].tasks = vec![TaskId(0), TaskId(7)];
        assert!(Flow::from_snapshot(snap).unwrap_err().is_configuration());

        // The same task listed twice.
        let mut snap = flow.snapshot();
        snap.works[0].tasks = vec![TaskId(0), TaskId(1), TaskId(0)];
        assert!(Flow::from_snapshot(snap).unwrap_err().is_configuration());

        // Members out of order.
        let mut snap = flow.snapshot();
        snap.works[0].tasks.reverse();
        assert!(Flow::from_snapshot(snap).unwrap_err().is_configuration());
    }

    #[test]
    fn rejects_task_listed_by_another_work() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = two_step(dir.path());
        let mut other = Work::new().with_label("other");
        other.register_task(JobSpec::generic(["Z"]), Deps::new());
        flow.register_work(other).unwrap();

        let mut snap = flow.snapshot();
        snap.works[1].tasks.push(TaskId(0));
        assert!(Flow::from_snapshot(snap).unwrap_err().is_configuration());
    }
}
