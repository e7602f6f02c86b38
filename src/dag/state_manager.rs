// src/dag/state_manager.rs

//! Readiness evaluation and failure propagation over a flow's tables.

use tracing::{debug, warn};

use crate::dag::edge::{Artifact, DependencyEdge, Producer};
use crate::dag::graph::{DepGraph, NodeId};
use crate::dag::task::Task;
use crate::flow::work::{aggregate_status, WorkNode};
use crate::types::{TaskId, TaskStatus, WorkId, WorkStatus};

/// Read-only view used for readiness queries.
pub struct ReadOnlyStateManager<'a> {
    tasks: &'a [Task],
    works: &'a [WorkNode],
}

impl<'a> ReadOnlyStateManager<'a> {
    pub fn new(tasks: &'a [Task], works: &'a [WorkNode]) -> Self {
        Self { tasks, works }
    }

    /// Whether `producer` has finished and currently exposes `artifact`.
    pub fn exposes(&self, producer: Producer, artifact: &Artifact) -> bool {
        match producer {
            Producer::Task(id) => self.tasks.get(id.0).is_some_and(|t| {
                t.status == TaskStatus::Succeeded && t.outputs.contains_key(artifact)
            }),
            Producer::Work(id) => self.works.get(id.0).is_some_and(|w| {
                w.exposes_outputs()
                    && w.result
                        .as_ref()
                        .is_some_and(|r| r.outputs.contains_key(artifact))
            }),
            Producer::Sibling(_) => false,
        }
    }

    /// Whether `producer` can never satisfy any dependent.
    pub fn is_doomed(&self, producer: Producer) -> bool {
        match producer {
            Producer::Task(id) => self.tasks.get(id.0).is_some_and(|t| {
                matches!(t.status, TaskStatus::Failed | TaskStatus::Unreachable)
            }),
            Producer::Work(id) => self.works.get(id.0).is_some_and(WorkNode::is_doomed),
            Producer::Sibling(_) => false,
        }
    }

    pub fn deps_satisfied(&self, edges: &[DependencyEdge]) -> bool {
        edges.iter().all(|e| self.exposes(e.producer, &e.artifact))
    }

    /// Init or Ready, and every dependency satisfied.
    pub fn is_ready(&self, task: &Task) -> bool {
        matches!(task.status, TaskStatus::Init | TaskStatus::Ready)
            && self.deps_satisfied(&task.deps)
    }

    /// Tasks still `Init` whose dependencies are satisfied, in id order.
    pub fn ready_candidates(&self) -> Vec<TaskId> {
        self.tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Init && self.deps_satisfied(&t.deps))
            .map(|t| t.id)
            .collect()
    }
}

/// Mutable manager for status propagation.
pub struct StateManager<'a> {
    graph: &'a DepGraph,
    tasks: &'a mut [Task],
    works: &'a mut [WorkNode],
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DepGraph, tasks: &'a mut [Task], works: &'a mut [WorkNode]) -> Self {
        Self {
            graph,
            tasks,
            works,
        }
    }

    pub fn read_only(&self) -> ReadOnlyStateManager<'_> {
        ReadOnlyStateManager::new(self.tasks, self.works)
    }

    /// Recompute a work's aggregate status from its members.
    ///
    /// Returns the new status if it changed.
    pub fn refresh_work(&mut self, work: WorkId) -> Option<WorkStatus> {
        let tasks = &*self.tasks;
        let Some(node) = self.works.get_mut(work.0) else {
            warn!(work = %work, "refresh for unknown work; ignoring");
            return None;
        };

        let status = aggregate_status(node.tasks.iter().map(|t| tasks[t.0].status));
        if status == node.status {
            return None;
        }

        debug!(work = %work, from = %node.status, to = %status, "work status changed");
        node.status = status;
        Some(status)
    }

    /// Mark every task transitively depending on `root` as `Unreachable`.
    ///
    /// The walk passes through work nodes that can no longer expose their
    /// artifacts; it stops at tasks that are running or finished. Returns the
    /// newly blocked tasks in id order.
    pub fn mark_dependents_unreachable(&mut self, root: NodeId) -> Vec<TaskId> {
        let mut stack: Vec<NodeId> = self.graph.dependents_of(root);
        let mut visited: Vec<NodeId> = vec![root];
        let mut newly_blocked = Vec::new();

        while let Some(node) = stack.pop() {
            if visited.contains(&node) {
                continue;
            }
            visited.push(node);

            match node {
                NodeId::Task(id) => {
                    let Some(task) = self.tasks.get_mut(id.0) else {
                        warn!(task = %id, "node in graph not present in task table");
                        continue;
                    };
                    if task.block() {
                        debug!(
                            task = %id,
                            label = %task.label,
                            "marking dependent Unreachable due to upstream failure"
                        );
                        newly_blocked.push(id);
                    }
                    if task.status == TaskStatus::Unreachable {
                        stack.extend(self.graph.dependents_of(node));
                    }
                }
                NodeId::Work(id) => {
                    self.refresh_work(id);
                    if self.works.get(id.0).is_some_and(WorkNode::is_doomed) {
                        stack.extend(self.graph.dependents_of(node));
                    }
                }
            }
        }

        newly_blocked.sort();
        newly_blocked
    }

    /// Hand out every ready `Init` task: move it to `Ready` and return it.
    pub fn collect_new_ready_tasks(&mut self) -> Vec<TaskId> {
        // Decide first, then mutate.
        let candidates = self.read_only().ready_candidates();

        for id in &candidates {
            let task = &mut self.tasks[id.0];
            debug!(task = %id, label = %task.label, "dependencies satisfied; marking Ready");
            task.hand_out();
        }

        candidates
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::dag::task::{JobDescriptor, JobSpec, Vars};
    use crate::flow::finish::Finisher;
    use crate::types::TaskKind;

    fn task(id: usize, work: usize, deps: Vec<DependencyEdge>) -> Task {
        let job = JobDescriptor {
            kind: TaskKind::Generic,
            cmd: None,
            outputs: vec![Artifact::from("X")],
            vars: Vars::new(),
        };
        Task::new(TaskId(id), WorkId(work), 0, JobSpec::generic(["X"]), job, deps)
    }

    fn edge(producer: Producer, artifact: &str) -> DependencyEdge {
        DependencyEdge {
            producer,
            artifact: Artifact::from(artifact),
        }
    }

    /// w0 = {t0}, w1 = {t1 <- t0:X}, w2 = {t2 <- w1:X}
    fn fixture() -> (DepGraph, Vec<Task>, Vec<WorkNode>) {
        let mut graph = DepGraph::new();
        let mut works = Vec::new();
        for w in 0..3 {
            graph.add_work(WorkId(w));
            let mut node = WorkNode::new(WorkId(w), None, Finisher::Noop);
            node.tasks.push(TaskId(w));
            works.push(node);
            graph.add_task(TaskId(w), WorkId(w));
        }
        let tasks = vec![
            task(0, 0, vec![]),
            task(1, 1, vec![edge(Producer::Task(TaskId(0)), "X")]),
            task(2, 2, vec![edge(Producer::Work(WorkId(1)), "X")]),
        ];
        graph.add_dependency(NodeId::Task(TaskId(0)), TaskId(1));
        graph.add_dependency(NodeId::Work(WorkId(1)), TaskId(2));
        (graph, tasks, works)
    }

    #[test]
    fn readiness_requires_exposed_artifact() {
        let (_graph, mut tasks, works) = fixture();
        let ro = ReadOnlyStateManager::new(&tasks, &works);
        assert_eq!(ro.ready_candidates(), vec![TaskId(0)]);

        tasks[0].start().unwrap();
        let mut out = BTreeMap::new();
        out.insert(Artifact::from("X"), PathBuf::from("/x"));
        tasks[0].succeed(out).unwrap();

        let ro = ReadOnlyStateManager::new(&tasks, &works);
        assert!(ro.is_ready(&tasks[1]));
        // w1 has not run its finishing action yet.
        assert!(!ro.is_ready(&tasks[2]));
    }

    #[test]
    fn failure_blocks_through_work_nodes() {
        let (graph, mut tasks, mut works) = fixture();
        tasks[0].fail("segfault".into()).unwrap();

        let mut mgr = StateManager::new(&graph, &mut tasks, &mut works);
        mgr.refresh_work(WorkId(0));
        let blocked = mgr.mark_dependents_unreachable(NodeId::Task(TaskId(0)));

        assert_eq!(blocked, vec![TaskId(1), TaskId(2)]);
        assert_eq!(works[0].status, WorkStatus::Failed);
        assert_eq!(works[1].status, WorkStatus::Unreachable);
        assert_eq!(works[2].status, WorkStatus::Unreachable);
    }

    #[test]
    fn hand_out_happens_once() {
        let (graph, mut tasks, mut works) = fixture();
        let mut mgr = StateManager::new(&graph, &mut tasks, &mut works);
        assert_eq!(mgr.collect_new_ready_tasks(), vec![TaskId(0)]);
        assert!(mgr.collect_new_ready_tasks().is_empty());
        assert_eq!(tasks[0].status, TaskStatus::Ready);
    }
}
