// src/flow/report.rs

//! Post-mortem views of a flow: which failures blocked what, what is left
//! to cancel, and per-status counts.

use std::fmt;

use serde::Serialize;

use crate::dag::NodeId;
use crate::errors::Result;
use crate::flow::Flow;
use crate::types::{TaskId, TaskStatus, WorkId, WorkStatus};

/// A node named in a report, with its label resolved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Blocked<T> {
    pub id: T,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum FailureRoot {
    Task {
        task: TaskId,
        label: String,
        reason: String,
    },
    Aggregation {
        work: WorkId,
        label: String,
        message: String,
    },
}

/// One root failure and everything it made unreachable.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailureLink {
    pub root: FailureRoot,
    pub blocked_tasks: Vec<Blocked<TaskId>>,
    pub blocked_works: Vec<Blocked<WorkId>>,
}

/// All root failures of a flow, tasks first, each in id order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct FailureChain {
    pub links: Vec<FailureLink>,
}

impl FailureChain {
    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }

    /// Every blocked task across all links, in id order.
    pub fn blocked_tasks(&self) -> Vec<TaskId> {
        let mut all: Vec<TaskId> = self
            .links
            .iter()
            .flat_map(|l| l.blocked_tasks.iter().map(|b| b.id))
            .collect();
        all.sort();
        all.dedup();
        all
    }
}

impl fmt::Display for FailureChain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.links.is_empty() {
            return writeln!(f, "no failures");
        }
        for link in &self.links {
            match &link.root {
                FailureRoot::Task {
                    task,
                    label,
                    reason,
                } => writeln!(f, "task {label} ({task}) failed: {reason}")?,
                FailureRoot::Aggregation {
                    work,
                    label,
                    message,
                } => writeln!(f, "work {label} ({work}) failed to finish: {message}")?,
            }
            if !link.blocked_tasks.is_empty() {
                let names: Vec<String> = link
                    .blocked_tasks
                    .iter()
                    .map(|b| format!("{} ({})", b.label, b.id))
                    .collect();
                writeln!(f, "  blocked tasks: {}", names.join(", "))?;
            }
            if !link.blocked_works.is_empty() {
                let names: Vec<String> = link
                    .blocked_works
                    .iter()
                    .map(|b| format!("{} ({})", b.label, b.id))
                    .collect();
                writeln!(f, "  blocked works: {}", names.join(", "))?;
            }
        }
        Ok(())
    }
}

/// Task counts per status.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct FlowSummary {
    pub works: usize,
    pub waiting: usize,
    pub running: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub unreachable: usize,
}

impl fmt::Display for FlowSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} works: {} succeeded, {} failed, {} unreachable, {} running, {} waiting",
            self.works, self.succeeded, self.failed, self.unreachable, self.running, self.waiting
        )
    }
}

impl Flow {
    /// Root failures and what each one blocked. Deterministic for a given
    /// flow state.
    pub fn failure_chain(&self) -> FailureChain {
        let mut links = Vec::new();

        for task in self.tasks.iter().filter(|t| t.status == TaskStatus::Failed) {
            links.push(FailureLink {
                root: FailureRoot::Task {
                    task: task.id,
                    label: self.qualified_label(task.id),
                    reason: task.failure.clone().unwrap_or_default(),
                },
                blocked_tasks: Vec::new(),
                blocked_works: Vec::new(),
            });
            self.fill_blocked(NodeId::Task(task.id), task.work, links.last_mut());
        }

        for work in &self.works {
            let Some(result) = work.result.as_ref().filter(|r| !r.success) else {
                continue;
            };
            links.push(FailureLink {
                root: FailureRoot::Aggregation {
                    work: work.id,
                    label: work.label.clone(),
                    message: result.message.clone(),
                },
                blocked_tasks: Vec::new(),
                blocked_works: Vec::new(),
            });
            self.fill_blocked(NodeId::Work(work.id), work.id, links.last_mut());
        }

        FailureChain { links }
    }

    fn fill_blocked(&self, root: NodeId, own_work: WorkId, link: Option<&mut FailureLink>) {
        let Some(link) = link else { return };
        for node in self.graph.transitive_dependents(root) {
            match node {
                NodeId::Task(t) if self.tasks[t.0].status == TaskStatus::Unreachable => {
                    link.blocked_tasks.push(Blocked {
                        id: t,
                        label: self.qualified_label(t),
                    });
                }
                NodeId::Work(w)
                    if w != own_work && self.works[w.0].status == WorkStatus::Unreachable =>
                {
                    link.blocked_works.push(Blocked {
                        id: w,
                        label: self.works[w.0].label.clone(),
                    });
                }
                _ => {}
            }
        }
    }

    /// Tasks to cancel in order to abandon `work`: its unfinished members
    /// plus every unfinished task downstream of it.
    pub fn cancellation_candidates(&self, work: WorkId) -> Result<Vec<TaskId>> {
        let node = self.work(work)?;
        let mut out: Vec<TaskId> = node
            .tasks
            .iter()
            .copied()
            .filter(|t| !self.tasks[t.0].status.is_terminal())
            .collect();

        for dependent in self.graph.transitive_dependents(NodeId::Work(work)) {
            if let NodeId::Task(t) = dependent {
                if !self.tasks[t.0].status.is_terminal() {
                    out.push(t);
                }
            }
        }
        for member in &node.tasks {
            for dependent in self.graph.transitive_dependents(NodeId::Task(*member)) {
                if let NodeId::Task(t) = dependent {
                    if !self.tasks[t.0].status.is_terminal() {
                        out.push(t);
                    }
                }
            }
        }

        out.sort();
        out.dedup();
        Ok(out)
    }

    pub fn summary(&self) -> FlowSummary {
        let mut summary = FlowSummary {
            works: self.works.len(),
            ..FlowSummary::default()
        };
        for task in &self.tasks {
            match task.status {
                TaskStatus::Init | TaskStatus::Ready => summary.waiting += 1,
                TaskStatus::Running => summary.running += 1,
                TaskStatus::Succeeded => summary.succeeded += 1,
                TaskStatus::Failed => summary.failed += 1,
                TaskStatus::Unreachable => summary.unreachable += 1,
            }
        }
        summary
    }
}
