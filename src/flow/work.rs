// src/flow/work.rs

use serde::{Deserialize, Serialize};

use crate::dag::{Deps, JobSpec, Producer, Vars};
use crate::flow::finish::{Finisher, WorkResult};
use crate::types::{TaskId, TaskKind, TaskStatus, WorkId, WorkStatus};

/// A task waiting inside a [`Work`] that has not been registered yet.
#[derive(Debug, Clone)]
pub struct PendingTask {
    pub spec: JobSpec,
    pub deps: Deps,
}

/// A group of tasks under construction, sharing one finishing action.
///
/// Tasks registered here may depend on tasks already in the flow, on works
/// already in the flow, and on earlier tasks of this work through the
/// [`Producer::Sibling`] handle `register_task` returns. Nothing is checked
/// until `Flow::register_work`, which resolves and validates every edge.
#[derive(Debug, Clone, Default)]
pub struct Work {
    pub(crate) label: Option<String>,
    pub(crate) finisher: Finisher,
    pub(crate) tasks: Vec<PendingTask>,
}

impl Work {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_label(mut self, label: impl Into<String>) -> Self {
        self.label = Some(label.into());
        self
    }

    pub fn with_finisher(mut self, finisher: Finisher) -> Self {
        self.finisher = finisher;
        self
    }

    /// Append a task; the returned producer can be used by later tasks of
    /// this work.
    pub fn register_task(&mut self, spec: JobSpec, deps: Deps) -> Producer {
        self.tasks.push(PendingTask { spec, deps });
        Producer::Sibling(self.tasks.len() - 1)
    }

    pub fn register(&mut self, kind: TaskKind, vars: Vars, deps: Deps) -> Producer {
        self.register_task(JobSpec::new(kind, vars), deps)
    }

    pub fn register_scf_task(&mut self, vars: Vars) -> Producer {
        self.register(TaskKind::Scf, vars, Deps::new())
    }

    pub fn register_nscf_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Nscf, vars, deps)
    }

    pub fn register_ddk_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Ddk, vars, deps)
    }

    pub fn register_dde_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Dde, vars, deps)
    }

    pub fn register_phonon_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Phonon, vars, deps)
    }

    pub fn register_elastic_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Elastic, vars, deps)
    }

    pub fn register_eph_task(&mut self, vars: Vars, deps: Deps) -> Producer {
        self.register(TaskKind::Eph, vars, deps)
    }

    pub fn len(&self) -> usize {
        self.tasks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tasks.is_empty()
    }

    pub fn tasks(&self) -> &[PendingTask] {
        &self.tasks
    }
}

/// A work registered in a flow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkNode {
    pub(crate) id: WorkId,
    pub(crate) label: String,
    pub(crate) finisher: Finisher,
    pub(crate) tasks: Vec<TaskId>,
    pub(crate) status: WorkStatus,
    /// Set once the finishing action ran; it never runs again.
    pub(crate) finalized: bool,
    #[serde(default)]
    pub(crate) result: Option<WorkResult>,
}

impl WorkNode {
    pub(crate) fn new(id: WorkId, label: Option<String>, finisher: Finisher) -> Self {
        Self {
            id,
            label: label.unwrap_or_else(|| id.to_string()),
            finisher,
            tasks: Vec::new(),
            status: WorkStatus::Pending,
            finalized: false,
            result: None,
        }
    }

    pub fn id(&self) -> WorkId {
        self.id
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn finisher(&self) -> &Finisher {
        &self.finisher
    }

    pub fn tasks(&self) -> &[TaskId] {
        &self.tasks
    }

    pub fn status(&self) -> WorkStatus {
        self.status
    }

    pub fn is_finalized(&self) -> bool {
        self.finalized
    }

    pub fn result(&self) -> Option<&WorkResult> {
        self.result.as_ref()
    }

    /// Whether the finishing action ran and succeeded, so the work's
    /// consolidated artifacts can be consumed.
    pub fn exposes_outputs(&self) -> bool {
        self.finalized && self.result.as_ref().is_some_and(|r| r.success)
    }

    /// Whether dependents of this work can never be satisfied.
    pub fn is_doomed(&self) -> bool {
        matches!(self.status, WorkStatus::Failed | WorkStatus::Unreachable)
            || (self.finalized && !self.exposes_outputs())
    }
}

/// Aggregate status from member statuses.
///
/// An empty work stays `Pending`: tasks may still be added to it.
pub fn aggregate_status<I>(statuses: I) -> WorkStatus
where
    I: IntoIterator<Item = TaskStatus>,
{
    let mut any = false;
    let mut all_ok = true;
    let mut blocked = false;

    for status in statuses {
        any = true;
        match status {
            TaskStatus::Failed => return WorkStatus::Failed,
            TaskStatus::Unreachable => {
                blocked = true;
                all_ok = false;
            }
            TaskStatus::Succeeded => {}
            _ => all_ok = false,
        }
    }

    if blocked {
        WorkStatus::Unreachable
    } else if any && all_ok {
        WorkStatus::Succeeded
    } else {
        WorkStatus::Pending
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Artifact;

    #[test]
    fn aggregate_rules() {
        use TaskStatus::*;
        assert_eq!(aggregate_status([]), WorkStatus::Pending);
        assert_eq!(aggregate_status([Succeeded, Succeeded]), WorkStatus::Succeeded);
        assert_eq!(aggregate_status([Succeeded, Running]), WorkStatus::Pending);
        assert_eq!(aggregate_status([Running, Failed, Init]), WorkStatus::Failed);
        assert_eq!(aggregate_status([Unreachable, Failed]), WorkStatus::Failed);
        assert_eq!(aggregate_status([Succeeded, Unreachable]), WorkStatus::Unreachable);
    }

    #[test]
    fn siblings_are_numbered_in_registration_order() {
        let mut work = Work::new().with_label("elastic");
        let scf = work.register_scf_task(Vars::new());
        let ddk = work.register_ddk_task(Vars::new(), Deps::new().on(scf, Artifact::WFK));
        assert_eq!(scf, Producer::Sibling(0));
        assert_eq!(ddk, Producer::Sibling(1));
        assert_eq!(work.tasks()[1].deps.producers(), vec![Producer::Sibling(0)]);
    }

    #[test]
    fn failed_finishing_action_dooms_dependents() {
        let mut node = WorkNode::new(WorkId(0), None, Finisher::Noop);
        assert_eq!(node.label(), "w0");
        assert!(!node.is_doomed());
        node.status = WorkStatus::Succeeded;
        node.finalized = true;
        node.result = Some(WorkResult::failed("merge crashed"));
        assert!(!node.exposes_outputs());
        assert!(node.is_doomed());
    }
}
