// src/flow/driver.rs

//! Execution-driver interface.
//!
//! The driver (a real executor, a test harness, a batch scheduler) pulls
//! runnable tasks with [`Flow::next_runnable`] and reports outcomes with
//! `mark_running` / `mark_succeeded` / `mark_failed`. Each report returns a
//! [`FlowStep`] describing what changed as a consequence.

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::{debug, error, info, warn};

use crate::dag::{
    Artifact, FlowStep, NodeId, Producer, ReadOnlyStateManager, ScheduledTask, StateManager,
};
use crate::errors::{FlowError, Result};
use crate::flow::finish::{FinishContext, MemberOutputs, WorkResult};
use crate::flow::Flow;
use crate::types::{TaskId, TaskStatus, WorkId, WorkStatus};

impl Flow {
    /// Whether `task` may be started now.
    pub fn is_ready(&self, task: TaskId) -> Result<bool> {
        let task = self.task(task)?;
        Ok(ReadOnlyStateManager::new(&self.tasks, &self.works).is_ready(task))
    }

    /// Hand out every task that became runnable since the last call.
    ///
    /// A task is returned at most once; it moves from `Init` to `Ready`.
    pub fn next_runnable(&mut self) -> Vec<TaskId> {
        let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
        mgr.collect_new_ready_tasks()
    }

    pub fn mark_running(&mut self, task: TaskId) -> Result<()> {
        if !self.is_ready(task)? {
            let current = self.task(task)?;
            return match current.status {
                TaskStatus::Init | TaskStatus::Ready => Err(FlowError::NotReady(task)),
                from => Err(FlowError::InvalidTransition {
                    task,
                    from,
                    to: TaskStatus::Running,
                }),
            };
        }
        self.task_mut(task)?.start()?;
        debug!(task = %task, label = %self.qualified_label(task), "task running");
        Ok(())
    }

    /// Record a successful completion together with the artifacts produced.
    ///
    /// Fails with [`FlowError::MissingOutputs`] if a declared output is absent;
    /// the task then stays `Running` and the caller decides whether to report
    /// it as failed.
    pub fn mark_succeeded(
        &mut self,
        task: TaskId,
        outputs: BTreeMap<Artifact, PathBuf>,
    ) -> Result<FlowStep> {
        let work = self.task(task)?.work;
        self.task_mut(task)?.succeed(outputs)?;
        info!(task = %task, label = %self.qualified_label(task), "task succeeded");

        let mut step = FlowStep::default();
        let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
        mgr.refresh_work(work);

        let mut sources = vec![NodeId::Task(task)];
        if self.works[work.0].status == WorkStatus::Succeeded && !self.works[work.0].finalized {
            self.finish_work(work, &mut step);
            sources.push(NodeId::Work(work));
        }

        step.newly_ready = self.ready_dependents(&sources);
        step.flow_done = self.is_done();
        Ok(step)
    }

    /// Record a failure; every transitive dependent becomes `Unreachable`.
    pub fn mark_failed(&mut self, task: TaskId, reason: impl Into<String>) -> Result<FlowStep> {
        let reason = reason.into();
        let work = self.task(task)?.work;
        self.task_mut(task)?.fail(reason.clone())?;
        warn!(task = %task, label = %self.qualified_label(task), %reason, "task failed");

        let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
        mgr.refresh_work(work);
        let newly_unreachable = mgr.mark_dependents_unreachable(NodeId::Task(task));
        if !newly_unreachable.is_empty() {
            info!(
                task = %task,
                blocked = newly_unreachable.len(),
                "failure propagated to dependents"
            );
        }

        Ok(FlowStep {
            newly_unreachable,
            flow_done: self.is_done(),
            ..FlowStep::default()
        })
    }

    /// Every work has reached a terminal status.
    pub fn is_done(&self) -> bool {
        self.works.iter().all(|w| w.status.is_terminal())
    }

    /// Results of the finishing actions that ran so far.
    pub fn work_results(&self) -> BTreeMap<WorkId, WorkResult> {
        self.works
            .iter()
            .filter_map(|w| w.result.clone().map(|r| (w.id, r)))
            .collect()
    }

    /// Resolve a task's dependency edges to concrete artifact locations.
    pub fn inputs_of(&self, task: TaskId) -> Result<Vec<(Artifact, PathBuf)>> {
        let record = self.task(task)?;
        let mut inputs = Vec::with_capacity(record.deps.len());

        for edge in &record.deps {
            let location = match edge.producer {
                Producer::Task(t) => self.task(t)?.outputs.get(&edge.artifact),
                Producer::Work(w) => self
                    .work(w)?
                    .result
                    .as_ref()
                    .and_then(|r| r.outputs.get(&edge.artifact)),
                Producer::Sibling(_) => None,
            };
            match location {
                Some(path) => inputs.push((edge.artifact.clone(), path.clone())),
                None => return Err(FlowError::NotReady(task)),
            }
        }

        Ok(inputs)
    }

    /// Everything an executor needs to run `task`.
    pub fn schedule(&self, task: TaskId) -> Result<ScheduledTask> {
        let record = self.task(task)?;
        let workdir = self.task_dir(task)?;
        let outputs = record
            .declared_outputs()
            .iter()
            .map(|a| (a.clone(), workdir.join(a.file_name())))
            .collect();

        Ok(ScheduledTask {
            id: task,
            work: record.work,
            label: self.qualified_label(task),
            kind: record.kind(),
            cmd: record.job.cmd.clone(),
            inputs: self.inputs_of(task)?,
            outputs,
            workdir,
        })
    }

    /// Run the work's finishing action. Called at most once per work.
    fn finish_work(&mut self, work: WorkId, step: &mut FlowStep) {
        let result = {
            let node = &self.works[work.0];
            let ctx = FinishContext {
                work,
                label: &node.label,
                outdir: self.work_outdir(work),
                members: node
                    .tasks
                    .iter()
                    .map(|t| MemberOutputs {
                        task: *t,
                        kind: self.tasks[t.0].kind(),
                        outputs: &self.tasks[t.0].outputs,
                    })
                    .collect(),
            };
            match self.finisher_of(&node.finisher) {
                Some(action) => action.on_all_ok(&ctx),
                None => WorkResult::failed(format!(
                    "finishing action {:?} is not registered",
                    node.finisher
                )),
            }
        };

        let node = &mut self.works[work.0];
        node.finalized = true;
        node.result = Some(result.clone());
        step.finished_works.push(work);

        if result.success {
            info!(work = %work, label = %node.label, message = %result.message, "work finished");
            return;
        }

        error!(
            work = %work,
            label = %node.label,
            message = %result.message,
            "finishing action failed"
        );
        step.failed_aggregations.push(work);
        let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
        let blocked = mgr.mark_dependents_unreachable(NodeId::Work(work));
        step.newly_unreachable.extend(blocked);
        step.newly_unreachable.sort();
    }

    /// Direct task dependents of `sources` that are now runnable.
    fn ready_dependents(&self, sources: &[NodeId]) -> Vec<TaskId> {
        let ro = ReadOnlyStateManager::new(&self.tasks, &self.works);
        let mut ready: Vec<TaskId> = sources
            .iter()
            .flat_map(|n| self.graph.dependents_of(*n))
            .filter_map(|n| match n {
                NodeId::Task(t) => Some(t),
                NodeId::Work(_) => None,
            })
            .filter(|t| {
                let task = &self.tasks[t.0];
                task.status == TaskStatus::Init && ro.is_ready(task)
            })
            .collect();
        ready.sort();
        ready.dedup();
        ready
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;
    use std::path::PathBuf;

    use super::*;
    use crate::dag::{Deps, JobSpec};
    use crate::flow::finish::Finisher;
    use crate::flow::work::Work;

    fn out(artifact: &str) -> BTreeMap<Artifact, PathBuf> {
        BTreeMap::from([(Artifact::from(artifact), PathBuf::from(format!("/tmp/out_{artifact}")))])
    }

    #[test]
    fn runnable_tasks_are_handed_out_once() {
        let mut flow = Flow::new("/tmp/flow");
        let mut work = Work::new();
        let a = work.register_task(JobSpec::generic(["X"]), Deps::new());
        work.register_task(JobSpec::generic(["Y"]), Deps::new().on(a, "X"));
        flow.register_work(work).unwrap();

        assert_eq!(flow.next_runnable(), vec![TaskId(0)]);
        assert!(flow.next_runnable().is_empty());

        flow.mark_running(TaskId(0)).unwrap();
        let step = flow.mark_succeeded(TaskId(0), out("X")).unwrap();
        assert_eq!(step.newly_ready, vec![TaskId(1)]);
        assert!(!step.flow_done);
        assert_eq!(flow.next_runnable(), vec![TaskId(1)]);
    }

    #[test]
    fn starting_a_blocked_task_is_rejected() {
        let mut flow = Flow::new("/tmp/flow");
        let mut work = Work::new();
        let a = work.register_task(JobSpec::generic(["X"]), Deps::new());
        work.register_task(JobSpec::generic(["Y"]), Deps::new().on(a, "X"));
        flow.register_work(work).unwrap();

        assert!(matches!(
            flow.mark_running(TaskId(1)),
            Err(FlowError::NotReady(TaskId(1)))
        ));
        assert!(matches!(
            flow.mark_succeeded(TaskId(0), out("X")),
            Err(FlowError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn missing_outputs_keep_the_task_running() {
        let mut flow = Flow::new("/tmp/flow");
        let mut work = Work::new();
        work.register_task(JobSpec::generic(["X", "Y"]), Deps::new());
        flow.register_work(work).unwrap();

        flow.mark_running(TaskId(0)).unwrap();
        let err = flow.mark_succeeded(TaskId(0), out("X")).unwrap_err();
        assert!(matches!(err, FlowError::MissingOutputs { .. }));
        assert_eq!(flow.task(TaskId(0)).unwrap().status(), TaskStatus::Running);

        flow.mark_failed(TaskId(0), "no Y").unwrap();
        assert_eq!(flow.works()[0].status(), WorkStatus::Failed);
        assert!(flow.is_done());
    }

    #[test]
    fn finisher_runs_once_when_work_completes() {
        let dir = tempfile::tempdir().unwrap();
        let mut flow = Flow::new(dir.path());
        let mut work = Work::new().with_finisher(Finisher::merge(["X"]));
        work.register_task(JobSpec::generic(["X"]), Deps::new());
        work.register_task(JobSpec::generic(["X"]), Deps::new());
        let w = flow.register_work(work).unwrap();

        flow.next_runnable();
        flow.mark_running(TaskId(0)).unwrap();
        let step = flow.mark_succeeded(TaskId(0), out("X")).unwrap();
        assert!(step.finished_works.is_empty());

        flow.mark_running(TaskId(1)).unwrap();
        let step = flow.mark_succeeded(TaskId(1), out("X")).unwrap();
        assert_eq!(step.finished_works, vec![w]);
        assert!(step.flow_done);

        let results = flow.work_results();
        assert!(results[&w].success);
        assert!(results[&w].outputs.contains_key(&Artifact::from("X")));
    }

    #[test]
    fn schedule_resolves_inputs_and_output_paths() {
        let mut flow = Flow::new("/runs");
        let mut work = Work::new().with_label("gs");
        let a = work.register_task(JobSpec::generic(["X"]), Deps::new());
        work.register_task(JobSpec::generic(["Y"]), Deps::new().on(a, "X"));
        flow.register_work(work).unwrap();

        flow.next_runnable();
        flow.mark_running(TaskId(0)).unwrap();
        flow.mark_succeeded(TaskId(0), out("X")).unwrap();

        let job = flow.schedule(TaskId(1)).unwrap();
        assert_eq!(job.workdir, PathBuf::from("/runs/w0/t1"));
        assert_eq!(job.inputs, vec![(Artifact::from("X"), PathBuf::from("/tmp/out_X"))]);
        assert_eq!(
            job.outputs,
            vec![(Artifact::from("Y"), PathBuf::from("/runs/w0/t1/out_Y"))]
        );
        assert_eq!(job.label, "gs.generic1");
    }
}
