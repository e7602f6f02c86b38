// src/flow/build.rs

//! Registration of works, tasks and dependency edges.
//!
//! Every registration validates all of its edges before touching the flow,
//! so a rejected call leaves the graph unchanged.

use tracing::{debug, info, warn};

use crate::dag::{
    normalize_edges, DependencyEdge, Deps, JobDescriptor, JobSpec, NodeId, Producer,
    ReadOnlyStateManager, StateManager, Task, Vars,
};
use crate::errors::{FlowError, Result};
use crate::flow::finish::Finisher;
use crate::flow::work::{Work, WorkNode};
use crate::flow::Flow;
use crate::types::{TaskId, TaskKind, TaskStatus, WorkId};

/// Tasks of a work being registered that are not in the flow yet.
struct Staged<'a> {
    base: usize,
    jobs: &'a [JobDescriptor],
}

impl Flow {
    /// Create an empty work; tasks are added with [`Flow::register_task`].
    pub fn new_work(&mut self, label: impl Into<String>, finisher: Finisher) -> WorkId {
        let id = WorkId(self.works.len());
        self.works.push(WorkNode::new(id, Some(label.into()), finisher));
        self.graph.add_work(id);
        debug!(work = %id, "registered empty work");
        id
    }

    /// Append a work and index its tasks into the global graph.
    pub fn register_work(&mut self, work: Work) -> Result<WorkId> {
        let id = WorkId(self.works.len());
        let base = self.tasks.len();

        let mut jobs: Vec<JobDescriptor> = Vec::with_capacity(work.tasks.len());
        let mut specs: Vec<JobSpec> = Vec::with_capacity(work.tasks.len());
        let mut all_edges: Vec<Vec<DependencyEdge>> = Vec::with_capacity(work.tasks.len());

        for (pos, pending) in work.tasks.into_iter().enumerate() {
            let consumer = TaskId(base + pos);
            let deps = resolve_siblings(pending.deps, base, pos)?;
            let edges = normalize_edges(&[], deps)?;

            let staged = Staged {
                base,
                jobs: &jobs,
            };
            for edge in &edges {
                self.check_edge(edge, consumer, id, Some(&staged))?;
            }

            jobs.push(self.builder_for(pending.spec.kind).build(&pending.spec)?);
            specs.push(pending.spec);
            all_edges.push(edges);
        }

        // Everything checked; commit.
        self.works.push(WorkNode::new(id, work.label, work.finisher));
        self.graph.add_work(id);

        for (pos, ((spec, job), edges)) in specs
            .into_iter()
            .zip(jobs)
            .zip(all_edges)
            .enumerate()
        {
            self.commit_task(TaskId(base + pos), id, pos, spec, job, edges);
        }

        self.refresh_after_registration(id);
        info!(
            work = %id,
            label = %self.works[id.0].label,
            tasks = self.works[id.0].tasks.len(),
            "registered work"
        );
        Ok(id)
    }

    /// Register one more task into an existing work.
    ///
    /// Allowed at any time before the work's finishing action ran, including
    /// after some of its tasks already succeeded.
    pub fn register_task(&mut self, work: WorkId, spec: JobSpec, deps: Deps) -> Result<TaskId> {
        let node = self.work(work)?;
        if node.finalized {
            return Err(FlowError::config(format!(
                "work '{}' already ran its finishing action; cannot add tasks",
                node.label
            )));
        }

        let id = TaskId(self.tasks.len());
        let pos = node.tasks.len();

        if deps.edges().iter().any(|e| matches!(e.producer, Producer::Sibling(_))) {
            return Err(FlowError::config(
                "sibling producers are only valid inside Work::register_task",
            ));
        }
        let edges = normalize_edges(&[], deps)?;
        for edge in &edges {
            self.check_edge(edge, id, work, None)?;
        }
        let job = self.builder_for(spec.kind).build(&spec)?;

        self.commit_task(id, work, pos, spec, job, edges);
        self.refresh_after_registration(work);
        debug!(task = %id, work = %work, "registered task");
        Ok(id)
    }

    pub fn register(&mut self, work: WorkId, kind: TaskKind, vars: Vars, deps: Deps) -> Result<TaskId> {
        self.register_task(work, JobSpec::new(kind, vars), deps)
    }

    /// Register a ground-state task in a work of its own.
    pub fn register_scf_task(&mut self, vars: Vars) -> Result<TaskId> {
        let work = self.new_work("scf", Finisher::Noop);
        self.register(work, TaskKind::Scf, vars, Deps::new())
    }

    /// Add dependencies to a task that has not been handed out yet.
    pub fn add_deps(&mut self, task: TaskId, deps: Deps) -> Result<()> {
        let current = self.task(task)?;
        if current.status != TaskStatus::Init {
            return Err(FlowError::config(format!(
                "cannot add dependencies to task {task} in status {}",
                current.status
            )));
        }
        let work = current.work;

        if deps.edges().iter().any(|e| matches!(e.producer, Producer::Sibling(_))) {
            return Err(FlowError::config(
                "sibling producers are only valid inside Work::register_task",
            ));
        }
        let edges = normalize_edges(&current.deps, deps)?;
        for edge in &edges {
            self.check_edge(edge, task, work, None)?;
        }

        for edge in &edges {
            if let Some(node) = NodeId::from_producer(edge.producer) {
                self.graph.add_dependency(node, task);
            }
        }
        let doomed = self.any_doomed(&edges);
        self.task_mut(task)?.deps.extend(edges);

        if doomed {
            self.block_task(task);
        }
        Ok(())
    }

    /// Check every edge against the producer's declared outputs.
    ///
    /// Reports all latent problems at once; `Ok` means every dependency can
    /// in principle be satisfied.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();

        for task in &self.tasks {
            for edge in &task.deps {
                if let Err(e) = self.check_declared(edge) {
                    problems.push(format!("{}: {e}", self.qualified_label(task.id)));
                }
            }
        }

        if problems.is_empty() {
            Ok(())
        } else {
            Err(FlowError::config(problems.join("; ")))
        }
    }

    fn check_edge(
        &self,
        edge: &DependencyEdge,
        consumer: TaskId,
        consumer_work: WorkId,
        staged: Option<&Staged<'_>>,
    ) -> Result<()> {
        match edge.producer {
            Producer::Task(t) if t.0 < self.tasks.len() => {
                if self.graph.would_cycle(NodeId::Task(t), consumer, consumer_work) {
                    return Err(FlowError::DagCycle(format!(
                        "task {consumer} depending on {t} closes a cycle"
                    )));
                }
                let producer = &self.tasks[t.0];
                if producer.status == TaskStatus::Succeeded
                    && !producer.outputs.contains_key(&edge.artifact)
                {
                    return Err(FlowError::config(format!(
                        "dangling artifact: {t} finished without {}",
                        edge.artifact
                    )));
                }
            }
            Producer::Task(t) => {
                let known = staged.is_some_and(|s| t.0 >= s.base && t.0 - s.base < s.jobs.len());
                if !known {
                    return Err(FlowError::config(format!(
                        "task {consumer} depends on unknown task {t}"
                    )));
                }
            }
            Producer::Work(w) if w == consumer_work => {
                return Err(FlowError::DagCycle(format!(
                    "task {consumer} cannot depend on its own work {w}"
                )));
            }
            Producer::Work(w) if w.0 < self.works.len() => {
                if self.graph.would_cycle(NodeId::Work(w), consumer, consumer_work) {
                    return Err(FlowError::DagCycle(format!(
                        "task {consumer} depending on work {w} closes a cycle"
                    )));
                }
                let producer = &self.works[w.0];
                if producer.exposes_outputs()
                    && !producer
                        .result
                        .as_ref()
                        .is_some_and(|r| r.outputs.contains_key(&edge.artifact))
                {
                    return Err(FlowError::config(format!(
                        "dangling artifact: work {w} finished without {}",
                        edge.artifact
                    )));
                }
            }
            Producer::Work(w) => {
                return Err(FlowError::config(format!(
                    "task {consumer} depends on unknown work {w}"
                )));
            }
            Producer::Sibling(i) => {
                return Err(FlowError::config(format!(
                    "unresolved sibling producer #{i}"
                )));
            }
        }

        if self.options.eager_artifact_check {
            match (edge.producer, staged) {
                (Producer::Task(t), Some(s)) if t.0 >= s.base => {
                    let job = &s.jobs[t.0 - s.base];
                    if !job.outputs.contains(&edge.artifact) {
                        return Err(FlowError::config(format!(
                            "{t} ({}) never produces {}",
                            job.kind, edge.artifact
                        )));
                    }
                }
                _ => self.check_declared(edge)?,
            }
        }

        Ok(())
    }

    /// Whether the producer of `edge` declares the requested artifact.
    fn check_declared(&self, edge: &DependencyEdge) -> Result<()> {
        match edge.producer {
            Producer::Task(t) => {
                let producer = self.task(t)?;
                if producer.declared_outputs().contains(&edge.artifact) {
                    Ok(())
                } else {
                    Err(FlowError::config(format!(
                        "{t} ({}) never produces {}",
                        producer.kind(),
                        edge.artifact
                    )))
                }
            }
            Producer::Work(w) => {
                let producer = self.work(w)?;
                let action = self.finisher_of(&producer.finisher).ok_or_else(|| {
                    FlowError::config(format!(
                        "work '{}' uses an unregistered finishing action",
                        producer.label
                    ))
                })?;
                if action.produces().contains(&edge.artifact) {
                    Ok(())
                } else {
                    Err(FlowError::config(format!(
                        "work '{}' never exposes {}",
                        producer.label, edge.artifact
                    )))
                }
            }
            Producer::Sibling(i) => Err(FlowError::config(format!(
                "unresolved sibling producer #{i}"
            ))),
        }
    }

    fn commit_task(
        &mut self,
        id: TaskId,
        work: WorkId,
        pos: usize,
        spec: JobSpec,
        job: JobDescriptor,
        edges: Vec<DependencyEdge>,
    ) {
        self.graph.add_task(id, work);
        for edge in &edges {
            if let Some(node) = NodeId::from_producer(edge.producer) {
                self.graph.add_dependency(node, id);
            }
        }

        let doomed = self.any_doomed(&edges);
        let mut task = Task::new(id, work, pos, spec, job, edges);
        if doomed {
            warn!(task = %id, "registered below a failed producer; marking Unreachable");
            task.block();
        }

        self.tasks.push(task);
        self.works[work.0].tasks.push(id);
    }

    fn any_doomed(&self, edges: &[DependencyEdge]) -> bool {
        let ro = ReadOnlyStateManager::new(&self.tasks, &self.works);
        edges.iter().any(|e| ro.is_doomed(e.producer))
    }

    fn block_task(&mut self, task: TaskId) {
        let work = self.tasks[task.0].work;
        if self.tasks[task.0].block() {
            warn!(task = %task, "dependency can never be satisfied; marking Unreachable");
            let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
            mgr.mark_dependents_unreachable(NodeId::Task(task));
        }
        self.refresh_after_registration(work);
    }

    fn refresh_after_registration(&mut self, work: WorkId) {
        let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
        mgr.refresh_work(work);
        if self.works[work.0].is_doomed() {
            let mut mgr = StateManager::new(&self.graph, &mut self.tasks, &mut self.works);
            mgr.mark_dependents_unreachable(NodeId::Work(work));
        }
    }
}

/// Replace `Producer::Sibling(i)` with the id the sibling will receive.
fn resolve_siblings(deps: Deps, base: usize, pos: usize) -> Result<Deps> {
    deps.into_edges()
        .into_iter()
        .map(|edge| match edge.producer {
            Producer::Sibling(i) if i < pos => Ok(DependencyEdge {
                producer: Producer::Task(TaskId(base + i)),
                artifact: edge.artifact,
            }),
            Producer::Sibling(i) => Err(FlowError::config(format!(
                "task #{pos} of a work depends on sibling #{i}, which is not registered before it"
            ))),
            _ => Ok(edge),
        })
        .collect()
}
