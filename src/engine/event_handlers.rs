// src/engine/event_handlers.rs

//! Event handling logic for the core runtime.

use std::collections::BTreeSet;

use tracing::{debug, error, info, warn};

use crate::dag::{FlowStep, ScheduledTask};
use crate::engine::{RuntimeOptions, TaskOutcome};
use crate::errors::FlowError;
use crate::flow::Flow;
use crate::types::{TaskId, WorkStatus};

/// Command produced by the pure core, to be executed by the outer IO shell.
#[derive(Debug, Clone)]
pub enum CoreCommand {
    /// Send these tasks to the executor.
    DispatchTasks(Vec<ScheduledTask>),
    /// Write the flow snapshot to the configured state file.
    PersistSnapshot,
    /// Request that the process exits (flow finished or stalled).
    RequestExit,
}

/// Decision returned by the core after handling a single `RuntimeEvent`.
#[derive(Debug, Clone)]
pub struct CoreStep {
    /// Commands the IO shell should execute (send tasks, persist, exit).
    pub commands: Vec<CoreCommand>,
    /// Whether the outer runtime loop should keep running.
    pub keep_running: bool,
}

/// Hand out every runnable task and mark it running.
///
/// A task whose inputs cannot be resolved is failed on the spot rather than
/// dispatched.
pub fn dispatch_runnable(flow: &mut Flow, in_flight: &mut BTreeSet<TaskId>) -> Vec<CoreCommand> {
    let mut scheduled = Vec::new();

    for id in flow.next_runnable() {
        let prepared = flow
            .schedule(id)
            .and_then(|job| flow.mark_running(id).map(|()| job));
        match prepared {
            Ok(job) => {
                in_flight.insert(id);
                scheduled.push(job);
            }
            Err(err) => {
                error!(task = %id, error = %err, "could not prepare task; marking Failed");
                if let Err(e) = flow.mark_failed(id, err.to_string()) {
                    warn!(task = %id, error = %e, "failed to record preparation failure");
                }
            }
        }
    }

    if scheduled.is_empty() {
        Vec::new()
    } else {
        vec![CoreCommand::DispatchTasks(scheduled)]
    }
}

/// Handle a task completion event.
///
/// A success that lacks declared outputs is recorded as a failure of the
/// task.
pub fn handle_task_completion(
    flow: &mut Flow,
    in_flight: &mut BTreeSet<TaskId>,
    options: &RuntimeOptions,
    task: TaskId,
    outcome: TaskOutcome,
) -> CoreStep {
    if !in_flight.remove(&task) {
        warn!(task = %task, "completion for a task that is not in flight; ignoring");
        return CoreStep {
            commands: Vec::new(),
            keep_running: true,
        };
    }

    let result = match outcome {
        TaskOutcome::Success(outputs) => match flow.mark_succeeded(task, outputs) {
            Err(FlowError::MissingOutputs { missing, .. }) => flow.mark_failed(
                task,
                format!("job exited cleanly but left no {}", missing.join(", ")),
            ),
            other => other,
        },
        TaskOutcome::Failed(reason) => flow.mark_failed(task, reason),
    };

    match result {
        Ok(step) => log_step(&step),
        Err(err) => error!(task = %task, error = %err, "could not record task outcome"),
    }

    let mut commands = dispatch_runnable(flow, in_flight);
    if options.state_file.is_some() {
        commands.push(CoreCommand::PersistSnapshot);
    }
    let keep_running = keep_running_or_exit(flow, in_flight, &mut commands);

    CoreStep {
        commands,
        keep_running,
    }
}

/// Exit once nothing is in flight: either the flow is done, or nothing can
/// make progress any more.
pub fn keep_running_or_exit(
    flow: &Flow,
    in_flight: &BTreeSet<TaskId>,
    commands: &mut Vec<CoreCommand>,
) -> bool {
    if !in_flight.is_empty() || has_dispatch(commands) {
        return true;
    }

    if flow.is_done() {
        info!(summary = %flow.summary(), "flow finished");
    } else {
        let stuck: Vec<&str> = flow
            .works()
            .iter()
            .filter(|w| w.status() == WorkStatus::Pending)
            .map(|w| w.label())
            .collect();
        warn!(?stuck, "no task can run but some works are still pending");
    }
    commands.push(CoreCommand::RequestExit);
    false
}

fn has_dispatch(commands: &[CoreCommand]) -> bool {
    commands
        .iter()
        .any(|c| matches!(c, CoreCommand::DispatchTasks(t) if !t.is_empty()))
}

fn log_step(step: &FlowStep) {
    for work in &step.finished_works {
        debug!(work = %work, "finishing action ran");
    }
    for work in &step.failed_aggregations {
        warn!(work = %work, "work finished with a failed aggregation");
    }
    if !step.newly_unreachable.is_empty() {
        warn!(tasks = ?step.newly_unreachable, "tasks became unreachable");
    }
}
