// src/dag/scheduler_step.rs

//! Result type of a single status change reported to the flow.

use crate::types::{TaskId, WorkId};

/// Structured result of one driver call (`mark_succeeded`, `mark_failed`).
///
/// Useful for tests that step a flow by hand and for the runtime, which
/// logs it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FlowStep {
    /// `Init` tasks whose dependencies became satisfied by this change.
    /// They are handed out by the next `next_runnable` call.
    pub newly_ready: Vec<TaskId>,
    /// Tasks newly marked `Unreachable` because of this change.
    pub newly_unreachable: Vec<TaskId>,
    /// Works whose finishing action ran during this change.
    pub finished_works: Vec<WorkId>,
    /// Works whose finishing action reported a failure during this change.
    pub failed_aggregations: Vec<WorkId>,
    /// Whether every work is now terminal.
    pub flow_done: bool,
}
