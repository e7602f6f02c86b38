// src/errors.rs

//! Crate-wide error type and result alias.
//!
//! Build-time mistakes (bad dependency wiring) surface as
//! [`FlowError::Configuration`] or [`FlowError::DagCycle`] and are never
//! retried. Driver misuse (reporting an outcome for a task in the wrong state)
//! gets its own variants so callers can tell it apart from a bad graph.

use thiserror::Error;

use crate::types::{TaskId, TaskStatus, WorkId};

#[derive(Error, Debug)]
pub enum FlowError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cycle detected in dependency graph: {0}")]
    DagCycle(String),

    #[error("Task {task} failed: {reason}")]
    TaskFailure { task: TaskId, reason: String },

    #[error("Finishing action of work {work} failed: {message}")]
    Aggregation { work: WorkId, message: String },

    #[error("Task {task} cannot go from {from} to {to}")]
    InvalidTransition {
        task: TaskId,
        from: TaskStatus,
        to: TaskStatus,
    },

    #[error("Task {task} finished without declared outputs: {missing:?}")]
    MissingOutputs { task: TaskId, missing: Vec<String> },

    #[error("Task {0} has unsatisfied dependencies")]
    NotReady(TaskId),

    #[error("Task not found: {0}")]
    UnknownTask(TaskId),

    #[error("Work not found: {0}")]
    UnknownWork(WorkId),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl FlowError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        FlowError::Configuration(msg.into())
    }

    /// Whether this is a build-time configuration problem (cycles included).
    pub fn is_configuration(&self) -> bool {
        matches!(self, FlowError::Configuration(_) | FlowError::DagCycle(_))
    }
}

pub use anyhow::Error;
pub type Result<T> = std::result::Result<T, FlowError>;
