// src/engine/mod.rs

//! Orchestration engine for flowdag.
//!
//! This module ties together:
//! - the [`Flow`](crate::flow::Flow) and its driver interface
//! - the executor backend that runs handed-out tasks
//! - the main runtime event loop that reacts to:
//!   - task completion events
//!   - shutdown signals
//!
//! The pure core state machine lives in [`core`]; the async/IO shell is
//! implemented in [`runtime`].

use std::collections::BTreeMap;
use std::path::PathBuf;

use crate::dag::Artifact;
use crate::types::TaskId;

/// Outcome of a task job as reported by an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    /// Job exited cleanly; the artifacts it left behind.
    Success(BTreeMap<Artifact, PathBuf>),
    Failed(String),
}

/// Runtime options used by both the core and the async shell.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOptions {
    /// Persist a snapshot here after every state change.
    pub state_file: Option<PathBuf>,
}

/// Events flowing into the runtime from executors and signal handlers.
#[derive(Debug, Clone)]
pub enum RuntimeEvent {
    /// A task job finished with a concrete outcome.
    TaskCompleted { task: TaskId, outcome: TaskOutcome },
    /// Graceful shutdown requested (e.g. Ctrl-C).
    ShutdownRequested,
}

pub mod core;
pub mod event_handlers;
pub mod runtime;

pub use core::CoreRuntime;
pub use event_handlers::{CoreCommand, CoreStep};
pub use runtime::Runtime;
