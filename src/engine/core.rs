// src/engine/core.rs

//! Pure core runtime state machine.
//!
//! This module contains a synchronous, deterministic "core runtime" that
//! consumes [`RuntimeEvent`]s and produces:
//! - an updated flow state
//! - a list of "commands" describing what the IO shell should do next
//!
//! The async/IO-heavy shell (`engine::runtime::Runtime`) is responsible for:
//! - reading events from channels
//! - sending `ScheduledTask`s to the executor
//! - writing snapshots
//!
//! The core is unit tested without any Tokio, channels or processes.

use std::collections::BTreeSet;

use crate::engine::event_handlers::{
    dispatch_runnable, handle_task_completion, keep_running_or_exit, CoreStep,
};
use crate::engine::{RuntimeEvent, RuntimeOptions};
use crate::flow::Flow;
use crate::types::TaskId;

/// Pure core runtime state.
///
/// Owns the flow and the set of tasks currently handed to the executor.
#[derive(Debug)]
pub struct CoreRuntime {
    flow: Flow,
    in_flight: BTreeSet<TaskId>,
    options: RuntimeOptions,
}

impl CoreRuntime {
    pub fn new(flow: Flow, options: RuntimeOptions) -> Self {
        Self {
            flow,
            in_flight: BTreeSet::new(),
            options,
        }
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn into_flow(self) -> Flow {
        self.flow
    }

    pub fn options(&self) -> &RuntimeOptions {
        &self.options
    }

    pub fn in_flight(&self) -> &BTreeSet<TaskId> {
        &self.in_flight
    }

    /// Dispatch the initially runnable tasks.
    pub fn start(&mut self) -> CoreStep {
        let mut commands = dispatch_runnable(&mut self.flow, &mut self.in_flight);
        let keep_running = keep_running_or_exit(&self.flow, &self.in_flight, &mut commands);
        CoreStep {
            commands,
            keep_running,
        }
    }

    /// Handle a single runtime event, updating core state and returning the
    /// resulting commands for the IO shell.
    pub fn step(&mut self, event: RuntimeEvent) -> CoreStep {
        match event {
            RuntimeEvent::TaskCompleted { task, outcome } => handle_task_completion(
                &mut self.flow,
                &mut self.in_flight,
                &self.options,
                task,
                outcome,
            ),
            RuntimeEvent::ShutdownRequested => CoreStep {
                commands: Vec::new(),
                keep_running: false,
            },
        }
    }
}
