// src/engine/runtime.rs

use std::fmt;

use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::dag::ScheduledTask;
use crate::errors::Result;
use crate::exec::ExecutorBackend;
use crate::flow::Flow;

use super::core::CoreRuntime;
use super::{CoreCommand, CoreStep, RuntimeEvent};

/// Drives the flow in response to `RuntimeEvent`s, and delegates actual job
/// execution to an `ExecutorBackend`.
///
/// This is a pure IO shell around `CoreRuntime`, which contains all the
/// runtime semantics. This struct handles async IO: reading events from
/// channels, dispatching tasks to the executor and writing snapshots.
pub struct Runtime<E: ExecutorBackend> {
    core: CoreRuntime,
    event_rx: mpsc::Receiver<RuntimeEvent>,
    executor: E,
}

impl<E: ExecutorBackend> fmt::Debug for Runtime<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Runtime")
            .field("core", &self.core)
            .finish_non_exhaustive()
    }
}

impl<E: ExecutorBackend> Runtime<E> {
    pub fn new(core: CoreRuntime, event_rx: mpsc::Receiver<RuntimeEvent>, executor: E) -> Self {
        Self {
            core,
            event_rx,
            executor,
        }
    }

    /// Main event loop. Returns the flow in its final state.
    ///
    /// - Dispatches the initially runnable tasks.
    /// - Consumes `RuntimeEvent`s from `event_rx` and feeds them into the
    ///   core runtime.
    /// - Executes commands returned by the core (spawn tasks, persist, exit).
    pub async fn run(mut self) -> Result<Flow> {
        info!(
            works = self.core.flow().len_works(),
            tasks = self.core.flow().len_tasks(),
            "flowdag runtime started"
        );

        let step = self.core.start();
        let mut keep_running = self.apply(step).await?;

        while keep_running {
            let event = match self.event_rx.recv().await {
                Some(e) => e,
                None => {
                    info!("runtime event channel closed; exiting");
                    break;
                }
            };

            debug!(?event, "runtime received event");

            let step = self.core.step(event);
            keep_running = self.apply(step).await?;

            if !keep_running {
                info!("core requested exit; stopping runtime");
            }
        }

        info!("runtime exiting");
        Ok(self.core.into_flow())
    }

    async fn apply(&mut self, step: CoreStep) -> Result<bool> {
        for command in step.commands {
            self.execute_command(command).await?;
        }
        Ok(step.keep_running)
    }

    /// Execute a single command from the core.
    async fn execute_command(&mut self, command: CoreCommand) -> Result<()> {
        match command {
            CoreCommand::DispatchTasks(tasks) => {
                self.spawn_ready(tasks).await?;
            }
            CoreCommand::PersistSnapshot => {
                if let Some(path) = &self.core.options().state_file {
                    self.core.flow().save(path)?;
                }
            }
            CoreCommand::RequestExit => {
                // The core already returns keep_running=false alongside this.
                debug!("core issued RequestExit command");
            }
        }
        Ok(())
    }

    async fn spawn_ready(&mut self, tasks: Vec<ScheduledTask>) -> Result<()> {
        if tasks.is_empty() {
            return Ok(());
        }

        let labels: Vec<_> = tasks.iter().map(|t| t.label.as_str()).collect();
        debug!(?labels, "spawning ready tasks");

        self.executor.spawn_ready_tasks(tasks).await
    }
}
