// src/dag/mod.rs

//! Dependency graph and per-task state.
//!
//! - [`edge`] defines artifacts, producers and the canonical edge list.
//! - [`task`] holds task records and the job spec/descriptor pair.
//! - [`graph`] is the global producer -> consumer graph with cycle checks.
//! - [`state_manager`] evaluates readiness and propagates failures.
//! - [`scheduler_step`] defines the result type of a status change.

pub mod edge;
pub mod graph;
pub mod scheduler_step;
pub mod state_manager;
pub mod task;

pub use edge::{normalize_edges, Artifact, DependencyEdge, Deps, Producer};
pub use graph::{DepGraph, NodeId};
pub use scheduler_step::FlowStep;
pub use state_manager::{ReadOnlyStateManager, StateManager};
pub use task::{JobDescriptor, JobSpec, ScheduledTask, Task, Vars};
