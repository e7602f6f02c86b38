// src/exec/mod.rs

//! Job building and process execution.
//!
//! - [`job`] turns a job spec into the descriptor a task carries.
//! - [`task_runner`] runs one task's command with `tokio::process::Command`
//!   and reports back to the runtime via `RuntimeEvent`s.
//! - [`backend`] provides the `ExecutorBackend` trait and a concrete
//!   `RealExecutorBackend` that the runtime uses in production, and which
//!   tests can replace with a fake implementation.

pub mod backend;
pub mod job;
pub mod task_runner;

pub use backend::{ExecutorBackend, RealExecutorBackend};
pub use job::{DefaultJobBuilder, JobBuilder};
pub use task_runner::INPUT_ENV_PREFIX;
