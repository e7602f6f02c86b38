// src/config/mod.rs

//! Configuration loading and validation for flowdag.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load a config file from disk (`loader.rs`).
//! - Validate references and acyclicity (`validate.rs`).
//! - Build a [`Flow`](crate::flow::Flow) from a validated config (`build.rs`).

pub mod build;
pub mod loader;
pub mod model;
pub mod validate;

pub use build::build_flow;
pub use loader::{
    default_config_path, load_and_validate, load_from_path, load_from_str, DEFAULT_CONFIG_FILE,
};
pub use model::{
    ConfigFile, ConfigSection, DepConfig, FinishConfig, RawConfigFile, TaskConfig, WorkConfig,
};
