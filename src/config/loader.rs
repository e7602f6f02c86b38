// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::errors::Result;

/// Name of the plan file looked up when `--config` is not given.
pub const DEFAULT_CONFIG_FILE: &str = "Flowdag.toml";

/// Read and deserialize a flow plan without checking it.
///
/// Use [`load_and_validate`] to also resolve producer references, detect
/// cycles and check artifact names.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;
    debug!(path = %path.display(), bytes = contents.len(), "read flow plan");
    load_from_str(&contents)
}

/// Deserialize a flow plan from TOML text.
pub fn load_from_str(text: &str) -> Result<RawConfigFile> {
    Ok(toml::from_str(text)?)
}

/// Read a flow plan and validate it into a [`ConfigFile`].
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    ConfigFile::try_from(load_from_path(path)?)
}

/// [`DEFAULT_CONFIG_FILE`] in the current working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from(DEFAULT_CONFIG_FILE)
}
