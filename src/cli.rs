// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Parser, ValueEnum};

use crate::config::DEFAULT_CONFIG_FILE;

/// Command-line arguments for `flowdag`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "flowdag",
    version,
    about = "Run multi-stage computations as a dependency graph of works and tasks.",
    long_about = None
)]
pub struct CliArgs {
    /// Path to the flow plan (TOML).
    ///
    /// Default: `Flowdag.toml` in the current working directory.
    #[arg(long, value_name = "PATH", default_value = DEFAULT_CONFIG_FILE)]
    pub config: PathBuf,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `FLOWDAG_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevel>,

    /// Parse, validate and build the flow, print it, but don't run anything.
    #[arg(long)]
    pub dry_run: bool,

    /// Where to persist flow state. Overrides `[config].state_file`.
    #[arg(long, value_name = "PATH")]
    pub state: Option<PathBuf>,

    /// Resume from the state file instead of building a fresh flow.
    #[arg(long)]
    pub resume: bool,

    /// Maximum number of jobs running at once. Overrides
    /// `[config].max_parallel`; 0 means unbounded.
    #[arg(long, value_name = "N")]
    pub max_parallel: Option<usize>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_and_overrides() {
        let args = CliArgs::try_parse_from(["flowdag"]).unwrap();
        assert_eq!(args.config, PathBuf::from("Flowdag.toml"));
        assert!(!args.resume);

        let args = CliArgs::try_parse_from([
            "flowdag",
            "--config",
            "plans/gkq.toml",
            "--state",
            "run/flow.json",
            "--resume",
            "--log-level",
            "debug",
        ])
        .unwrap();
        assert_eq!(args.state, Some(PathBuf::from("run/flow.json")));
        assert!(args.resume);
        assert!(matches!(args.log_level, Some(LogLevel::Debug)));
    }
}
