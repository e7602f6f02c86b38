// src/config/model.rs

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::Deserialize;

use crate::dag::Vars;
use crate::types::TaskKind;

/// Top-level configuration as read from a TOML file.
///
/// ```toml
/// [config]
/// workdir = "run"
/// eager_artifact_check = true
///
/// [work.gs]
/// finish = "noop"
///
/// [work.gs.task.scf]
/// kind = "scf"
/// cmd = "abinit scf.abi"
///
/// [work.ph]
/// finish = { merge = ["DDB", "POT->DVDB"] }
///
/// [work.ph.task.q1]
/// kind = "phonon"
/// deps = [{ producer = "gs.scf", artifacts = ["WFK"] }]
/// vars = { qpt = [0.5, 0.0, 0.0] }
/// dedup = ["qpt"]
/// ```
///
/// Deserialized as-is; [`ConfigFile`] is the validated form.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RawConfigFile {
    /// Global behaviour config from `[config]`.
    #[serde(default)]
    pub config: ConfigSection,

    /// All works from `[work.<name>]`, keyed by work label.
    #[serde(default)]
    pub work: BTreeMap<String, WorkConfig>,
}

/// Validated configuration. Only obtainable through `TryFrom<RawConfigFile>`.
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub config: ConfigSection,
    pub work: BTreeMap<String, WorkConfig>,
}

impl ConfigFile {
    pub(crate) fn new_unchecked(config: ConfigSection, work: BTreeMap<String, WorkConfig>) -> Self {
        Self { config, work }
    }

    /// Number of task entries across all works (before deduplication).
    pub fn task_count(&self) -> usize {
        self.work.values().map(|w| w.task.len()).sum()
    }
}

/// `[config]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConfigSection {
    /// Root directory for task and work output directories.
    #[serde(default = "default_workdir")]
    pub workdir: PathBuf,

    /// Reject dependencies on artifacts a producer never declares at
    /// registration time instead of leaving the consumer waiting forever.
    #[serde(default = "default_eager_artifact_check")]
    pub eager_artifact_check: bool,

    /// Where to persist the flow state after every change.
    #[serde(default)]
    pub state_file: Option<PathBuf>,

    /// Maximum number of jobs running at once; `0` means unbounded.
    #[serde(default)]
    pub max_parallel: usize,
}

fn default_workdir() -> PathBuf {
    PathBuf::from("run")
}

fn default_eager_artifact_check() -> bool {
    true
}

impl Default for ConfigSection {
    fn default() -> Self {
        Self {
            workdir: default_workdir(),
            eager_artifact_check: default_eager_artifact_check(),
            state_file: None,
            max_parallel: 0,
        }
    }
}

/// `[work.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct WorkConfig {
    #[serde(default)]
    pub finish: FinishConfig,

    /// Member tasks from `[work.<name>.task.<name>]`.
    #[serde(default)]
    pub task: BTreeMap<String, TaskConfig>,
}

/// `finish = "noop"`, `finish = { merge = ["DDB", "POT->DVDB"] }` or
/// `finish = { named = "my_action" }`.
///
/// `named` refers to an action registered with `Flow::register_finisher`, so
/// it is only usable when the plan is built through the library. The
/// `flowdag` binary registers none and refuses to run such a plan.
#[derive(Debug, Clone, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FinishConfig {
    #[default]
    Noop,
    Merge(Vec<String>),
    Named(String),
}

/// `[work.<name>.task.<name>]` section.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct TaskConfig {
    pub kind: TaskKind,

    /// Shell command run by the real executor.
    #[serde(default)]
    pub cmd: Option<String>,

    /// Overrides the artifacts the kind declares by default.
    #[serde(default)]
    pub outputs: Option<Vec<String>>,

    /// Opaque job parameters.
    #[serde(default)]
    pub vars: Vars,

    #[serde(default)]
    pub deps: Vec<DepConfig>,

    /// Parameters identifying equivalent tasks within the work. Empty means
    /// the task is never merged with another.
    #[serde(default)]
    pub dedup: Vec<String>,

    /// Subset of `dedup` holding reduced coordinates (folded into `[0, 1)`).
    #[serde(default)]
    pub reduced: Vec<String>,
}

/// One entry of `deps = [...]`.
///
/// `producer` is `"<work>.<task>"` for a task, or `"<work>"` for the
/// consolidated artifacts of a work.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DepConfig {
    pub producer: String,
    pub artifacts: Vec<String>,
}

/// Parsed form of [`DepConfig::producer`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ProducerRef<'a> {
    Work(&'a str),
    Task(&'a str, &'a str),
}

impl DepConfig {
    pub fn producer_ref(&self) -> ProducerRef<'_> {
        match self.producer.split_once('.') {
            Some((work, task)) => ProducerRef::Task(work, task),
            None => ProducerRef::Work(&self.producer),
        }
    }
}
