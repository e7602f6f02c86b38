use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Global index of a task inside its [`Flow`](crate::flow::Flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub usize);

/// Index of a work inside its [`Flow`](crate::flow::Flow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkId(pub usize);

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "t{}", self.0)
    }
}

impl fmt::Display for WorkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

/// Lifecycle of a single task.
///
/// - `Init`: registered, dependencies possibly unsatisfied.
/// - `Ready`: handed out by `Flow::next_runnable`, not started yet.
/// - `Running`: the driver reported the external job as started.
/// - `Succeeded` / `Failed`: reported by the driver.
/// - `Unreachable`: an ancestor failed; the task will never run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Init,
    Ready,
    Running,
    Succeeded,
    Failed,
    Unreachable,
}

impl TaskStatus {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Succeeded | TaskStatus::Failed | TaskStatus::Unreachable
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Init => "Init",
            TaskStatus::Ready => "Ready",
            TaskStatus::Running => "Running",
            TaskStatus::Succeeded => "Succeeded",
            TaskStatus::Failed => "Failed",
            TaskStatus::Unreachable => "Unreachable",
        };
        f.write_str(s)
    }
}

/// Aggregate status of a work, derived from its member tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkStatus {
    Pending,
    Succeeded,
    /// At least one member failed on its own.
    Failed,
    /// No member failed, but at least one is blocked by an upstream failure.
    Unreachable,
}

impl WorkStatus {
    pub fn is_terminal(self) -> bool {
        !matches!(self, WorkStatus::Pending)
    }
}

impl fmt::Display for WorkStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            WorkStatus::Pending => "Pending",
            WorkStatus::Succeeded => "Succeeded",
            WorkStatus::Failed => "Failed",
            WorkStatus::Unreachable => "Unreachable",
        };
        f.write_str(s)
    }
}

/// Kind of external job a task stands for.
///
/// The kind only selects which [`JobBuilder`](crate::exec::JobBuilder) turns
/// the task's parameters into a job descriptor; graph semantics never depend
/// on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    /// Ground-state self-consistent run.
    Scf,
    /// Non self-consistent run on top of a density.
    Nscf,
    /// Derivative of wavefunctions with respect to k.
    Ddk,
    /// Electric-field perturbation.
    Dde,
    /// Atomic-displacement perturbation at one q-point.
    Phonon,
    /// Strain perturbation.
    #[serde(alias = "strain")]
    Elastic,
    /// Electron-phonon matrix elements.
    Eph,
    /// Anything else; declared outputs come from the job parameters.
    Generic,
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskKind::Scf => "scf",
            TaskKind::Nscf => "nscf",
            TaskKind::Ddk => "ddk",
            TaskKind::Dde => "dde",
            TaskKind::Phonon => "phonon",
            TaskKind::Elastic => "elastic",
            TaskKind::Eph => "eph",
            TaskKind::Generic => "generic",
        };
        f.write_str(s)
    }
}

impl FromStr for TaskKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "scf" => Ok(TaskKind::Scf),
            "nscf" => Ok(TaskKind::Nscf),
            "ddk" => Ok(TaskKind::Ddk),
            "dde" => Ok(TaskKind::Dde),
            "phonon" => Ok(TaskKind::Phonon),
            "elastic" | "strain" => Ok(TaskKind::Elastic),
            "eph" => Ok(TaskKind::Eph),
            "generic" => Ok(TaskKind::Generic),
            other => Err(format!("invalid task kind: {other}")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_states() {
        assert!(!TaskStatus::Init.is_terminal());
        assert!(!TaskStatus::Running.is_terminal());
        assert!(TaskStatus::Unreachable.is_terminal());
        assert!(!WorkStatus::Pending.is_terminal());
        assert!(WorkStatus::Unreachable.is_terminal());
    }

    #[test]
    fn kind_parsing_accepts_aliases() {
        assert_eq!("Strain".parse::<TaskKind>(), Ok(TaskKind::Elastic));
        assert_eq!(" phonon ".parse::<TaskKind>(), Ok(TaskKind::Phonon));
        assert!("relax".parse::<TaskKind>().is_err());
    }
}
