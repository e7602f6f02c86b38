// src/exec/job.rs

//! Job-specification interface: turn a [`JobSpec`] into a ready-to-submit
//! [`JobDescriptor`].
//!
//! Generating real simulation inputs is the collaborator's business; the
//! default builder only decides which artifacts each kind of job leaves
//! behind and which command (if any) runs it.

use serde_json::Value;

use crate::dag::{Artifact, JobDescriptor, JobSpec};
use crate::errors::{FlowError, Result};
use crate::types::TaskKind;

/// Builds the job descriptor for one kind of task.
pub trait JobBuilder: Send + Sync {
    fn build(&self, spec: &JobSpec) -> Result<JobDescriptor>;
}

/// Built-in builder covering every [`TaskKind`].
///
/// Parameters it understands:
/// - `cmd` (string): shell command for the real executor.
/// - `outputs` (array of strings): overrides the kind's declared outputs;
///   required for `Generic` jobs that produce anything.
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultJobBuilder;

impl DefaultJobBuilder {
    /// Artifacts a job of this kind produces unless told otherwise.
    pub fn default_outputs(kind: TaskKind) -> &'static [&'static str] {
        match kind {
            TaskKind::Scf => &[Artifact::DEN, Artifact::WFK],
            TaskKind::Nscf => &[Artifact::WFK],
            TaskKind::Ddk => &[Artifact::DDK],
            TaskKind::Dde => &[Artifact::DDB],
            TaskKind::Phonon => &[Artifact::DDB, Artifact::POT],
            TaskKind::Elastic => &[Artifact::DDB],
            TaskKind::Eph => &[Artifact::GKQ],
            TaskKind::Generic => &[],
        }
    }
}

impl JobBuilder for DefaultJobBuilder {
    fn build(&self, spec: &JobSpec) -> Result<JobDescriptor> {
        let outputs = match spec.vars.get("outputs") {
            Some(value) => parse_outputs(value)?,
            None => Self::default_outputs(spec.kind)
                .iter()
                .map(|a| Artifact::from(*a))
                .collect(),
        };

        let cmd = match spec.vars.get("cmd") {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => {
                return Err(FlowError::config(format!(
                    "`cmd` of a {} job must be a string, got {other}",
                    spec.kind
                )));
            }
        };

        Ok(JobDescriptor {
            kind: spec.kind,
            cmd,
            outputs,
            vars: spec.vars.clone(),
        })
    }
}

fn parse_outputs(value: &Value) -> Result<Vec<Artifact>> {
    let items = value
        .as_array()
        .ok_or_else(|| FlowError::config(format!("`outputs` must be an array, got {value}")))?;

    let mut out: Vec<Artifact> = Vec::with_capacity(items.len());
    for item in items {
        let name = item
            .as_str()
            .ok_or_else(|| FlowError::config(format!("output name must be a string, got {item}")))?;
        let artifact: Artifact = name.parse()?;
        if !out.contains(&artifact) {
            out.push(artifact);
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dag::Vars;
    use serde_json::json;

    #[test]
    fn kinds_get_default_outputs() {
        let spec = JobSpec::new(TaskKind::Phonon, Vars::new());
        let job = DefaultJobBuilder.build(&spec).unwrap();
        assert_eq!(job.outputs, vec![Artifact::from("DDB"), Artifact::from("POT")]);
        assert_eq!(job.cmd, None);
    }

    #[test]
    fn outputs_and_cmd_come_from_vars() {
        let spec = JobSpec::generic(["x", "y"]).with_var("cmd", "touch out_X out_Y");
        let job = DefaultJobBuilder.build(&spec).unwrap();
        assert_eq!(job.outputs, vec![Artifact::from("X"), Artifact::from("Y")]);
        assert_eq!(job.cmd.as_deref(), Some("touch out_X out_Y"));
    }

    #[test]
    fn malformed_vars_are_configuration_errors() {
        let spec = JobSpec::new(TaskKind::Generic, Vars::new()).with_var("outputs", "X");
        assert!(matches!(
            DefaultJobBuilder.build(&spec),
            Err(FlowError::Configuration(_))
        ));

        let spec = JobSpec::new(TaskKind::Scf, Vars::new()).with_var("cmd", json!(["abinit"]));
        assert!(DefaultJobBuilder.build(&spec).is_err());
    }
}
