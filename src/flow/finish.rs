// src/flow/finish.rs

//! Finishing actions ("on all ok") run once a work's members all succeeded.

use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::dag::Artifact;
use crate::errors::{FlowError, Result};
use crate::types::{TaskId, TaskKind, WorkId};

/// Outcome of a finishing action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkResult {
    pub success: bool,
    pub message: String,
    /// Consolidated artifacts the work exposes to dependents.
    #[serde(default)]
    pub outputs: BTreeMap<Artifact, PathBuf>,
}

impl WorkResult {
    pub fn ok(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            outputs: BTreeMap::new(),
        }
    }

    pub fn with_output(mut self, artifact: impl Into<Artifact>, path: impl Into<PathBuf>) -> Self {
        self.outputs.insert(artifact.into(), path.into());
        self
    }
}

/// Final state of one member, as seen by the finishing action.
#[derive(Debug, Clone)]
pub struct MemberOutputs<'a> {
    pub task: TaskId,
    pub kind: TaskKind,
    pub outputs: &'a BTreeMap<Artifact, PathBuf>,
}

/// Everything a finishing action may look at.
#[derive(Debug, Clone)]
pub struct FinishContext<'a> {
    pub work: WorkId,
    pub label: &'a str,
    /// Directory reserved for the work's consolidated artifacts.
    pub outdir: PathBuf,
    /// Members in registration order, all `Succeeded`.
    pub members: Vec<MemberOutputs<'a>>,
}

impl FinishContext<'_> {
    /// Every member location of `artifact`, in registration order.
    pub fn sources(&self, artifact: &Artifact) -> Vec<(TaskId, &Path)> {
        self.members
            .iter()
            .filter_map(|m| m.outputs.get(artifact).map(|p| (m.task, p.as_path())))
            .collect()
    }
}

/// Strategy invoked exactly once when a work's members all succeeded.
pub trait OnAllOk: Send + Sync {
    fn on_all_ok(&self, ctx: &FinishContext<'_>) -> WorkResult;

    /// Artifacts this action promises to expose. Used by the eager
    /// configuration check; an empty list means "nothing".
    fn produces(&self) -> Vec<Artifact> {
        Vec::new()
    }
}

/// Merge every member's `source` artifact into one `target` artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeRule {
    pub source: Artifact,
    pub target: Artifact,
}

impl MergeRule {
    pub fn same(artifact: impl Into<Artifact>) -> Self {
        let artifact = artifact.into();
        Self {
            source: artifact.clone(),
            target: artifact,
        }
    }

    pub fn into_target(source: impl Into<Artifact>, target: impl Into<Artifact>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// Accepts `"DDB"` or `"POT->DVDB"`.
impl FromStr for MergeRule {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        match s.split_once("->") {
            Some((source, target)) => Ok(MergeRule {
                source: source.parse()?,
                target: target.parse()?,
            }),
            None => Ok(MergeRule::same(s.parse::<Artifact>()?)),
        }
    }
}

impl fmt::Display for MergeRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.source == self.target {
            write!(f, "{}", self.source)
        } else {
            write!(f, "{}->{}", self.source, self.target)
        }
    }
}

/// Serializable choice of finishing action stored on each work.
///
/// `Named` refers to a strategy registered on the flow with
/// `Flow::register_finisher`; it is looked up when the work completes.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Finisher {
    #[default]
    Noop,
    Merge(Vec<MergeRule>),
    Named(String),
}

impl Finisher {
    pub fn merge<I, A>(artifacts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Artifact>,
    {
        Finisher::Merge(artifacts.into_iter().map(MergeRule::same).collect())
    }
}

impl OnAllOk for Finisher {
    fn on_all_ok(&self, ctx: &FinishContext<'_>) -> WorkResult {
        match self {
            Finisher::Noop => WorkResult::ok("all tasks completed"),
            Finisher::Merge(rules) => merge_artifacts(ctx, rules),
            Finisher::Named(name) => {
                WorkResult::failed(format!("finishing action '{name}' is not registered"))
            }
        }
    }

    fn produces(&self) -> Vec<Artifact> {
        match self {
            Finisher::Noop | Finisher::Named(_) => Vec::new(),
            Finisher::Merge(rules) => rules.iter().map(|r| r.target.clone()).collect(),
        }
    }
}

/// Manifest written for each merged artifact.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeManifest {
    pub artifact: Artifact,
    pub work: WorkId,
    pub sources: Vec<PathBuf>,
}

/// Consolidate like-named member artifacts. Each target becomes a JSON
/// manifest in the work's output directory listing the merged sources in
/// member order; the actual binary merge belongs to the external merge tool
/// that reads it.
fn merge_artifacts(ctx: &FinishContext<'_>, rules: &[MergeRule]) -> WorkResult {
    let mut result = WorkResult::ok(String::new());
    let mut merged = Vec::new();

    for rule in rules {
        let sources: Vec<PathBuf> = ctx
            .sources(&rule.source)
            .into_iter()
            .map(|(_, p)| p.to_path_buf())
            .collect();

        if sources.is_empty() {
            return WorkResult::failed(format!(
                "no member of work '{}' produced {}",
                ctx.label, rule.source
            ));
        }

        let manifest = MergeManifest {
            artifact: rule.target.clone(),
            work: ctx.work,
            sources,
        };
        let path = ctx.outdir.join(rule.target.file_name());

        if let Err(e) = write_manifest(&path, &manifest) {
            return WorkResult::failed(format!(
                "merging {} into {}: {e}",
                rule.source,
                path.display()
            ));
        }

        debug!(
            work = %ctx.work,
            artifact = %rule.target,
            sources = manifest.sources.len(),
            "merged artifact"
        );
        merged.push(format!("{} ({} files)", rule, manifest.sources.len()));
        result.outputs.insert(rule.target.clone(), path);
    }

    result.message = format!("merge done: {}", merged.join(", "));
    result
}

fn write_manifest(path: &Path, manifest: &MergeManifest) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let body = serde_json::to_vec_pretty(manifest)?;
    fs::write(path, body)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outputs(pairs: &[(&str, &str)]) -> BTreeMap<Artifact, PathBuf> {
        pairs
            .iter()
            .map(|(a, p)| (Artifact::from(*a), PathBuf::from(p)))
            .collect()
    }

    #[test]
    fn merge_rule_parsing() {
        let r: MergeRule = "POT->DVDB".parse().unwrap();
        assert_eq!(r.source.as_str(), "POT");
        assert_eq!(r.target.as_str(), "DVDB");
        assert_eq!(r.to_string(), "POT->DVDB");
        assert_eq!("ddb".parse::<MergeRule>().unwrap(), MergeRule::same("DDB"));
        assert!("->DDB".parse::<MergeRule>().is_err());
    }

    #[test]
    fn merge_writes_one_manifest_per_target() {
        let dir = tempfile::tempdir().unwrap();
        let a = outputs(&[("DDB", "/runs/t0/out_DDB"), ("POT", "/runs/t0/out_POT")]);
        let b = outputs(&[("DDB", "/runs/t1/out_DDB")]);
        let ctx = FinishContext {
            work: WorkId(2),
            label: "phonons",
            outdir: dir.path().to_path_buf(),
            members: vec![
                MemberOutputs { task: TaskId(0), kind: TaskKind::Phonon, outputs: &a },
                MemberOutputs { task: TaskId(1), kind: TaskKind::Phonon, outputs: &b },
            ],
        };

        let finisher = Finisher::Merge(vec![
            MergeRule::same("DDB"),
            MergeRule::into_target("POT", "DVDB"),
        ]);
        let result = finisher.on_all_ok(&ctx);
        assert!(result.success, "{}", result.message);

        let ddb = &result.outputs[&Artifact::from("DDB")];
        let manifest: MergeManifest =
            serde_json::from_slice(&std::fs::read(ddb).unwrap()).unwrap();
        assert_eq!(manifest.sources.len(), 2);
        assert_eq!(manifest.work, WorkId(2));
        assert!(result.outputs.contains_key(&Artifact::from("DVDB")));
        assert_eq!(
            finisher.produces(),
            vec![Artifact::from("DDB"), Artifact::from("DVDB")]
        );
    }

    #[test]
    fn merge_fails_when_no_member_produced_the_source() {
        let a = outputs(&[("WFK", "/runs/t0/out_WFK")]);
        let ctx = FinishContext {
            work: WorkId(0),
            label: "gs",
            outdir: PathBuf::from("/nonexistent"),
            members: vec![MemberOutputs { task: TaskId(0), kind: TaskKind::Scf, outputs: &a }],
        };
        let result = Finisher::merge(["DDB"]).on_all_ok(&ctx);
        assert!(!result.success);
        assert!(result.message.contains("DDB"));
    }
}
