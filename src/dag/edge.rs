// src/dag/edge.rs

//! Artifacts, producers and the canonical dependency edge list.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{FlowError, Result};
use crate::types::{TaskId, WorkId};

/// Name of an output artifact (`WFK`, `DDB`, ...).
///
/// Names are upper-case ASCII alphanumerics (underscores allowed). `From<&str>`
/// upper-cases without validating; the flow validates at registration time.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Artifact(String);

impl Artifact {
    pub const WFK: &'static str = "WFK";
    pub const WFQ: &'static str = "WFQ";
    pub const DEN: &'static str = "DEN";
    pub const DDK: &'static str = "DDK";
    pub const DDB: &'static str = "DDB";
    pub const DVDB: &'static str = "DVDB";
    pub const POT: &'static str = "POT";
    pub const GKQ: &'static str = "GKQ";
    pub const GSR: &'static str = "GSR";

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_valid(&self) -> bool {
        !self.0.is_empty()
            && self
                .0
                .chars()
                .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
    }

    /// File name under which a task leaves this artifact in its directory.
    pub fn file_name(&self) -> String {
        format!("out_{}", self.0)
    }
}

impl From<&str> for Artifact {
    fn from(s: &str) -> Self {
        Artifact(s.trim().to_ascii_uppercase())
    }
}

impl From<String> for Artifact {
    fn from(s: String) -> Self {
        Artifact::from(s.as_str())
    }
}

impl FromStr for Artifact {
    type Err = FlowError;

    fn from_str(s: &str) -> Result<Self> {
        let artifact = Artifact::from(s);
        if artifact.is_valid() {
            Ok(artifact)
        } else {
            Err(FlowError::config(format!("invalid artifact name '{s}'")))
        }
    }
}

impl fmt::Display for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Something that exposes artifacts to dependents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Producer {
    Task(TaskId),
    /// Consolidated artifacts exposed by a work's finishing action.
    Work(WorkId),
    /// An earlier task of the same [`Work`](crate::flow::Work) under
    /// construction, by position. Only meaningful inside `Work::register_task`.
    Sibling(usize),
}

impl fmt::Display for Producer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Producer::Task(t) => write!(f, "{t}"),
            Producer::Work(w) => write!(f, "{w}"),
            Producer::Sibling(i) => write!(f, "sibling#{i}"),
        }
    }
}

impl From<TaskId> for Producer {
    fn from(id: TaskId) -> Self {
        Producer::Task(id)
    }
}

impl From<WorkId> for Producer {
    fn from(id: WorkId) -> Self {
        Producer::Work(id)
    }
}

/// One `(producer, artifact)` requirement of a consumer task.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DependencyEdge {
    pub producer: Producer,
    pub artifact: Artifact,
}

impl fmt::Display for DependencyEdge {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.producer, self.artifact)
    }
}

/// Dependency map of a task, built call by call and normalised into a flat
/// edge list.
///
/// ```
/// use flowdag::dag::{Artifact, Deps};
/// use flowdag::types::TaskId;
///
/// let deps = Deps::new()
///     .on(TaskId(0), Artifact::WFK)
///     .on_all(TaskId(1), [Artifact::DDB, Artifact::DVDB]);
/// assert_eq!(deps.len(), 3);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Deps {
    edges: Vec<DependencyEdge>,
}

impl Deps {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require `artifact` from `producer`.
    pub fn on(mut self, producer: impl Into<Producer>, artifact: impl Into<Artifact>) -> Self {
        self.edges.push(DependencyEdge {
            producer: producer.into(),
            artifact: artifact.into(),
        });
        self
    }

    /// Require several artifacts from the same producer.
    pub fn on_all<I, A>(mut self, producer: impl Into<Producer>, artifacts: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Artifact>,
    {
        let producer = producer.into();
        for artifact in artifacts {
            self.edges.push(DependencyEdge {
                producer,
                artifact: artifact.into(),
            });
        }
        self
    }

    /// Append every edge of `other`.
    pub fn merge(mut self, other: Deps) -> Self {
        self.edges.extend(other.edges);
        self
    }

    pub fn edges(&self) -> &[DependencyEdge] {
        &self.edges
    }

    pub fn into_edges(self) -> Vec<DependencyEdge> {
        self.edges
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    /// Distinct producers referenced, in first-seen order.
    pub fn producers(&self) -> Vec<Producer> {
        let mut out: Vec<Producer> = Vec::new();
        for edge in &self.edges {
            if !out.contains(&edge.producer) {
                out.push(edge.producer);
            }
        }
        out
    }
}

impl From<Vec<DependencyEdge>> for Deps {
    fn from(edges: Vec<DependencyEdge>) -> Self {
        Self { edges }
    }
}

impl FromIterator<DependencyEdge> for Deps {
    fn from_iter<T: IntoIterator<Item = DependencyEdge>>(iter: T) -> Self {
        Self {
            edges: iter.into_iter().collect(),
        }
    }
}

/// Validate artifact names and reject edges already present, either in
/// `existing` or earlier in `deps` itself.
pub fn normalize_edges(
    existing: &[DependencyEdge],
    deps: Deps,
) -> Result<Vec<DependencyEdge>> {
    let mut out: Vec<DependencyEdge> = Vec::with_capacity(deps.len());

    for edge in deps.into_edges() {
        if !edge.artifact.is_valid() {
            return Err(FlowError::config(format!(
                "invalid artifact name '{}' requested from {}",
                edge.artifact, edge.producer
            )));
        }
        if existing.contains(&edge) || out.contains(&edge) {
            return Err(FlowError::config(format!(
                "redundant dependency edge {edge}"
            )));
        }
        out.push(edge);
    }

    Ok(out)
}
