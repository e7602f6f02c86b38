// src/config/validate.rs

use std::collections::BTreeMap;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::config::model::{ConfigFile, FinishConfig, ProducerRef, RawConfigFile, WorkConfig};
use crate::dag::Artifact;
use crate::errors::{FlowError, Result};
use crate::flow::MergeRule;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = FlowError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        validate_raw_config(&raw)?;
        Ok(ConfigFile::new_unchecked(raw.config, raw.work))
    }
}

fn validate_raw_config(cfg: &RawConfigFile) -> Result<()> {
    ensure_has_tasks(cfg)?;
    validate_global_config(cfg)?;
    validate_names(cfg)?;
    validate_task_dependencies(cfg)?;
    task_order(&cfg.work)?;
    Ok(())
}

fn ensure_has_tasks(cfg: &RawConfigFile) -> Result<()> {
    if cfg.work.is_empty() {
        return Err(FlowError::config(
            "config must contain at least one [work.<name>] section",
        ));
    }
    for (name, work) in &cfg.work {
        if work.task.is_empty() {
            return Err(FlowError::config(format!(
                "work '{name}' must contain at least one [work.{name}.task.<name>] section"
            )));
        }
    }
    Ok(())
}

fn validate_global_config(cfg: &RawConfigFile) -> Result<()> {
    if cfg.config.workdir.as_os_str().is_empty() {
        return Err(FlowError::config("[config].workdir must not be empty"));
    }
    Ok(())
}

fn validate_names(cfg: &RawConfigFile) -> Result<()> {
    for (work_name, work) in &cfg.work {
        if work_name.is_empty() || work_name.contains('.') {
            return Err(FlowError::config(format!(
                "invalid work name '{work_name}': must be non-empty and contain no '.'"
            )));
        }
        if let FinishConfig::Merge(rules) = &work.finish {
            for rule in rules {
                rule.parse::<MergeRule>().map_err(|e| {
                    FlowError::config(format!("work '{work_name}': bad merge rule '{rule}': {e}"))
                })?;
            }
        }
        for (task_name, task) in &work.task {
            if task_name.is_empty() || task_name.contains('.') {
                return Err(FlowError::config(format!(
                    "invalid task name '{work_name}.{task_name}': must be non-empty and contain no '.'"
                )));
            }
            for artifact in task.outputs.iter().flatten() {
                artifact.parse::<Artifact>()?;
            }
            if let Some(key) = task.reduced.iter().find(|k| !task.dedup.contains(k)) {
                return Err(FlowError::config(format!(
                    "task '{work_name}.{task_name}': reduced key '{key}' is not listed in `dedup`"
                )));
            }
        }
    }
    Ok(())
}

fn validate_task_dependencies(cfg: &RawConfigFile) -> Result<()> {
    for (work_name, work) in &cfg.work {
        for (task_name, task) in &work.task {
            let me = format!("{work_name}.{task_name}");
            for dep in &task.deps {
                if dep.artifacts.is_empty() {
                    return Err(FlowError::config(format!(
                        "task '{me}' lists no artifacts for dependency '{}'",
                        dep.producer
                    )));
                }
                for artifact in &dep.artifacts {
                    artifact.parse::<Artifact>()?;
                }

                match dep.producer_ref() {
                    ProducerRef::Work(w) if w == work_name => {
                        return Err(FlowError::DagCycle(format!(
                            "task '{me}' cannot depend on its own work '{w}'"
                        )));
                    }
                    ProducerRef::Work(w) if !cfg.work.contains_key(w) => {
                        return Err(FlowError::config(format!(
                            "task '{me}' has unknown dependency '{w}'"
                        )));
                    }
                    ProducerRef::Task(w, t) if w == work_name && t == task_name => {
                        return Err(FlowError::config(format!(
                            "task '{me}' cannot depend on itself"
                        )));
                    }
                    ProducerRef::Task(w, t)
                        if !cfg.work.get(w).is_some_and(|wc| wc.task.contains_key(t)) =>
                    {
                        return Err(FlowError::config(format!(
                            "task '{me}' has unknown dependency '{w}.{t}'"
                        )));
                    }
                    _ => {}
                }
            }
        }
    }
    Ok(())
}

/// Qualified task names in an order where every producer comes first.
///
/// Nodes are `"<work>"` and `"<work>.<task>"`; edges run producer -> consumer
/// and member -> work. Fails with [`FlowError::DagCycle`] on a cycle.
pub(crate) fn task_order(works: &BTreeMap<String, WorkConfig>) -> Result<Vec<(String, String)>> {
    let mut graph: DiGraphMap<(&str, Option<&str>), ()> = DiGraphMap::new();

    for (work_name, work) in works {
        graph.add_node((work_name.as_str(), None));
        for task_name in work.task.keys() {
            graph.add_edge(
                (work_name.as_str(), Some(task_name.as_str())),
                (work_name.as_str(), None),
                (),
            );
        }
    }

    for (work_name, work) in works {
        for (task_name, task) in &work.task {
            let consumer = (work_name.as_str(), Some(task_name.as_str()));
            for dep in &task.deps {
                let producer = match dep.producer_ref() {
                    ProducerRef::Work(w) => (w, None),
                    ProducerRef::Task(w, t) => (w, Some(t)),
                };
                graph.add_edge(producer, consumer, ());
            }
        }
    }

    // A topological sort will fail if there is a cycle.
    match toposort(&graph, None) {
        Ok(order) => Ok(order
            .into_iter()
            .filter_map(|(w, t)| t.map(|t| (w.to_string(), t.to_string())))
            .collect()),
        Err(cycle) => {
            let (w, t) = cycle.node_id();
            let node = match t {
                Some(t) => format!("{w}.{t}"),
                None => w.to_string(),
            };
            Err(FlowError::DagCycle(format!(
                "cycle detected in work graph involving '{node}'"
            )))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(text: &str) -> Result<ConfigFile> {
        let raw = crate::config::load_from_str(text)?;
        ConfigFile::try_from(raw)
    }

    #[test]
    fn accepts_a_two_work_plan() {
        let cfg = parse(
            r#"
            [work.gs.task.scf]
            kind = "scf"

            [work.ph]
            finish = { merge = ["DDB", "POT->DVDB"] }

            [work.ph.task.q1]
            kind = "phonon"
            deps = [{ producer = "gs.scf", artifacts = ["WFK"] }]
            "#,
        )
        .unwrap();
        assert_eq!(cfg.task_count(), 2);
        assert!(cfg.config.eager_artifact_check);
    }

    #[test]
    fn rejects_unknown_and_self_references() {
        let err = parse(
            r#"
            [work.a.task.x]
            kind = "generic"
            deps = [{ producer = "b.y", artifacts = ["X"] }]
            "#,
        )
        .unwrap_err();
        assert!(err.to_string().contains("unknown dependency 'b.y'"));

        let err = parse(
            r#"
            [work.a.task.x]
            kind = "generic"
            deps = [{ producer = "a", artifacts = ["X"] }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::DagCycle(_)));
    }

    #[test]
    fn detects_cycles_across_works() {
        let err = parse(
            r#"
            [work.a.task.x]
            kind = "generic"
            deps = [{ producer = "b", artifacts = ["Y"] }]

            [work.b.task.y]
            kind = "generic"
            deps = [{ producer = "a.x", artifacts = ["X"] }]
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, FlowError::DagCycle(_)));
    }

    #[test]
    fn empty_works_and_bad_rules_are_rejected() {
        assert!(parse("").is_err());
        assert!(parse("[work.a]\nfinish = \"noop\"\n").is_err());
        assert!(parse(
            r#"
            [work.a]
            finish = { merge = ["ddb->"] }
            [work.a.task.x]
            kind = "phonon"
            "#
        )
        .is_err());
    }
}
