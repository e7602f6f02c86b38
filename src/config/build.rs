// src/config/build.rs

//! Turn a validated [`ConfigFile`] into a [`Flow`].

use std::collections::BTreeMap;

use serde_json::Value;
use tracing::{debug, info};

use crate::config::model::{ConfigFile, FinishConfig, ProducerRef, TaskConfig};
use crate::config::validate::task_order;
use crate::dag::{Deps, JobSpec, Producer};
use crate::errors::{FlowError, Result};
use crate::flow::{canonicalize, CanonicalRules, DedupIndex, Finisher, Flow, FlowOptions, MergeRule};
use crate::types::{TaskId, WorkId};

/// Key under which a task's dependencies enter its fingerprint, so that two
/// requests are only merged when they also consume the same inputs.
const DEPS_KEY: &str = "@deps";

/// Build a flow from a validated config.
///
/// Works are created up front (in name order) and tasks registered in
/// dependency order. Task entries with a `dedup` list go through one
/// deduplication index per work; a duplicate entry becomes an alias of the
/// task already registered for it.
pub fn build_flow(cfg: &ConfigFile) -> Result<Flow> {
    let options = FlowOptions {
        eager_artifact_check: cfg.config.eager_artifact_check,
    };
    let mut flow = Flow::with_options(&cfg.config.workdir, options);

    let mut works: BTreeMap<&str, WorkId> = BTreeMap::new();
    for (name, work) in &cfg.work {
        let id = flow.new_work(name.clone(), finisher_from(&work.finish)?);
        works.insert(name.as_str(), id);
    }

    let mut tasks: BTreeMap<(String, String), TaskId> = BTreeMap::new();
    let mut indexes: BTreeMap<WorkId, DedupIndex<TaskId>> = BTreeMap::new();

    for (work_name, task_name) in task_order(&cfg.work)? {
        let work = works[work_name.as_str()];
        let task_cfg = &cfg.work[&work_name].task[&task_name];
        let deps = resolve_deps(task_cfg, &works, &tasks)?;
        let spec = job_spec(&task_name, task_cfg);

        let id = if task_cfg.dedup.is_empty() {
            flow.register_task(work, spec, deps)?
        } else {
            let fingerprint = fingerprint_of(task_cfg, &spec, &deps);
            let index = indexes.entry(work).or_default();
            let flow = &mut flow;
            index.get_or_register(fingerprint, || flow.register_task(work, spec, deps))?
        };

        debug!(task = %id, name = %format!("{work_name}.{task_name}"), "task from config");
        tasks.insert((work_name, task_name), id);
    }

    let merged: usize = indexes.values().map(DedupIndex::hits).sum();
    info!(
        works = flow.len_works(),
        tasks = flow.len_tasks(),
        merged,
        "flow built from config"
    );
    Ok(flow)
}

fn finisher_from(cfg: &FinishConfig) -> Result<Finisher> {
    Ok(match cfg {
        FinishConfig::Noop => Finisher::Noop,
        FinishConfig::Merge(rules) => Finisher::Merge(
            rules
                .iter()
                .map(|r| r.parse::<MergeRule>())
                .collect::<Result<Vec<_>>>()?,
        ),
        FinishConfig::Named(name) => Finisher::Named(name.clone()),
    })
}

fn job_spec(name: &str, cfg: &TaskConfig) -> JobSpec {
    let mut spec = JobSpec::new(cfg.kind, cfg.vars.clone()).named(name);
    if let Some(cmd) = &cfg.cmd {
        spec = spec.with_var("cmd", cmd.as_str());
    }
    if let Some(outputs) = &cfg.outputs {
        let list: Vec<Value> = outputs.iter().map(|o| Value::from(o.as_str())).collect();
        spec = spec.with_var("outputs", list);
    }
    spec
}

fn resolve_deps(
    cfg: &TaskConfig,
    works: &BTreeMap<&str, WorkId>,
    tasks: &BTreeMap<(String, String), TaskId>,
) -> Result<Deps> {
    let mut deps = Deps::new();
    for dep in &cfg.deps {
        let producer = match dep.producer_ref() {
            ProducerRef::Work(w) => works.get(w).copied().map(Producer::Work),
            ProducerRef::Task(w, t) => tasks
                .get(&(w.to_string(), t.to_string()))
                .copied()
                .map(Producer::Task),
        };
        let producer = producer.ok_or_else(|| {
            FlowError::config(format!("unresolved producer '{}'", dep.producer))
        })?;
        deps = deps.on_all(producer, dep.artifacts.iter().map(String::as_str));
    }
    Ok(deps)
}

fn fingerprint_of(cfg: &TaskConfig, spec: &JobSpec, deps: &Deps) -> crate::flow::Fingerprint {
    let mut rules = CanonicalRules::new(cfg.dedup.iter().cloned());
    for key in &cfg.reduced {
        rules = rules.reduced(key.clone());
    }
    rules.keys.insert(DEPS_KEY.to_string());

    let mut params = spec.vars.clone();
    let mut edges: Vec<String> = deps.edges().iter().map(|e| e.to_string()).collect();
    edges.sort();
    params.insert(DEPS_KEY.to_string(), Value::from(edges));

    canonicalize(spec.kind, &params, &rules)
}
