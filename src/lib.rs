// src/lib.rs

pub mod cli;
pub mod config;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod flow;
pub mod logging;
pub mod pipelines;
pub mod types;

use anyhow::{bail, Context, Result};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::cli::CliArgs;
use crate::config::{build_flow, load_and_validate, ConfigFile};
use crate::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use crate::exec::RealExecutorBackend;
use crate::flow::Flow;
use crate::types::WorkStatus;

/// High-level entry point used by `main.rs`.
///
/// This wires together:
/// - config loading and flow construction (or resuming from a snapshot)
/// - the core runtime and its async shell
/// - the process executor
/// - Ctrl-C handling
///
/// Fails if any work ends up failed or unreachable.
pub async fn run(args: CliArgs) -> Result<()> {
    let cfg = load_and_validate(&args.config)
        .with_context(|| format!("loading flow plan {}", args.config.display()))?;

    let state_file = args
        .state
        .clone()
        .or_else(|| cfg.config.state_file.clone());

    let flow = if args.resume {
        let path = state_file
            .as_deref()
            .context("--resume needs a state file (--state or [config].state_file)")?;
        Flow::load(path).with_context(|| format!("resuming from {}", path.display()))?
    } else {
        build_flow(&cfg)?
    };

    if args.dry_run {
        print_dry_run(&cfg, &flow);
        return Ok(());
    }

    ensure_finishers_registered(&flow)?;

    // Runtime event channel.
    let (rt_tx, rt_rx) = mpsc::channel::<RuntimeEvent>(64);

    let max_parallel = args.max_parallel.unwrap_or(cfg.config.max_parallel);
    let executor = RealExecutorBackend::new(rt_tx.clone()).with_max_parallel(max_parallel);

    // Ctrl-C → graceful shutdown.
    {
        let tx = rt_tx.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                eprintln!("failed to listen for Ctrl+C: {e}");
                return;
            }
            let _ = tx.send(RuntimeEvent::ShutdownRequested).await;
        });
    }
    drop(rt_tx);

    if let Some(path) = &state_file {
        flow.save(path)?;
        info!(path = %path.display(), "persisting flow state");
    }

    let options = RuntimeOptions { state_file };

    // Construct the pure core runtime (single source of truth for semantics).
    let core = CoreRuntime::new(flow, options);

    // Construct the async IO shell around the core.
    let runtime = Runtime::new(core, rt_rx, executor);
    let flow = runtime.run().await?;

    report(&flow)
}

/// The binary has no way to register named finishing actions; a work using
/// one would always fail its aggregation.
fn ensure_finishers_registered(flow: &Flow) -> Result<()> {
    let missing = flow.unregistered_finishers();
    if let Some((work, name)) = missing.first() {
        bail!(
            "work {work} uses finishing action `{name}`, which is not registered \
             ({} work(s) affected); named actions need the library API",
            missing.len()
        );
    }
    Ok(())
}

/// Print the outcome to stdout; an error if any work did not succeed.
fn report(flow: &Flow) -> Result<()> {
    println!("{}", flow.summary());

    for (work, result) in flow.work_results() {
        let label = flow.work(work).map(|w| w.label()).unwrap_or_default();
        let status = if result.success { "ok" } else { "FAILED" };
        println!("  {label} ({work}): {status}: {}", result.message);
        for (artifact, path) in &result.outputs {
            println!("      {artifact}: {}", path.display());
        }
    }

    let chain = flow.failure_chain();
    if !chain.is_empty() {
        print!("{chain}");
    }

    let unfinished = flow
        .works()
        .iter()
        .filter(|w| w.status() != WorkStatus::Succeeded || w.result().is_some_and(|r| !r.success))
        .count();
    if unfinished > 0 {
        bail!("{unfinished} of {} works did not succeed", flow.len_works());
    }
    Ok(())
}

/// Dry-run output: works, tasks, dependencies and commands.
fn print_dry_run(cfg: &ConfigFile, flow: &Flow) {
    println!("flowdag dry-run");
    println!("  config.workdir = {}", cfg.config.workdir.display());
    println!(
        "  config.eager_artifact_check = {}",
        cfg.config.eager_artifact_check
    );
    if let Some(state) = &cfg.config.state_file {
        println!("  config.state_file = {}", state.display());
    }
    println!();

    println!("works ({}), tasks ({}):", flow.len_works(), flow.len_tasks());
    for work in flow.works() {
        println!("  - {} ({}) finish: {:?}", work.label(), work.id(), work.finisher());
        for id in work.tasks() {
            let Ok(task) = flow.task(*id) else { continue };
            println!("      {} [{}] {}", task.label(), task.kind(), task.status());
            if let Some(cmd) = &task.job().cmd {
                println!("          cmd: {cmd}");
            }
            let outputs: Vec<String> = task
                .declared_outputs()
                .iter()
                .map(|a| a.to_string())
                .collect();
            if !outputs.is_empty() {
                println!("          outputs: {}", outputs.join(", "));
            }
            for edge in task.deps() {
                println!("          needs: {edge}");
            }
        }
    }

    match flow.validate() {
        Ok(()) => println!("\nall dependencies can be satisfied"),
        Err(e) => println!("\n{e}"),
    }
    for (work, name) in flow.unregistered_finishers() {
        println!("warning: work {work} uses unregistered finishing action `{name}`");
    }

    debug!("dry-run complete (no execution)");
}

