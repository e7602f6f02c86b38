// src/exec/task_runner.rs

//! Individual task process runner.

use std::collections::BTreeMap;
use std::process::Stdio;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::dag::ScheduledTask;
use crate::engine::{RuntimeEvent, TaskOutcome};

/// Prefix of the environment variables carrying resolved input paths.
pub const INPUT_ENV_PREFIX: &str = "FLOWDAG_IN_";

/// Run a single task job and emit exactly one `TaskCompleted` event for it.
///
/// Errors while spawning or waiting are reported as a failed outcome.
pub async fn run_task(task: ScheduledTask, runtime_tx: mpsc::Sender<RuntimeEvent>) {
    let id = task.id;
    let outcome = match run_task_inner(&task).await {
        Ok(outcome) => outcome,
        Err(err) => {
            error!(task = %task.label, error = %err, "task execution error");
            TaskOutcome::Failed(format!("{err:#}"))
        }
    };

    if runtime_tx
        .send(RuntimeEvent::TaskCompleted { task: id, outcome })
        .await
        .is_err()
    {
        warn!(task = %task.label, "runtime is gone; dropping completion");
    }
}

async fn run_task_inner(task: &ScheduledTask) -> Result<TaskOutcome> {
    let Some(cmd_line) = task.cmd.as_deref() else {
        return Ok(TaskOutcome::Failed(format!(
            "no command configured for {} task",
            task.kind
        )));
    };

    tokio::fs::create_dir_all(&task.workdir)
        .await
        .with_context(|| format!("creating work directory {}", task.workdir.display()))?;

    info!(
        task = %task.label,
        cmd = %cmd_line,
        dir = %task.workdir.display(),
        "starting task process"
    );

    // Build a shell command appropriate for the platform.
    let mut cmd = if cfg!(windows) {
        let mut c = Command::new("cmd");
        c.arg("/C").arg(cmd_line);
        c
    } else {
        let mut c = Command::new("sh");
        c.arg("-c").arg(cmd_line);
        c
    };

    cmd.current_dir(&task.workdir)
        .env("FLOWDAG_TASK", &task.label)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);
    for (artifact, path) in &task.inputs {
        cmd.env(format!("{INPUT_ENV_PREFIX}{artifact}"), path);
    }

    let mut child = cmd
        .spawn()
        .with_context(|| format!("spawning process for task '{}'", task.label))?;

    // Always consume output so pipe buffers don't fill; log at debug.
    if let Some(stdout) = child.stdout.take() {
        forward_lines(task.label.clone(), "stdout", stdout);
    }
    if let Some(stderr) = child.stderr.take() {
        forward_lines(task.label.clone(), "stderr", stderr);
    }

    let status = child
        .wait()
        .await
        .with_context(|| format!("waiting for process of task '{}'", task.label))?;
    let code = status.code().unwrap_or(-1);

    info!(
        task = %task.label,
        exit_code = code,
        success = status.success(),
        "task process exited"
    );

    if !status.success() {
        return Ok(TaskOutcome::Failed(format!("exit code {code}")));
    }

    let mut produced = BTreeMap::new();
    for (artifact, path) in &task.outputs {
        let exists = tokio::fs::try_exists(path)
            .await
            .with_context(|| format!("checking output {}", path.display()))?;
        if exists {
            produced.insert(artifact.clone(), path.clone());
        } else {
            debug!(task = %task.label, %artifact, "declared output not found");
        }
    }

    Ok(TaskOutcome::Success(produced))
}

fn forward_lines<R>(label: String, stream: &'static str, reader: R)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            debug!(task = %label, stream, "{}", line);
        }
    });
}
