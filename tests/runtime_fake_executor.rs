// tests/runtime_fake_executor.rs

use std::error::Error;

use flowdag::engine::RuntimeOptions;
use flowdag::flow::Flow;
use flowdag::types::{TaskStatus, WorkStatus};
use flowdag_test_utils::builders::fan_out;
use flowdag_test_utils::fake_executor::FakeScript;
use flowdag_test_utils::{init_tracing, run_with_fake_executor, with_timeout};
use tempfile::tempdir;

type TestResult = Result<(), Box<dyn Error>>;

#[tokio::test]
async fn runtime_runs_fan_out_to_completion() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let s = fan_out(dir.path(), 3);

    let (flow, executed) = with_timeout(run_with_fake_executor(
        s.flow,
        RuntimeOptions::default(),
        FakeScript::all_ok(),
    ))
    .await?;

    assert_eq!(
        executed,
        vec!["A.generic0", "B.generic0", "B.generic1", "B.generic2"]
    );
    assert!(flow.is_done());
    assert_eq!(s.finisher.calls(), 1);
    assert_eq!(flow.summary().succeeded, 4);
    Ok(())
}

#[tokio::test]
async fn runtime_stops_after_failure_propagates() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let s = fan_out(dir.path(), 2);

    let (flow, executed) = with_timeout(run_with_fake_executor(
        s.flow,
        RuntimeOptions::default(),
        FakeScript::all_ok().failing("A.generic0"),
    ))
    .await?;

    assert_eq!(executed, vec!["A.generic0"]);
    assert!(flow.is_done());
    for c in &s.consumers {
        assert_eq!(flow.task(*c)?.status(), TaskStatus::Unreachable);
    }
    assert_eq!(
        flow.task(s.producer)?.failure(),
        Some("scripted failure of A.generic0")
    );
    Ok(())
}

#[tokio::test]
async fn clean_exit_without_outputs_is_a_failure() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let s = fan_out(dir.path(), 2);

    let (flow, executed) = with_timeout(run_with_fake_executor(
        s.flow,
        RuntimeOptions::default(),
        FakeScript::all_ok().without_outputs("B.generic1"),
    ))
    .await?;

    assert_eq!(executed.len(), 3);
    assert_eq!(flow.task(s.consumers[1])?.status(), TaskStatus::Failed);
    assert_eq!(flow.work(s.consumer_work)?.status(), WorkStatus::Failed);
    assert_eq!(s.finisher.calls(), 0);
    assert!(flow.is_done());
    Ok(())
}

#[tokio::test]
async fn state_file_tracks_every_completion() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let state = dir.path().join("flow.json");
    let s = fan_out(dir.path().join("run"), 2);

    let options = RuntimeOptions {
        state_file: Some(state.clone()),
    };
    let (flow, _) =
        with_timeout(run_with_fake_executor(s.flow, options, FakeScript::all_ok())).await?;

    let saved = Flow::load(&state)?;
    assert!(saved.is_done());
    assert_eq!(saved.summary(), flow.summary());
    Ok(())
}

#[tokio::test]
async fn stalled_flow_exits_instead_of_hanging() -> TestResult {
    init_tracing();
    let dir = tempdir()?;
    let mut flow = Flow::new(dir.path());
    let a = flow.new_work("A", flowdag::flow::Finisher::Noop);
    let x = flow.register_task(
        a,
        flowdag::dag::JobSpec::generic(["X"]),
        flowdag::dag::Deps::new(),
    )?;
    let b = flow.new_work("B", flowdag::flow::Finisher::Noop);
    flow.register_task(
        b,
        flowdag::dag::JobSpec::generic(["Z"]),
        flowdag::dag::Deps::new().on(x, "Y"),
    )?;

    let (flow, executed) = with_timeout(run_with_fake_executor(
        flow,
        RuntimeOptions::default(),
        FakeScript::all_ok(),
    ))
    .await?;

    assert_eq!(executed, vec!["A.generic0"]);
    assert!(!flow.is_done());
    assert_eq!(flow.work(b)?.status(), WorkStatus::Pending);
    Ok(())
}
