pub mod builders;
pub mod fake_executor;

use std::sync::Once;

use flowdag::engine::{CoreRuntime, Runtime, RuntimeEvent, RuntimeOptions};
use flowdag::errors::Result;
use flowdag::flow::Flow;
use tokio::sync::mpsc;
use tracing_subscriber::{fmt, EnvFilter};

use crate::fake_executor::{FakeExecutor, FakeScript};

static INIT: Once = Once::new();

/// Initialise tracing for tests.
///
/// Logs go through `with_test_writer()`, so the harness only shows them for
/// failing tests (or with `-- --nocapture`). Levels come from `FLOWDAG_LOG`,
/// e.g. `FLOWDAG_LOG=debug cargo test`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("FLOWDAG_LOG")
            .unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Run a future with a 5-second timeout.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: std::future::Future<Output = T>,
{
    tokio::time::timeout(std::time::Duration::from_secs(5), f)
        .await
        .expect("Test timed out after 5 seconds")
}

/// Run `flow` to completion through the real runtime loop with a
/// [`FakeExecutor`] following `script`.
///
/// Returns the final flow and the qualified labels in dispatch order.
pub async fn run_with_fake_executor(
    flow: Flow,
    options: RuntimeOptions,
    script: FakeScript,
) -> Result<(Flow, Vec<String>)> {
    let (tx, rx) = mpsc::channel::<RuntimeEvent>(64);
    let executor = FakeExecutor::new(tx, script);
    let executed = executor.executed();

    let runtime = Runtime::new(CoreRuntime::new(flow, options), rx, executor);
    let flow = runtime.run().await?;

    let executed = executed.lock().expect("executed lock poisoned").clone();
    Ok((flow, executed))
}
