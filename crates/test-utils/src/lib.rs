pub mod builders;
pub mod fake_executor;
pub mod recorder;

use std::sync::Once;
use std::time::Duration;

use daqsched::Awaitable;
use tracing_subscriber::{EnvFilter, fmt};

static INIT: Once = Once::new();

/// Install a test-friendly tracing subscriber once per test binary.
///
/// Output goes through the test writer, so it only shows for failing tests
/// or with `--nocapture`. `RUST_LOG` picks the level (default `info`); thread
/// names are included so pool and main-loop work can be told apart.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .with_thread_names(true)
            .init();
    });
}

/// Wait for `awaitable` for at most 5 seconds, failing the test otherwise.
pub fn await_within<T>(awaitable: &Awaitable<T>) {
    assert!(
        awaitable.wait_timeout(Duration::from_secs(5)),
        "Test timed out after 5 seconds waiting for {awaitable:?}"
    );
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
