//! Shared helpers for the `action-queue` integration tests.

pub mod builders;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Steps that take longer than this in a test are treated as hung.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Install a tracing subscriber once per test binary.
///
/// Output goes through the test writer, so it only shows up for failing
/// tests. The filter is read from `ACTION_QUEUE_LOG` (same variable as the
/// binary), e.g. `ACTION_QUEUE_LOG=action_queue::engine=trace`.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env("ACTION_QUEUE_LOG")
            .unwrap_or_else(|_| EnvFilter::new("action_queue=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if it runs past [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    tokio::time::timeout(TEST_TIMEOUT, f)
        .await
        .expect("test step timed out")
}

/// Drive `f` on a fresh current-thread runtime.
///
/// For synchronous test bodies such as `proptest!` cases, where
/// `#[tokio::test]` is not available.
pub fn block_on<F: Future>(f: F) -> F::Output {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("build test runtime")
        .block_on(f)
}
