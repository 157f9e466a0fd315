//! Shared helpers for the `workchain` integration tests: canned unit bodies,
//! config builders and an executor backend the tests drive by hand.

pub mod bodies;
pub mod builders;
pub mod fake_executor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use tracing_subscriber::{fmt, EnvFilter};
use workchain::logging::LOG_ENV_VAR;

/// Upper bound for any single wait on the engine in a test.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(5);

static INIT: Once = Once::new();

/// Install a test-captured subscriber once per test binary.
///
/// The filter comes from `WORKCHAIN_LOG` (same variable as the binary), e.g.
/// `WORKCHAIN_LOG=workchain::chain=trace`. Without it only engine warnings
/// are shown, and only for failing tests.
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .unwrap_or_else(|_| EnvFilter::new("warn,workchain=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, failing the test if the engine does not answer within
/// [`TEST_TIMEOUT`].
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(TEST_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("no answer from the engine within {TEST_TIMEOUT:?}"),
    }
}
