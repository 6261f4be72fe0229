pub mod builders;
pub mod monitor;

pub use monitor::RecordingMonitor;

use std::future::Future;
use std::sync::Once;
use std::time::Duration;

use opgraph::logging::LOG_ENV_VAR;
use tracing_subscriber::{fmt, EnvFilter};

static INIT: Once = Once::new();

/// Upper bound for one run in a test; runs only sleep for milliseconds.
pub const RUN_TIMEOUT: Duration = Duration::from_secs(5);

/// Initialise tracing for tests.
///
/// The filter comes from `OPGRAPH_LOG`, then `RUST_LOG`, and otherwise
/// shows `opgraph` events at `info` and everything else at `warn`. Output
/// goes through `with_test_writer()`, so it only shows for failing tests
/// unless run with `-- --nocapture`:
///
/// `OPGRAPH_LOG=opgraph::engine=debug cargo test fork`
pub fn init_tracing() {
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_env(LOG_ENV_VAR)
            .or_else(|_| EnvFilter::try_from_default_env())
            .unwrap_or_else(|_| EnvFilter::new("warn,opgraph=info"));

        fmt()
            .with_env_filter(filter)
            .with_test_writer()
            .with_target(true)
            .init();
    });
}

/// Await `f`, panicking if it takes longer than [`RUN_TIMEOUT`]. A run that
/// never settles shows up as this panic instead of a hung test binary.
pub async fn with_timeout<F, T>(f: F) -> T
where
    F: Future<Output = T>,
{
    match tokio::time::timeout(RUN_TIMEOUT, f).await {
        Ok(value) => value,
        Err(_) => panic!("run did not settle within {RUN_TIMEOUT:?}"),
    }
}
