//! Development-time tracing for debugging the runner.
//!
//! Service operations carry spans with the execution id; session transitions,
//! transmissions and refused moves are logged at `debug`/`info`. Domain events
//! go to the configured `EventSink`, not to this subscriber.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize tracing subscriber for development logging.
///
/// Reads `RUST_LOG` env var. Defaults to `warn` if unset.
/// Output: stderr, compact format.
///
/// # Example
/// ```bash
/// RUST_LOG=qti_runner=debug cargo run -- play test.json script.toml --store store.json
/// ```
pub fn init() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));

    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer().with_writer(std::io::stderr).compact())
        .init();
}
