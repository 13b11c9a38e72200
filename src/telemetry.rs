//! Telemetry logic.
//! Structured logging through `tracing`.

use tracing_subscriber::EnvFilter;

/// Install the global subscriber.
///
/// Log level comes from `RUST_LOG`, defaulting to `info`.
pub fn setup_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();
}
