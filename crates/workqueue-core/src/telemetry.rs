use tracing_subscriber::EnvFilter;

/// Install the global tracing subscriber for structured logging.
///
/// - Debug builds: human-readable output
/// - Release builds: JSON-formatted output for log aggregation
///
/// The log level comes from `RUST_LOG`, defaulting to `info`. Returns `false`
/// when a subscriber was already installed, in which case nothing changes.
pub fn init_tracing() -> bool {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let installed = if cfg!(debug_assertions) {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .try_init()
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    };
    installed.is_ok()
}
