//! Logging initialization for the daemon.

use tracing_subscriber::EnvFilter;

/// Initialize the logging system.
///
/// `RUST_LOG` wins over `level` when set. Output goes to stderr so that
/// command output on stdout stays clean.
///
/// ```ignore
/// init_logging("info");
/// tracing::info!("adbauth started");
/// ```
pub fn init_logging(level: &str) {
    let default_level = parse_level(level).to_string().to_lowercase();
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(std::io::stderr)
        .compact()
        .try_init();
}

/// Parse a log level string into a tracing Level.
pub fn parse_level(level: &str) -> tracing::Level {
    match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" | "warning" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    }
}
