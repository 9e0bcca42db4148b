use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// Initialize structured logging for the gateway.
///
/// Logs go to stderr so that subcommands printing JSON (`export-stats`,
/// `check-health`) keep stdout clean. `RUST_LOG` overrides `default_level`.
///
/// This must be called once at startup (in main.rs).
pub fn init_logging(default_level: &str) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_level));

    fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .compact()
        .init();

    info!("Logging initialized");
}
