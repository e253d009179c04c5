//! Structured logging setup for the CLI shell.

use tracing::Level;
use tracing_subscriber::EnvFilter;

/// Initializes the global subscriber. `RUST_LOG` wins over the level derived
/// from the CLI flags; calling twice is harmless.
pub fn init_tracing(level: Level) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("kest={level}")));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .try_init();
}
