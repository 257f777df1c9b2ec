//! Structured logging setup

use tracing_subscriber::EnvFilter;

use crate::{config::Config, error::Result};

/// Install a JSON `tracing` subscriber filtered by the configured log level.
///
/// `service.log_level` accepts a plain level or a full filter directive
/// such as `docstore_repository=debug,info`; an unparsable value falls back to
/// `info`. Fails if a global subscriber is already installed.
pub fn init_tracing(config: &Config) -> Result<()> {
    let log_level = config.service.log_level.clone();

    tracing_subscriber::fmt()
        .json()
        .with_env_filter(EnvFilter::try_new(&log_level).unwrap_or_else(|_| EnvFilter::new("info")))
        .try_init()
        .map_err(|e| crate::error::Error::InvalidConfig(format!("tracing already initialized: {}", e)))?;

    tracing::info!("Tracing initialized for service: {}", config.service.name);

    Ok(())
}

/// Flush and shut down tracing
pub fn shutdown_tracing() {
    tracing::info!("Tracing shutdown complete");
}
