//! Logging setup for binaries and demos.
//!
//! Library code only emits `tracing` events; installing a subscriber is left
//! to the embedding application.

use tracing::Level;

use crate::core::config::LogConfig;
use crate::core::errors::{LumenError, Result};

/// Parse a level name as used in [`LogConfig`]
pub fn parse_level(level: &str) -> Result<Level> {
    match level.to_ascii_lowercase().as_str() {
        "trace" => Ok(Level::TRACE),
        "debug" => Ok(Level::DEBUG),
        "info" => Ok(Level::INFO),
        "warn" | "warning" => Ok(Level::WARN),
        "error" => Ok(Level::ERROR),
        other => Err(LumenError::configuration_field(
            format!("unknown log level '{}'", other),
            "log.level",
        )),
    }
}

/// Install a global fmt subscriber. Returns false if one was already set.
pub fn init(config: &LogConfig) -> Result<bool> {
    let level = parse_level(&config.level)?;
    let installed = tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .try_init()
        .is_ok();
    Ok(installed)
}
