//! Logging system setup.

use crate::config::LoggingSettings;
use anyhow::{Context, Result};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Installs the global tracing subscriber.
///
/// `RUST_LOG` takes precedence over the configured level. Fails if a global
/// subscriber is already installed.
pub fn setup_logging(config: &LoggingSettings) -> Result<()> {
    let level = config.level.as_str();
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let registry = tracing_subscriber::registry().with(filter);

    if config.json_format {
        registry
            .with(fmt::layer().json().with_target(false).with_thread_names(true))
            .try_init()
            .context("Failed to install JSON log subscriber")?;
    } else {
        registry
            .with(fmt::layer().with_target(false).with_thread_names(true))
            .try_init()
            .context("Failed to install log subscriber")?;
    }

    info!("Logging initialized with level: {}", level);
    Ok(())
}
