//! Logging setup for the chainsong binary.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Install a fmt subscriber filtered by `log_level` (an `EnvFilter` directive string).
pub fn init(log_level: &str) -> Result<()> {
    let env_filter = EnvFilter::try_new(log_level)
        .with_context(|| format!("Invalid log level directive: {log_level}"))?;

    tracing_subscriber::registry()
        .with(env_filter)
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    Ok(())
}
