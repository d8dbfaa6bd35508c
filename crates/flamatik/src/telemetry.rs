//! Log setup for the daemon.
//!
//! Plain `fmt` output filtered by `EnvFilter`. `RUST_LOG` wins over the
//! configured level; `--debug` wins over both.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

/// Filter directives for the given settings
pub fn filter(log_level: &str, force_debug: bool) -> EnvFilter {
    if force_debug {
        return EnvFilter::new("debug");
    }
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level))
}

/// Install the global subscriber. Call once, before anything logs.
pub fn init(log_level: &str, force_debug: bool) -> Result<()> {
    tracing_subscriber::registry()
        .with(filter(log_level, force_debug))
        .with(tracing_subscriber::fmt::layer().with_thread_names(true))
        .try_init()
        .context("Failed to install tracing subscriber")?;

    tracing::debug!(log_level, force_debug, "logging initialized");
    Ok(())
}
