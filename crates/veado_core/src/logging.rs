//! Process-wide `tracing` setup for the standalone host.

use std::path::Path;

use anyhow::{Context, Result};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Directives used when `RUST_LOG` is unset or invalid.
pub const DEFAULT_FILTER: &str = "info,veado_network=debug,veado_model=debug,veado_app=debug";

/// Rolling log files are named `<prefix>.<date>`.
pub const LOG_FILE_PREFIX: &str = "veadolink.log";

/// Install a daily-rolling file layer in `logs_dir` plus a compact console
/// layer. Keep the returned guard alive until exit or buffered lines are lost.
///
/// Fails if a global subscriber is already installed.
pub fn init_logging(logs_dir: &Path) -> Result<WorkerGuard> {
    std::fs::create_dir_all(logs_dir)
        .with_context(|| format!("Failed to create logs directory: {}", logs_dir.display()))?;

    let (file_writer, guard) =
        tracing_appender::non_blocking(tracing_appender::rolling::daily(logs_dir, LOG_FILE_PREFIX));

    tracing_subscriber::registry()
        .with(env_filter())
        .with(fmt::layer().with_ansi(false).with_writer(file_writer))
        .with(fmt::layer().with_target(false).compact())
        .try_init()
        .context("Failed to initialize logging")?;

    tracing::debug!("Logging to {}", logs_dir.display());
    Ok(guard)
}

fn env_filter() -> EnvFilter {
    EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER))
}
