//! Tracing setup.
//!
//! Logs go to a daily rolling file by default so they never interleave with
//! command output; `RUST_LOG` overrides the configured level.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::EnvFilter;

use crate::config::LoggingConfig;

/// Where log output goes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogTarget {
  File,
  Stderr,
}

fn default_log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("catsync").join("logs"))
}

fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
  EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(&config.level))
    .map_err(|e| eyre!("Invalid log level '{}': {}", config.level, e))
}

/// Install the global subscriber. Keep the returned guard alive until exit,
/// dropping it flushes buffered lines.
pub fn init(config: &LoggingConfig, target: LogTarget) -> Result<WorkerGuard> {
  let filter = env_filter(config)?;

  let (writer, guard) = match target {
    LogTarget::Stderr => tracing_appender::non_blocking(std::io::stderr()),
    LogTarget::File => {
      let dir = match &config.directory {
        Some(dir) => dir.clone(),
        None => default_log_dir()?,
      };
      std::fs::create_dir_all(&dir)
        .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;
      tracing_appender::non_blocking(tracing_appender::rolling::daily(dir, "catsync.log"))
    }
  };

  tracing_subscriber::fmt()
    .with_env_filter(filter)
    .with_writer(writer)
    .with_ansi(target == LogTarget::Stderr)
    .try_init()
    .map_err(|e| eyre!("Failed to install log subscriber: {}", e))?;

  Ok(guard)
}
