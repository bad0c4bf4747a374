//! Tracing subscriber setup.
//!
//! Logs go to a daily rolling file so stdout stays free for command output.
//! `--verbose` sends them to stderr instead.

use color_eyre::{eyre::eyre, Result};
use std::path::PathBuf;
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::{RollingFileAppender, Rotation};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter, Registry};

use crate::config::LogConfig;

const DEFAULT_LEVEL: &str = "info";

/// Install the global subscriber. Keep the returned guard alive until exit
/// so buffered lines are flushed.
pub fn init(config: &LogConfig, verbose: bool) -> Result<Option<WorkerGuard>> {
  let filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(filter_directive(config)))
    .map_err(|e| eyre!("Invalid log filter: {}", e))?;

  if verbose {
    Registry::default()
      .with(filter)
      .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
      .try_init()
      .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;
    return Ok(None);
  }

  let dir = log_dir()?;
  std::fs::create_dir_all(&dir)
    .map_err(|e| eyre!("Failed to create log directory {}: {}", dir.display(), e))?;

  let appender = RollingFileAppender::new(Rotation::DAILY, &dir, "bookshelf.log");
  let (writer, guard) = tracing_appender::non_blocking(appender);

  Registry::default()
    .with(filter)
    .with(fmt::layer().with_writer(writer).with_ansi(false))
    .try_init()
    .map_err(|e| eyre!("Failed to initialize logging: {}", e))?;

  Ok(Some(guard))
}

fn filter_directive(config: &LogConfig) -> String {
  config
    .level
    .as_deref()
    .map(str::trim)
    .filter(|l| !l.is_empty())
    .unwrap_or(DEFAULT_LEVEL)
    .to_string()
}

fn log_dir() -> Result<PathBuf> {
  let data_dir = dirs::data_dir()
    .or_else(|| dirs::home_dir().map(|p| p.join(".local/share")))
    .ok_or_else(|| eyre!("Could not determine data directory"))?;
  Ok(data_dir.join("bookshelf").join("logs"))
}
