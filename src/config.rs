use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::cache::{StalenessPolicy, DEFAULT_STALE_AFTER_MINUTES};
use crate::db::Database;
use crate::screens::home::DEFAULT_PREVIEW_LIMIT;

/// Public demo catalog used when nothing else is configured
pub const DEFAULT_API_URL: &str =
  "https://my-json-server.typicode.com/KeskoSenukaiDigital/assignment";

/// Environment variable overriding `api.base_url`
pub const API_URL_ENV: &str = "BOOKSHELF_API_URL";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheConfig,
  pub home: HomeConfig,
  pub log: LogConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Connect and overall request timeout
  pub timeout_secs: u64,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_API_URL.to_string(),
      timeout_secs: 30,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Database file (defaults to the platform data directory)
  pub path: Option<PathBuf>,
  pub stale_after_minutes: i64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      path: None,
      stale_after_minutes: DEFAULT_STALE_AFTER_MINUTES,
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct HomeConfig {
  /// Books shown per list on the overview
  pub preview_limit: usize,
}

impl Default for HomeConfig {
  fn default() -> Self {
    Self {
      preview_limit: DEFAULT_PREVIEW_LIMIT,
    }
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LogConfig {
  /// Filter directive such as "debug" or "bookshelf=trace"; RUST_LOG wins
  pub level: Option<String>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./bookshelf.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/bookshelf/config.yaml
  ///
  /// Without any file the built-in defaults apply. `BOOKSHELF_API_URL`
  /// overrides the configured endpoint either way.
  pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
    let path = if let Some(p) = explicit_path {
      if p.exists() {
        Some(p.to_path_buf())
      } else {
        return Err(eyre!("Config file not found: {}", p.display()));
      }
    } else {
      Self::find_config_file()
    };

    let config = match path {
      Some(p) => Self::load_from_path(&p)?,
      None => Self::default(),
    };

    Ok(config.with_api_url(std::env::var(API_URL_ENV).ok()))
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("bookshelf.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("bookshelf").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents)
      .map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    // An empty file is valid and means "all defaults"
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    Ok(config)
  }

  /// Replace the endpoint when `url` is set and not blank.
  pub fn with_api_url(mut self, url: Option<String>) -> Self {
    if let Some(url) = url.filter(|u| !u.trim().is_empty()) {
      self.api.base_url = url;
    }
    self
  }

  /// Where the cache database lives
  pub fn cache_path(&self) -> Result<PathBuf> {
    match &self.cache.path {
      Some(path) => Ok(path.clone()),
      None => Database::default_path(),
    }
  }

  pub fn staleness(&self) -> StalenessPolicy {
    StalenessPolicy::new(chrono::Duration::minutes(
      self.cache.stale_after_minutes.max(0),
    ))
  }
}
