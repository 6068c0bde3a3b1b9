use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

use crate::catalog::decode::ASYNC_DECODE_THRESHOLD;
use crate::catalog::{ClientOptions, RetryPolicy};
use crate::sync::SyncOptions;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub server: ServerConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryPolicy,
  #[serde(default = "default_page_size")]
  pub page_size: u64,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
  pub url: String,
  /// Path of the children listing endpoint, relative to `url`
  #[serde(default = "default_items_path")]
  pub items_path: String,
  /// Extra fields requested with every page
  #[serde(default = "default_fields")]
  pub fields: Vec<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  /// Set to false to run memory-only
  pub enabled: bool,
  /// Database file (default: $XDG_DATA_HOME/catsync/cache.db)
  pub path: Option<PathBuf>,
  /// Data younger than this is served without revalidation
  pub fresh_ttl_secs: u64,
  /// Data younger than this is served and revalidated in the background
  pub stale_ttl_secs: u64,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      fresh_ttl_secs: 300,
      stale_ttl_secs: 1800,
    }
  }
}

impl CacheConfig {
  pub fn fresh_ttl(&self) -> Duration {
    Duration::from_secs(self.fresh_ttl_secs)
  }

  pub fn stale_ttl(&self) -> Duration {
    Duration::from_secs(self.stale_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive; RUST_LOG overrides it
  pub level: String,
  /// Log directory (default: $XDG_DATA_HOME/catsync/logs)
  pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
  fn default() -> Self {
    Self {
      level: "info".to_string(),
      directory: None,
    }
  }
}

fn default_page_size() -> u64 {
  100
}

fn default_items_path() -> String {
  "/Items".to_string()
}

fn default_fields() -> Vec<String> {
  vec!["ChildCount".to_string()]
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./catsync.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/catsync/config.yaml
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

    match path {
      Some(p) => Self::load_from_path(&p),
      None => Err(eyre!(
        "No configuration file found. Create one at ~/.config/catsync/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("catsync.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("catsync").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;
    Self::from_yaml(&contents)
      .map_err(|e| eyre!("Invalid config file {}: {}", path.display(), e))
  }

  /// Parse and validate a YAML document.
  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  fn validate(&self) -> Result<()> {
    self.server_url()?;
    if self.page_size == 0 {
      return Err(eyre!("page_size must be greater than zero"));
    }
    if self.cache.stale_ttl_secs < self.cache.fresh_ttl_secs {
      return Err(eyre!(
        "cache.stale_ttl_secs ({}) must not be shorter than cache.fresh_ttl_secs ({})",
        self.cache.stale_ttl_secs,
        self.cache.fresh_ttl_secs
      ));
    }
    Ok(())
  }

  pub fn server_url(&self) -> Result<Url> {
    Url::parse(&self.server.url)
      .map_err(|e| eyre!("Invalid server url '{}': {}", self.server.url, e))
  }

  pub fn client_options(&self) -> ClientOptions {
    ClientOptions {
      retry: self.retry,
      items_path: self.server.items_path.clone(),
      decode_threshold: ASYNC_DECODE_THRESHOLD,
    }
  }

  pub fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      page_size: self.page_size,
      fields: self.server.fields.clone(),
    }
  }

  /// Get the access token from environment variables.
  ///
  /// Checks CATSYNC_TOKEN first, then CATALOG_API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("CATSYNC_TOKEN")
      .or_else(|_| std::env::var("CATALOG_API_TOKEN"))
      .ok()
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn minimal_config_uses_defaults() {
    let config = Config::from_yaml("server:\n  url: https://media.example\n").unwrap();

    assert_eq!(config.page_size, 100);
    assert_eq!(config.server.items_path, "/Items");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.fresh_ttl(), Duration::from_secs(300));
    assert_eq!(config.cache.stale_ttl(), Duration::from_secs(1800));
    assert_eq!(config.retry, RetryPolicy::default());
  }

  #[test]
  fn overrides_are_applied() {
    let yaml = r#"
server:
  url: https://media.example/jf
  items_path: /Users/me/Items
cache:
  enabled: false
  fresh_ttl_secs: 10
  stale_ttl_secs: 20
retry:
  max_retries: 5
page_size: 25
"#;
    let config = Config::from_yaml(yaml).unwrap();
    assert!(!config.cache.enabled);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.base_delay_ms, 500);
    assert_eq!(config.sync_options().page_size, 25);
    assert_eq!(config.client_options().items_path, "/Users/me/Items");
  }

  #[test]
  fn rejects_inverted_ttls() {
    let yaml = "server:\n  url: https://x\ncache:\n  fresh_ttl_secs: 60\n  stale_ttl_secs: 10\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn rejects_bad_url_and_zero_page_size() {
    assert!(Config::from_yaml("server:\n  url: not a url\n").is_err());
    assert!(Config::from_yaml("server:\n  url: https://x\npage_size: 0\n").is_err());
  }
}
