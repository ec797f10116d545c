use chrono::Duration;
use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use url::Url;

use crate::cache::SqliteStorage;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub api: ApiConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub session: SessionConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApiConfig {
  /// Backend base URL, e.g. "https://crm.example.com"
  pub base_url: String,
  #[serde(default = "default_services_path")]
  pub services_path: String,
  /// Per-request timeout
  #[serde(default = "default_timeout_secs")]
  pub timeout_secs: u64,
}

fn default_services_path() -> String {
  "/api/services".to_string()
}

fn default_timeout_secs() -> u64 {
  15
}

impl ApiConfig {
  /// Full URL of the services endpoint.
  pub fn services_url(&self) -> Result<Url> {
    let joined = format!(
      "{}/{}",
      self.base_url.trim_end_matches('/'),
      self.services_path.trim_start_matches('/')
    );
    Url::parse(&joined).map_err(|e| eyre!("Invalid services URL {}: {}", joined, e))
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CacheConfig {
  /// When false, nothing is persisted and every read hits the network
  #[serde(default = "default_true")]
  pub enabled: bool,
  #[serde(default = "default_ttl_days")]
  pub ttl_days: u32,
  /// Database file (default: $XDG_DATA_HOME/svcache/cache.db)
  pub path: Option<PathBuf>,
}

fn default_true() -> bool {
  true
}

fn default_ttl_days() -> u32 {
  30
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      ttl_days: default_ttl_days(),
      path: None,
    }
  }
}

impl CacheConfig {
  pub fn ttl(&self) -> Duration {
    Duration::days(i64::from(self.ttl_days))
  }

  pub fn db_path(&self) -> Result<PathBuf> {
    match &self.path {
      Some(path) => Ok(path.clone()),
      None => SqliteStorage::default_path(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
  /// Sessions older than this are treated as logged out
  #[serde(default = "default_max_age_hours")]
  pub max_age_hours: u32,
}

fn default_max_age_hours() -> u32 {
  24
}

impl Default for SessionConfig {
  fn default() -> Self {
    Self {
      max_age_hours: default_max_age_hours(),
    }
  }
}

impl SessionConfig {
  pub fn max_age(&self) -> Duration {
    Duration::hours(i64::from(self.max_age_hours))
  }
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./svcache.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/svcache/config.yaml
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
        "No configuration file found. Create one at ~/.config/svcache/config.yaml\n\
                 with at least `api: {{ base_url: ... }}`."
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("svcache.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("svcache").join("config.yaml");
      if xdg_path.exists() {
        return Some(xdg_path);
      }
    }

    None
  }

  fn load_from_path(path: &Path) -> Result<Self> {
    let contents = std::fs::read_to_string(path)
      .map_err(|e| eyre!("Failed to read config file {}: {}", path.display(), e))?;

    Self::parse(&contents).map_err(|e| eyre!("Failed to parse config file {}: {}", path.display(), e))
  }

  fn parse(contents: &str) -> Result<Self> {
    let config: Config = serde_yaml::from_str(contents).map_err(|e| eyre!("{}", e))?;
    config.api.services_url()?;
    Ok(config)
  }

  /// Get the API token from environment variables.
  ///
  /// Checks SVCACHE_TOKEN first, then SVCACHE_API_TOKEN as fallback.
  pub fn get_api_token() -> Option<String> {
    std::env::var("SVCACHE_TOKEN")
      .or_else(|_| std::env::var("SVCACHE_API_TOKEN"))
      .ok()
      .filter(|token| !token.trim().is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::parse("api:\n  base_url: https://crm.example.com\n").unwrap();

    assert_eq!(config.api.services_path, "/api/services");
    assert_eq!(config.api.timeout_secs, 15);
    assert!(config.cache.enabled);
    assert_eq!(config.cache.ttl(), Duration::days(30));
    assert_eq!(config.session.max_age(), Duration::hours(24));
  }

  #[test]
  fn test_full_config() {
    let yaml = r#"
api:
  base_url: https://crm.example.com/
  services_path: v2/services
  timeout_secs: 5
cache:
  enabled: false
  ttl_days: 7
  path: /tmp/svcache-test.db
session:
  max_age_hours: 8
"#;
    let config = Config::parse(yaml).unwrap();

    assert!(!config.cache.enabled);
    assert_eq!(config.cache.ttl(), Duration::days(7));
    assert_eq!(
      config.cache.db_path().unwrap(),
      PathBuf::from("/tmp/svcache-test.db")
    );
    assert_eq!(config.session.max_age(), Duration::hours(8));
    assert_eq!(
      config.api.services_url().unwrap().as_str(),
      "https://crm.example.com/v2/services"
    );
  }

  #[test]
  fn test_invalid_base_url_is_rejected() {
    assert!(Config::parse("api:\n  base_url: not a url\n").is_err());
  }

  #[test]
  fn test_missing_api_section_is_rejected() {
    assert!(Config::parse("cache:\n  enabled: true\n").is_err());
  }

  #[test]
  fn test_missing_explicit_path_is_an_error() {
    let dir = tempfile::tempdir().unwrap();
    assert!(Config::load(Some(&dir.path().join("nope.yaml"))).is_err());
  }
}
