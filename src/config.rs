use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::CacheConfig;

pub const DEFAULT_BASE_URL: &str = "https://openexchangerates.org/api/";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
  pub api: ApiConfig,
  pub cache: CacheSection,
  pub throttle: ThrottleConfig,
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
  pub base_url: String,
  /// Extra headers sent with every request
  pub headers: BTreeMap<String, String>,
  /// Extra query params appended to every request
  pub query: BTreeMap<String, String>,
  pub timeout_secs: u64,
  /// Currency the rates are quoted against
  pub base_currency: String,
}

impl Default for ApiConfig {
  fn default() -> Self {
    Self {
      base_url: DEFAULT_BASE_URL.to_string(),
      headers: BTreeMap::new(),
      query: BTreeMap::new(),
      timeout_secs: 30,
      base_currency: String::from("USD"),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheSection {
  /// Parent of the cache directory (default: platform cache dir)
  pub dir: Option<PathBuf>,
  pub max_age_secs: u64,
  pub max_memory_cost: usize,
  pub max_size_bytes: u64,
  /// Fraction of max_size_bytes a size eviction shrinks down to
  pub shrink_ratio: f64,
}

impl Default for CacheSection {
  fn default() -> Self {
    let defaults = CacheConfig::default();
    Self {
      dir: None,
      max_age_secs: defaults.max_age.as_secs(),
      max_memory_cost: defaults.max_memory_cost,
      max_size_bytes: defaults.max_size,
      shrink_ratio: defaults.shrink_ratio,
    }
  }
}

impl CacheSection {
  pub fn to_cache_config(&self) -> CacheConfig {
    CacheConfig {
      max_age: Duration::from_secs(self.max_age_secs),
      max_memory_cost: self.max_memory_cost,
      max_size: self.max_size_bytes,
      shrink_ratio: self.shrink_ratio,
    }
  }

  /// Configured dir, else the platform cache dir.
  pub fn resolve_dir(&self) -> Result<PathBuf> {
    if let Some(dir) = &self.dir {
      return Ok(dir.clone());
    }
    dirs::cache_dir()
      .or_else(|| dirs::home_dir().map(|p| p.join(".cache")))
      .map(|p| p.join("xrate"))
      .ok_or_else(|| eyre!("Could not determine cache directory"))
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ThrottleConfig {
  pub interval_secs: u64,
}

impl Default for ThrottleConfig {
  fn default() -> Self {
    Self { interval_secs: 3600 }
  }
}

impl ThrottleConfig {
  pub fn interval(&self) -> Duration {
    Duration::from_secs(self.interval_secs)
  }
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Write logs to this file instead of stderr
  pub file: Option<PathBuf>,
}

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./xrate.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/xrate/config.yaml
  ///
  /// Built-in defaults apply when no file is found.
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
      None => Ok(Self::default()),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("xrate.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("xrate").join("config.yaml");
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

  pub fn parse(contents: &str) -> std::result::Result<Self, serde_yaml::Error> {
    // An empty file deserializes to unit, not to an empty mapping
    if contents.trim().is_empty() {
      return Ok(Self::default());
    }
    serde_yaml::from_str(contents)
  }

  /// Get the API app id from environment variables.
  ///
  /// Checks XRATE_APP_ID first, then OPENEXCHANGERATES_APP_ID as fallback.
  pub fn get_app_id() -> Option<String> {
    std::env::var("XRATE_APP_ID")
      .or_else(|_| std::env::var("OPENEXCHANGERATES_APP_ID"))
      .ok()
      .filter(|id| !id.is_empty())
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_defaults_without_file_contents() {
    let config = Config::parse("").unwrap();
    assert_eq!(config.api.base_url, DEFAULT_BASE_URL);
    assert_eq!(config.throttle.interval(), Duration::from_secs(3600));
    assert_eq!(config.cache.to_cache_config(), CacheConfig::default());
  }

  #[test]
  fn test_partial_sections_keep_defaults() {
    let yaml = r#"
api:
  base_url: https://rates.example.test/v2/
  query:
    show_alternative: "1"
cache:
  max_size_bytes: 1024
  shrink_ratio: 0.25
throttle:
  interval_secs: 60
"#;
    let config = Config::parse(yaml).unwrap();
    assert_eq!(config.api.base_url, "https://rates.example.test/v2/");
    assert_eq!(config.api.timeout_secs, 30);
    assert_eq!(config.api.query["show_alternative"], "1");
    let cache = config.cache.to_cache_config();
    assert_eq!(cache.max_size, 1024);
    assert_eq!(cache.shrink_ratio, 0.25);
    assert_eq!(cache.max_age, CacheConfig::default().max_age);
    assert_eq!(config.throttle.interval_secs, 60);
    assert!(config.logging.file.is_none());
  }

  #[test]
  fn test_missing_explicit_file_is_an_error() {
    assert!(Config::load(Some(Path::new("/definitely/not/here.yaml"))).is_err());
  }
}
