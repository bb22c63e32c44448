//! YAML configuration: file lookup, defaults and validation.

use color_eyre::{eyre::eyre, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::cache::DEFAULT_PREFIX;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
  pub backend: BackendConfig,
  #[serde(default)]
  pub cache: CacheConfig,
  #[serde(default)]
  pub retry: RetryConfig,
  #[serde(default)]
  pub monitor: MonitorConfig,
  #[serde(default)]
  pub logging: LoggingConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendConfig {
  /// Project URL, e.g. https://abc.example.co
  pub url: String,
  /// Environment variable holding the API key
  #[serde(default = "default_api_key_env")]
  pub api_key_env: String,
  #[serde(default = "default_request_timeout_secs")]
  pub request_timeout_secs: u64,
}

fn default_api_key_env() -> String {
  "INFOLINE_API_KEY".to_string()
}

fn default_request_timeout_secs() -> u64 {
  30
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
  pub enabled: bool,
  /// SQLite file; defaults to $XDG_DATA_HOME/infoline/cache.db
  pub path: Option<PathBuf>,
  pub default_ttl_secs: u64,
  pub prefix: String,
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      path: None,
      default_ttl_secs: 300,
      prefix: DEFAULT_PREFIX.to_string(),
    }
  }
}

impl CacheConfig {
  pub fn default_ttl(&self) -> Duration {
    Duration::from_secs(self.default_ttl_secs)
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
  pub max_retries: u32,
  pub initial_delay_ms: u64,
  pub backoff_factor: f64,
  pub jitter_min: f64,
  pub jitter_max: f64,
  pub max_delay_ms: u64,
  /// Stop retrying on errors that cannot succeed on repeat (4xx, decode)
  pub classify_errors: bool,
}

impl Default for RetryConfig {
  fn default() -> Self {
    Self {
      max_retries: 2,
      initial_delay_ms: 1000,
      backoff_factor: 2.0,
      jitter_min: 0.5,
      jitter_max: 1.0,
      max_delay_ms: 30_000,
      classify_errors: true,
    }
  }
}

impl RetryConfig {
  pub fn policy(&self) -> RetryPolicy {
    RetryPolicy {
      max_retries: self.max_retries,
      initial_delay: Duration::from_millis(self.initial_delay_ms),
      backoff_factor: self.backoff_factor,
      jitter_min: self.jitter_min,
      jitter_max: self.jitter_max,
      max_delay: Duration::from_millis(self.max_delay_ms),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MonitorConfig {
  pub probe_interval_secs: u64,
  /// Table read by the health probe
  pub probe_table: String,
}

impl Default for MonitorConfig {
  fn default() -> Self {
    Self {
      probe_interval_secs: 60,
      probe_table: "regions".to_string(),
    }
  }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
  /// Default filter directive, overridden by RUST_LOG
  pub level: String,
  /// Write daily-rotated log files here instead of stderr
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

impl Config {
  /// Load configuration from file.
  ///
  /// Search order:
  /// 1. Explicit path if provided
  /// 2. ./infoline.yaml (current directory)
  /// 3. $XDG_CONFIG_HOME/infoline/config.yaml
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
        "No configuration file found. Create one at ~/.config/infoline/config.yaml"
      )),
    }
  }

  fn find_config_file() -> Option<PathBuf> {
    // Check current directory
    let local = PathBuf::from("infoline.yaml");
    if local.exists() {
      return Some(local);
    }

    // Check XDG config directory
    if let Some(config_dir) = dirs::config_dir() {
      let xdg_path = config_dir.join("infoline").join("config.yaml");
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

  pub fn from_yaml(contents: &str) -> Result<Self> {
    let config: Config =
      serde_yaml::from_str(contents).map_err(|e| eyre!("Failed to parse config: {}", e))?;
    config.validate()?;
    Ok(config)
  }

  pub fn validate(&self) -> Result<()> {
    let retry = &self.retry;
    if !(retry.backoff_factor > 1.0) {
      return Err(eyre!("retry.backoff_factor must be greater than 1"));
    }
    if !(retry.jitter_min > 0.0 && retry.jitter_min <= retry.jitter_max && retry.jitter_max <= 1.0) {
      return Err(eyre!(
        "retry jitter band must satisfy 0 < jitter_min <= jitter_max <= 1"
      ));
    }
    if self.monitor.probe_interval_secs == 0 {
      return Err(eyre!("monitor.probe_interval_secs must be positive"));
    }
    if self.backend.url.trim().is_empty() {
      return Err(eyre!("backend.url must not be empty"));
    }
    Ok(())
  }

  /// Get the backend API key from the configured environment variable.
  pub fn get_api_key(&self) -> Result<String> {
    std::env::var(&self.backend.api_key_env).map_err(|_| {
      eyre!(
        "Backend API key not found. Set the {} environment variable.",
        self.backend.api_key_env
      )
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_minimal_config_uses_defaults() {
    let config = Config::from_yaml("backend:\n  url: https://db.example.test\n").unwrap();

    assert_eq!(config.backend.api_key_env, "INFOLINE_API_KEY");
    assert!(config.cache.enabled);
    assert_eq!(config.cache.default_ttl(), Duration::from_secs(300));
    assert_eq!(config.retry.policy(), RetryPolicy::default());
    assert_eq!(config.monitor.probe_interval_secs, 60);
    assert_eq!(config.logging.level, "info");
  }

  #[test]
  fn test_overrides() {
    let yaml = r#"
backend:
  url: https://db.example.test
  api_key_env: MY_KEY
cache:
  enabled: false
  default_ttl_secs: 30
retry:
  max_retries: 5
  backoff_factor: 1.5
monitor:
  probe_table: schools
"#;
    let config = Config::from_yaml(yaml).unwrap();

    assert!(!config.cache.enabled);
    assert_eq!(config.cache.default_ttl_secs, 30);
    assert_eq!(config.retry.max_retries, 5);
    assert_eq!(config.retry.policy().backoff_factor, 1.5);
    assert_eq!(config.monitor.probe_table, "schools");
  }

  #[test]
  fn test_rejects_non_growing_backoff() {
    let yaml = "backend:\n  url: https://db.example.test\nretry:\n  backoff_factor: 1.0\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_rejects_inverted_jitter_band() {
    let yaml = "backend:\n  url: https://db.example.test\nretry:\n  jitter_min: 0.9\n  jitter_max: 0.4\n";
    assert!(Config::from_yaml(yaml).is_err());
  }

  #[test]
  fn test_missing_backend_is_an_error() {
    assert!(Config::from_yaml("cache:\n  enabled: true\n").is_err());
  }
}
