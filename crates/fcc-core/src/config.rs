//! Configuration management for the checker.
//!
//! Provides TOML-based configuration with XDG-compliant paths and
//! `FCC_*` environment variable overrides.

use crate::error::{ConfigError, ConfigResult};
use directories::ProjectDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;

/// Main application configuration.
///
/// This is loaded from `~/.config/fcc/config.toml` (or platform equivalent).
/// If the file doesn't exist, default values are used.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// Storage settings
    pub database: DatabaseConfig,
    /// Crawl and fetch behaviour
    pub scanner: ScannerConfig,
    /// Worker queue settings
    pub queue: QueueConfig,
    /// Per-domain circuit breaker
    pub circuit: CircuitConfig,
    /// Completion notifications
    pub notifications: NotificationConfig,
}

impl AppConfig {
    /// Load configuration from disk, falling back to defaults if not found.
    ///
    /// # Errors
    /// Returns error if:
    /// - Config directory cannot be determined
    /// - File exists but cannot be read
    /// - File contents are not valid TOML
    pub fn load() -> ConfigResult<Self> {
        let config_path = Self::config_path()?;

        if config_path.exists() {
            tracing::debug!("Loading config from {}", config_path.display());
            let contents = fs::read_to_string(&config_path)?;
            let config = toml::from_str(&contents)?;
            Ok(config)
        } else {
            tracing::debug!("Config file not found, using defaults");
            Ok(Self::default())
        }
    }

    /// Load configuration with environment variable overrides.
    ///
    /// Supports the following environment variables:
    /// - `FCC_DB_PATH`: database file path
    /// - `FCC_REQUEST_TIMEOUT`: per-request timeout in seconds
    /// - `FCC_MAX_RETRIES`: fetch retries after the first attempt
    /// - `FCC_MAX_PAGES`: default site-search page cap
    /// - `FCC_MAX_RESULTS_PER_KEYWORD`: default per-keyword result cap
    /// - `FCC_ALLOW_PRIVATE_NETWORK`: permit private/reserved targets (true/false)
    /// - `FCC_WORKER_STALE_AFTER_SEC`: running-job staleness threshold
    /// - `FCC_WEBHOOK_URL`: completion webhook
    pub fn load_with_env() -> ConfigResult<Self> {
        let mut config = Self::load()?;
        config.apply_env_overrides(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    /// Apply `FCC_*` overrides read through `lookup`.
    ///
    /// # Errors
    /// Returns `ConfigError::InvalidValue` when a present variable cannot be parsed.
    pub fn apply_env_overrides<F>(&mut self, lookup: F) -> ConfigResult<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(path) = lookup("FCC_DB_PATH") {
            self.database.path = Some(PathBuf::from(path));
        }
        if let Some(val) = lookup("FCC_REQUEST_TIMEOUT") {
            self.scanner.request_timeout_secs = parse_env("FCC_REQUEST_TIMEOUT", &val)?;
        }
        if let Some(val) = lookup("FCC_MAX_RETRIES") {
            self.scanner.max_retries = parse_env("FCC_MAX_RETRIES", &val)?;
        }
        if let Some(val) = lookup("FCC_MAX_PAGES") {
            self.scanner.max_pages = parse_env("FCC_MAX_PAGES", &val)?;
        }
        if let Some(val) = lookup("FCC_MAX_RESULTS_PER_KEYWORD") {
            self.scanner.max_results_per_keyword =
                parse_env("FCC_MAX_RESULTS_PER_KEYWORD", &val)?;
        }
        if let Some(val) = lookup("FCC_ALLOW_PRIVATE_NETWORK") {
            self.scanner.allow_private_network = parse_bool("FCC_ALLOW_PRIVATE_NETWORK", &val)?;
        }
        if let Some(val) = lookup("FCC_WORKER_STALE_AFTER_SEC") {
            self.queue.stale_after_secs = parse_env("FCC_WORKER_STALE_AFTER_SEC", &val)?;
        }
        if let Some(url) = lookup("FCC_WEBHOOK_URL") {
            self.notifications.webhook_url = Some(url).filter(|u| !u.trim().is_empty());
        }
        Ok(())
    }

    /// Save configuration to disk.
    ///
    /// Creates the config directory if it doesn't exist.
    pub fn save(&self) -> ConfigResult<()> {
        let config_path = Self::config_path()?;
        let config_dir = config_path
            .parent()
            .ok_or_else(|| ConfigError::InvalidValue {
                field: "config_path".to_string(),
                reason: "no parent directory".to_string(),
            })?;

        fs::create_dir_all(config_dir)?;
        tracing::debug!("Saving config to {}", config_path.display());

        let contents = toml::to_string_pretty(self)?;
        fs::write(config_path, contents)?;
        Ok(())
    }

    /// Get the path to the configuration file.
    ///
    /// Uses XDG base directories: `~/.config/fcc/config.toml`
    pub fn config_path() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "fcc", "fcc").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.config_dir().join("config.toml"))
    }

    /// Get the data directory path.
    ///
    /// Uses XDG base directories: `~/.local/share/fcc`
    pub fn data_dir() -> ConfigResult<PathBuf> {
        let dirs = ProjectDirs::from("com", "fcc", "fcc").ok_or(ConfigError::NoConfigDir)?;
        Ok(dirs.data_dir().to_path_buf())
    }

    /// Database file to open: the configured path or `<data dir>/checker.sqlite`.
    pub fn database_path(&self) -> ConfigResult<PathBuf> {
        match &self.database.path {
            Some(path) => Ok(path.clone()),
            None => Ok(Self::data_dir()?.join("checker.sqlite")),
        }
    }
}

fn parse_env<T: FromStr>(field: &str, value: &str) -> ConfigResult<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e: T::Err| ConfigError::InvalidValue {
            field: field.to_string(),
            reason: e.to_string(),
        })
}

fn parse_bool(field: &str, value: &str) -> ConfigResult<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" | "" => Ok(false),
        other => Err(ConfigError::InvalidValue {
            field: field.to_string(),
            reason: format!("expected a boolean, got '{other}'"),
        }),
    }
}

/// Storage settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `SQLite` file path; `None` uses the data directory
    pub path: Option<PathBuf>,
    /// Connection pool size
    pub max_connections: u32,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: None,
            max_connections: 5,
        }
    }
}

/// Crawl and fetch behaviour.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScannerConfig {
    /// Whole-request timeout in seconds
    pub request_timeout_secs: u64,
    /// Connect timeout in seconds (capped by the request timeout)
    pub connect_timeout_secs: u64,
    /// Retries after the first failed attempt
    pub max_retries: u32,
    /// Backoff unit: attempt `n` waits `2^n * base`
    pub retry_base_delay_ms: u64,
    /// Upper bound of the random jitter added to each backoff
    pub retry_max_jitter_ms: u64,
    /// Redirect hops followed per fetch
    pub max_redirects: u32,
    /// Default site-search page cap
    pub max_pages: u32,
    /// Default per-keyword result cap
    pub max_results_per_keyword: u32,
    /// Response bodies are truncated past this many bytes
    pub max_body_bytes: usize,
    /// User agent string
    pub user_agent: String,
    /// Permit loopback/private/reserved destinations
    pub allow_private_network: bool,
}

impl Default for ScannerConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 15,
            connect_timeout_secs: 8,
            max_retries: 2,
            retry_base_delay_ms: 150,
            retry_max_jitter_ms: 120,
            max_redirects: 5,
            max_pages: 3,
            max_results_per_keyword: 5,
            max_body_bytes: 5 * 1024 * 1024,
            user_agent: format!("ForbiddenContentChecker/{}", env!("CARGO_PKG_VERSION")),
            allow_private_network: false,
        }
    }
}

/// Worker queue settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// A running job untouched for this long is handed back to the queue
    pub stale_after_secs: u64,
    /// Idle worker poll interval
    pub poll_interval_secs: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            stale_after_secs: 120,
            poll_interval_secs: 2,
        }
    }
}

/// Per-domain circuit breaker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CircuitConfig {
    /// Consecutive failed targets that open the circuit
    pub failure_threshold: u32,
    /// How long an open circuit short-circuits the domain, in seconds
    pub open_secs: u64,
}

impl Default for CircuitConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 3,
            open_secs: 300,
        }
    }
}

/// Completion notifications.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NotificationConfig {
    /// Webhook that receives every `scan.completed` event
    pub webhook_url: Option<String>,
    /// Webhook request timeout in seconds
    pub webhook_timeout_secs: u64,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            webhook_url: None,
            webhook_timeout_secs: 8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.scanner.request_timeout_secs, 15);
        assert_eq!(config.scanner.max_retries, 2);
        assert_eq!(config.scanner.max_redirects, 5);
        assert!(!config.scanner.allow_private_network);
        assert_eq!(config.queue.stale_after_secs, 120);
        assert_eq!(config.circuit.failure_threshold, 3);
        assert_eq!(config.circuit.open_secs, 300);
        assert!(config.notifications.webhook_url.is_none());
    }

    #[test]
    fn test_config_serialization() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("[scanner]"));
        assert!(toml_str.contains("[queue]"));
        assert!(toml_str.contains("[circuit]"));

        let parsed: AppConfig = toml::from_str(&toml_str).expect("parse serialized config");
        assert_eq!(parsed.scanner.user_agent, config.scanner.user_agent);
    }

    #[test]
    fn test_config_save_load() {
        let tmp = TempDir::new().expect("create temp dir");
        let config_path = tmp.path().join("config.toml");

        let mut config = AppConfig::default();
        config.scanner.max_pages = 7;
        config.queue.stale_after_secs = 600;

        let contents = toml::to_string_pretty(&config).expect("serialize config");
        fs::write(&config_path, contents).expect("write config file");

        let loaded_contents = fs::read_to_string(&config_path).expect("read config file");
        let loaded: AppConfig = toml::from_str(&loaded_contents).expect("parse loaded config");

        assert_eq!(loaded.scanner.max_pages, 7);
        assert_eq!(loaded.queue.stale_after_secs, 600);
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = [
            ("FCC_DB_PATH", "/tmp/fcc-test.sqlite"),
            ("FCC_MAX_RETRIES", "4"),
            ("FCC_ALLOW_PRIVATE_NETWORK", "true"),
            ("FCC_WORKER_STALE_AFTER_SEC", "30"),
            ("FCC_WEBHOOK_URL", "https://hooks.example.com/fcc"),
        ]
        .into_iter()
        .collect();

        let mut config = AppConfig::default();
        config
            .apply_env_overrides(|key| env.get(key).map(|v| (*v).to_string()))
            .expect("apply overrides");

        assert_eq!(
            config.database_path().expect("db path"),
            PathBuf::from("/tmp/fcc-test.sqlite")
        );
        assert_eq!(config.scanner.max_retries, 4);
        assert!(config.scanner.allow_private_network);
        assert_eq!(config.queue.stale_after_secs, 30);
        assert_eq!(
            config.notifications.webhook_url.as_deref(),
            Some("https://hooks.example.com/fcc")
        );
    }

    #[test]
    fn test_env_override_rejects_garbage() {
        let mut config = AppConfig::default();
        let err = config
            .apply_env_overrides(|key| (key == "FCC_MAX_PAGES").then(|| "many".to_string()))
            .expect_err("non-numeric page cap");
        assert!(matches!(err, ConfigError::InvalidValue { field, .. } if field == "FCC_MAX_PAGES"));
    }

    #[test]
    fn test_partial_config() {
        let toml_str = r#"
[scanner]
max_retries = 0

[circuit]
open_secs = 60
"#;

        let config: AppConfig = toml::from_str(toml_str).expect("parse partial config");
        assert_eq!(config.scanner.max_retries, 0);
        assert_eq!(config.circuit.open_secs, 60);
        // These should be defaults
        assert_eq!(config.scanner.request_timeout_secs, 15);
        assert_eq!(config.circuit.failure_threshold, 3);
    }
}
