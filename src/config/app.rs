//! Application configuration structures.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::storage::db::SyncMode;

use super::validation::{ConfigError, expand_env_vars, parse_duration, require_positive};

// =============================================================================
// Constants
// =============================================================================

/// Default database location, relative to the working directory.
pub const DEFAULT_DB_PATH: &str = "data/canline.db";

/// Default reader pool size.
pub const DEFAULT_POOL_SIZE: u32 = 4;

/// Default writer channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1_024;

/// Default checkpoint interval (5 seconds).
pub const DEFAULT_CHECKPOINT_INTERVAL: Duration = Duration::from_secs(5);

/// Default busy timeout (5 seconds).
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn default_path() -> String {
    DEFAULT_DB_PATH.to_string()
}

fn default_pool_size() -> u32 {
    DEFAULT_POOL_SIZE
}

fn default_channel_capacity() -> usize {
    DEFAULT_CHANNEL_CAPACITY
}

fn default_checkpoint_interval() -> String {
    "5s".to_string()
}

fn default_busy_timeout() -> Duration {
    DEFAULT_BUSY_TIMEOUT
}

// =============================================================================
// Database Configuration
// =============================================================================

/// Database configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database file path or full `sqlite:` URL. `${VAR:-default}` is expanded.
    #[serde(default = "default_path")]
    pub path: String,

    /// Connection pool size for read operations (default: 4).
    #[serde(default = "default_pool_size")]
    pub pool_size: u32,

    /// Writer channel capacity (default: 1024).
    #[serde(default = "default_channel_capacity")]
    pub channel_capacity: usize,

    /// WAL checkpoint interval (default: "5s").
    #[serde(default = "default_checkpoint_interval")]
    pub checkpoint_interval: String,

    /// Commit durability (default: full).
    #[serde(default)]
    pub sync_mode: SyncMode,

    /// How long a statement waits on a locked database (default: 5s).
    #[serde(default = "default_busy_timeout", with = "humantime_serde")]
    pub busy_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_path(),
            pool_size: DEFAULT_POOL_SIZE,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            checkpoint_interval: default_checkpoint_interval(),
            sync_mode: SyncMode::default(),
            busy_timeout: DEFAULT_BUSY_TIMEOUT,
        }
    }
}

impl DatabaseConfig {
    /// SQLite URL for the configured path, with environment references expanded.
    pub fn connection_url(&self) -> String {
        let path = expand_env_vars(&self.path);
        if path.starts_with("sqlite:") {
            path
        } else {
            format!("sqlite:{path}")
        }
    }

    /// Parsed checkpoint interval, falling back to the default on bad input.
    pub fn checkpoint_interval(&self) -> Duration {
        parse_duration(&self.checkpoint_interval).unwrap_or(DEFAULT_CHECKPOINT_INTERVAL)
    }
}

// =============================================================================
// Retention Configuration
// =============================================================================

/// Age limits applied by `canline trim`. Unset means keep forever.
///
/// Fault logs have no retention setting; they are never trimmed.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetentionConfig {
    #[serde(default, with = "humantime_serde")]
    pub events: Option<Duration>,

    #[serde(default, with = "humantime_serde")]
    pub metrics: Option<Duration>,
}

// =============================================================================
// Application Configuration
// =============================================================================

/// Top-level application configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Database configuration.
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Retention windows.
    #[serde(default)]
    pub retention: RetentionConfig,
}

impl AppConfig {
    /// Load configuration from a YAML file.
    ///
    /// # Errors
    /// Returns `ConfigError` if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path.as_ref())?;
        Self::from_yaml(&content)
    }

    /// Parse and validate configuration from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_yaml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    /// Returns `ConfigError::ValidationError` if any field is invalid.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if expand_env_vars(&self.database.path).trim().is_empty() {
            return Err(ConfigError::invalid("database.path", "must not be empty"));
        }

        require_positive("database.pool_size", self.database.pool_size)?;
        require_positive("database.channel_capacity", self.database.channel_capacity)?;

        parse_duration(&self.database.checkpoint_interval)
            .map_err(|e| ConfigError::invalid("database.checkpoint_interval", e))?;

        for (field, window) in [
            ("retention.events", self.retention.events),
            ("retention.metrics", self.retention.metrics),
        ] {
            if window.is_some_and(|w| w.is_zero()) {
                return Err(ConfigError::invalid(field, "must be longer than zero"));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_config_default() {
        let config = DatabaseConfig::default();
        assert_eq!(config.path, DEFAULT_DB_PATH);
        assert_eq!(config.pool_size, DEFAULT_POOL_SIZE);
        assert_eq!(config.channel_capacity, DEFAULT_CHANNEL_CAPACITY);
        assert_eq!(config.sync_mode, SyncMode::Full);
        assert_eq!(config.checkpoint_interval(), DEFAULT_CHECKPOINT_INTERVAL);
    }

    #[test]
    fn test_empty_yaml_uses_defaults() {
        let config = AppConfig::from_yaml("{}").unwrap();
        assert_eq!(config.database.connection_url(), "sqlite:data/canline.db");
        assert!(config.retention.events.is_none());
        assert!(config.retention.metrics.is_none());
    }

    #[test]
    fn test_full_yaml() {
        let yaml = r#"
database:
  path: ${CANLINE_TEST_APP_UNSET:-/var/lib/canline}/line.db
  pool_size: 8
  channel_capacity: 256
  checkpoint_interval: 30s
  sync_mode: normal
  busy_timeout: 2s
retention:
  events: 90d
  metrics: 7d
"#;
        let config = AppConfig::from_yaml(yaml).unwrap();
        assert_eq!(
            config.database.connection_url(),
            "sqlite:/var/lib/canline/line.db"
        );
        assert_eq!(config.database.pool_size, 8);
        assert_eq!(config.database.sync_mode, SyncMode::Normal);
        assert_eq!(config.database.busy_timeout, Duration::from_secs(2));
        assert_eq!(config.database.checkpoint_interval(), Duration::from_secs(30));
        assert_eq!(
            config.retention.events,
            Some(Duration::from_secs(90 * 86_400))
        );
        assert_eq!(config.retention.metrics, Some(Duration::from_secs(7 * 86_400)));
    }

    #[test]
    fn test_connection_url_keeps_full_url() {
        let config = DatabaseConfig {
            path: "sqlite::memory:".to_string(),
            ..DatabaseConfig::default()
        };
        assert_eq!(config.connection_url(), "sqlite::memory:");
    }

    #[test]
    fn test_validation_rejects_zero_pool() {
        let config = AppConfig {
            database: DatabaseConfig {
                pool_size: 0,
                ..DatabaseConfig::default()
            },
            ..AppConfig::default()
        };
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("database.pool_size"));
    }

    #[test]
    fn test_validation_rejects_bad_interval() {
        let yaml = "database:\n  checkpoint_interval: sometimes\n";
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(ConfigError::ValidationError(_))
        ));
    }

    #[test]
    fn test_validation_rejects_zero_retention() {
        let yaml = "retention:\n  events: 0s\n";
        let err = AppConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("retention.events"));
    }

    #[test]
    fn test_unknown_sync_mode_is_parse_error() {
        let yaml = "database:\n  sync_mode: off\n";
        assert!(matches!(
            AppConfig::from_yaml(yaml),
            Err(ConfigError::ParseError(_))
        ));
    }
}
