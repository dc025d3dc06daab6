//! Configuration module for Canline.
//!
//! Provides YAML-based configuration loading and validation for:
//! - Database settings (path, pool size, channel capacity, durability)
//! - Retention windows for production events and system metrics

mod app;
mod validation;

pub use app::{AppConfig, DatabaseConfig, RetentionConfig};
pub use validation::{ConfigError, expand_env_vars, parse_duration};

// Re-export constants
pub use app::{
    DEFAULT_BUSY_TIMEOUT, DEFAULT_CHANNEL_CAPACITY, DEFAULT_CHECKPOINT_INTERVAL, DEFAULT_DB_PATH,
    DEFAULT_POOL_SIZE,
};
