//! Configuration errors and value helpers.

use std::time::Duration;

use thiserror::Error;

/// Configuration error types.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read configuration file.
    #[error("failed to read config file: {0}")]
    IoError(#[from] std::io::Error),

    /// Failed to parse YAML configuration.
    #[error("failed to parse YAML config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// Configuration validation failed.
    #[error("config validation error: {0}")]
    ValidationError(String),
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl std::fmt::Display) -> Self {
        Self::ValidationError(format!("{field}: {reason}"))
    }
}

/// Parse a human-readable duration such as `30s`, `5m`, `1h30m` or `90d`.
///
/// # Examples
///
/// ```
/// use canline::config::parse_duration;
///
/// assert_eq!(parse_duration("5s").unwrap().as_secs(), 5);
/// assert_eq!(parse_duration("1h30m").unwrap().as_secs(), 5400);
/// assert_eq!(parse_duration("7d").unwrap().as_secs(), 604_800);
/// ```
pub fn parse_duration(s: &str) -> Result<Duration, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("duration string is empty".to_string());
    }
    humantime::parse_duration(s).map_err(|e| e.to_string())
}

/// Expand `${VAR}` and `${VAR:-default}` references from the environment.
///
/// Unset variables without a default expand to the empty string.
pub fn expand_env_vars(input: &str) -> String {
    static ENV_VAR_REGEX: std::sync::OnceLock<regex::Regex> = std::sync::OnceLock::new();

    let regex = ENV_VAR_REGEX.get_or_init(|| {
        regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)(?::-([^}]*))?\}")
            .expect("env var pattern is a valid regex")
    });

    regex
        .replace_all(input, |caps: &regex::Captures| {
            let fallback = caps.get(2).map_or("", |m| m.as_str());
            std::env::var(&caps[1]).unwrap_or_else(|_| fallback.to_string())
        })
        .into_owned()
}

/// Reject zero for a count-like setting.
pub(crate) fn require_positive<T>(field: &str, value: T) -> Result<(), ConfigError>
where
    T: PartialOrd + Default,
{
    if value <= T::default() {
        return Err(ConfigError::invalid(field, "must be positive"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("500ms").unwrap(), Duration::from_millis(500));
        assert_eq!(parse_duration(" 5s ").unwrap(), Duration::from_secs(5));
        assert_eq!(parse_duration("30d").unwrap(), Duration::from_secs(30 * 86_400));
        assert_eq!(parse_duration("1h 15m").unwrap(), Duration::from_secs(4_500));
    }

    #[test]
    fn test_parse_duration_invalid() {
        assert!(parse_duration("").is_err());
        assert!(parse_duration("soon").is_err());
        assert!(parse_duration("10").is_err());
    }

    #[test]
    fn test_expand_env_vars_default_and_passthrough() {
        assert_eq!(expand_env_vars("data/line.db"), "data/line.db");
        assert_eq!(
            expand_env_vars("${CANLINE_TEST_UNSET_DIR:-/var/lib/canline}/line.db"),
            "/var/lib/canline/line.db"
        );
        assert_eq!(expand_env_vars("${CANLINE_TEST_UNSET_EMPTY}x"), "x");
    }

    #[test]
    fn test_expand_env_vars_from_env() {
        // SAFETY: the variable name is unique to this test.
        unsafe {
            std::env::set_var("CANLINE_TEST_DB_DIR", "/srv/line3");
        }
        assert_eq!(
            expand_env_vars("${CANLINE_TEST_DB_DIR:-/tmp}/canline.db"),
            "/srv/line3/canline.db"
        );
        // SAFETY: cleanup of the variable set above.
        unsafe {
            std::env::remove_var("CANLINE_TEST_DB_DIR");
        }
    }

    #[test]
    fn test_require_positive() {
        assert!(require_positive("database.pool_size", 4u32).is_ok());
        let err = require_positive("database.channel_capacity", 0usize).unwrap_err();
        assert_eq!(
            err.to_string(),
            "config validation error: database.channel_capacity: must be positive"
        );
    }
}
