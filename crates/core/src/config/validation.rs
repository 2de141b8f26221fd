//! Configuration validation rules.
//!
//! This module provides validation logic for `AppConfig` values
//! after they have been loaded from environment, files, or defaults.

use crate::config::AppConfig;
use thiserror::Error;

/// Configuration validation errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    LoadFailed(String),

    #[error("invalid configuration: {field} - {reason}")]
    Invalid { field: String, reason: String },

    #[error("missing required configuration: {field} ({hint})")]
    Missing { field: String, hint: String },
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `cache_prefix` or `cache_version` is empty or contains whitespace
    /// - `cache_prefix` contains `-`, the partition name separator
    /// - `origin` is not an absolute http(s) URL
    /// - `timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `user_agent` is empty
    /// - any route pattern fails to compile
    /// - `max_attempts` is set to 0
    ///
    /// Returns `ConfigError::Missing` if `offline_page` is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [("cache_prefix", &self.cache_prefix), ("cache_version", &self.cache_version)] {
            if value.is_empty() || value.chars().any(char::is_whitespace) {
                return Err(ConfigError::Invalid {
                    field: field.into(),
                    reason: "must be non-empty and contain no whitespace".into(),
                });
            }
        }

        if self.cache_prefix.contains('-') {
            return Err(ConfigError::Invalid {
                field: "cache_prefix".into(),
                reason: "must not contain '-', it separates the parts of a partition name".into(),
            });
        }

        match url::Url::parse(&self.origin) {
            Ok(origin) if matches!(origin.scheme(), "http" | "https") => {}
            Ok(origin) => {
                return Err(ConfigError::Invalid {
                    field: "origin".into(),
                    reason: format!("unsupported scheme: {}", origin.scheme()),
                });
            }
            Err(e) => return Err(ConfigError::Invalid { field: "origin".into(), reason: e.to_string() }),
        }

        if self.offline_page.is_empty() {
            return Err(ConfigError::Missing {
                field: "offline_page".into(),
                hint: "Set WAYSTATION_OFFLINE_PAGE to a precached document".into(),
            });
        }

        if self.timeout_ms < 100 {
            return Err(ConfigError::Invalid { field: "timeout_ms".into(), reason: "must be at least 100ms".into() });
        }
        if self.timeout_ms > 300_000 {
            return Err(ConfigError::Invalid {
                field: "timeout_ms".into(),
                reason: "must not exceed 5 minutes (300000ms)".into(),
            });
        }

        if self.user_agent.is_empty() {
            return Err(ConfigError::Invalid { field: "user_agent".into(), reason: "must not be empty".into() });
        }

        for (field, patterns) in [
            ("static_patterns", &self.static_patterns),
            ("network_first_patterns", &self.network_first_patterns),
            ("stale_while_revalidate_patterns", &self.stale_while_revalidate_patterns),
        ] {
            for pattern in patterns {
                if let Err(e) = regex::Regex::new(pattern) {
                    return Err(ConfigError::Invalid { field: field.into(), reason: e.to_string() });
                }
            }
        }

        if self.max_attempts == Some(0) {
            return Err(ConfigError::Invalid { field: "max_attempts".into(), reason: "must be at least 1".into() });
        }

        if !self.precache.iter().any(|p| p == &self.offline_page) {
            tracing::warn!(
                offline_page = %self.offline_page,
                "offline_page is not in the precache manifest; failed navigations will fall back to 503"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_empty_version() {
        let config = AppConfig { cache_version: String::new(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_version"));
    }

    #[test]
    fn test_validate_prefix_with_whitespace() {
        let config = AppConfig { cache_prefix: "my app".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_prefix"));
    }

    #[test]
    fn test_validate_prefix_with_separator() {
        let config = AppConfig { cache_prefix: "app-admin".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "cache_prefix"));
    }

    #[test]
    fn test_validate_bad_origin() {
        let config = AppConfig { origin: "ftp://example.com".into(), ..Default::default() };
        let result = config.validate();
        assert!(matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "origin"));

        let config = AppConfig { origin: "not a url".into(), ..Default::default() };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_validate_missing_offline_page() {
        let config = AppConfig { offline_page: String::new(), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Missing { .. })));
    }

    #[test]
    fn test_validate_timeout_bounds() {
        let config = AppConfig { timeout_ms: 50, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 301_000, ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "timeout_ms"));

        let config = AppConfig { timeout_ms: 100, ..Default::default() };
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_bad_pattern() {
        let config = AppConfig { stale_while_revalidate_patterns: vec!["^/api/(news".into()], ..Default::default() };
        let result = config.validate();
        assert!(
            matches!(result, Err(ConfigError::Invalid { field, .. }) if field == "stale_while_revalidate_patterns")
        );
    }

    #[test]
    fn test_validate_zero_max_attempts() {
        let config = AppConfig { max_attempts: Some(0), ..Default::default() };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid { field, .. }) if field == "max_attempts"));

        let config = AppConfig { max_attempts: Some(1), ..Default::default() };
        assert!(config.validate().is_ok());
    }
}
