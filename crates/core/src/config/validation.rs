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
}

fn invalid(field: &str, reason: &str) -> ConfigError {
    ConfigError::Invalid { field: field.into(), reason: reason.into() }
}

impl AppConfig {
    /// Validate configuration values after loading.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` if:
    /// - `quota_bytes` is 0
    /// - `chunk_size` is 0 or larger than the quota
    /// - `max_bytes` is 0 or exceeds 50MB
    /// - `fetch_timeout_ms` is less than 100ms or exceeds 5 minutes
    /// - `request_timeout_ms` is shorter than `fetch_timeout_ms`
    /// - `expire_seconds` is not positive
    /// - `key_prefix` or `user_agent` is empty
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.quota_bytes == 0 {
            return Err(invalid("quota_bytes", "must be greater than 0"));
        }

        if self.chunk_size == 0 {
            return Err(invalid("chunk_size", "must be greater than 0"));
        }
        if self.chunk_size as u64 > self.quota_bytes {
            return Err(invalid("chunk_size", "must not exceed quota_bytes"));
        }

        if self.max_bytes == 0 {
            return Err(invalid("max_bytes", "must be greater than 0"));
        }
        if self.max_bytes > 50 * 1024 * 1024 {
            return Err(invalid("max_bytes", "must not exceed 50MB"));
        }

        if self.fetch_timeout_ms < 100 {
            return Err(invalid("fetch_timeout_ms", "must be at least 100ms"));
        }
        if self.fetch_timeout_ms > 300_000 {
            return Err(invalid("fetch_timeout_ms", "must not exceed 5 minutes (300000ms)"));
        }
        if self.request_timeout_ms < self.fetch_timeout_ms {
            return Err(invalid("request_timeout_ms", "must be at least fetch_timeout_ms"));
        }

        if self.expire_seconds <= 0 {
            return Err(invalid("expire_seconds", "must be greater than 0"));
        }

        if self.key_prefix.is_empty() {
            return Err(invalid("key_prefix", "must not be empty"));
        }
        if self.user_agent.is_empty() {
            return Err(invalid("user_agent", "must not be empty"));
        }

        if self.max_bytes as u64 > self.quota_bytes {
            tracing::warn!(
                max_bytes = self.max_bytes,
                quota_bytes = self.quota_bytes,
                "max_bytes exceeds quota_bytes; the largest responses can never be cached"
            );
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(result: Result<(), ConfigError>) -> String {
        match result {
            Err(ConfigError::Invalid { field, .. }) => field,
            other => panic!("expected Invalid, got {other:?}"),
        }
    }

    #[test]
    fn test_validate_default_config() {
        let config = AppConfig::default();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validate_quota_zero() {
        let config = AppConfig { quota_bytes: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()), "quota_bytes");
    }

    #[test]
    fn test_validate_chunk_size_over_quota() {
        let config = AppConfig { quota_bytes: 1000, chunk_size: 1001, ..Default::default() };
        assert_eq!(field_of(config.validate()), "chunk_size");
    }

    #[test]
    fn test_validate_max_bytes_exceeds_limit() {
        let config = AppConfig { max_bytes: 51 * 1024 * 1024, ..Default::default() }; // 51MB
        assert_eq!(field_of(config.validate()), "max_bytes");
    }

    #[test]
    fn test_validate_fetch_timeout_bounds() {
        let config = AppConfig { fetch_timeout_ms: 50, ..Default::default() };
        assert_eq!(field_of(config.validate()), "fetch_timeout_ms");

        let config = AppConfig { fetch_timeout_ms: 301_000, request_timeout_ms: 400_000, ..Default::default() };
        assert_eq!(field_of(config.validate()), "fetch_timeout_ms");
    }

    #[test]
    fn test_validate_request_timeout_shorter_than_fetch() {
        let config = AppConfig { fetch_timeout_ms: 5_000, request_timeout_ms: 4_000, ..Default::default() };
        assert_eq!(field_of(config.validate()), "request_timeout_ms");
    }

    #[test]
    fn test_validate_expire_seconds() {
        let config = AppConfig { expire_seconds: 0, ..Default::default() };
        assert_eq!(field_of(config.validate()), "expire_seconds");
    }

    #[test]
    fn test_validate_empty_strings() {
        let config = AppConfig { key_prefix: String::new(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "key_prefix");

        let config = AppConfig { user_agent: String::new(), ..Default::default() };
        assert_eq!(field_of(config.validate()), "user_agent");
    }

    #[test]
    fn test_validate_edge_case_values() {
        let config = AppConfig {
            quota_bytes: 1,
            chunk_size: 1,
            max_bytes: 1,
            fetch_timeout_ms: 100,
            request_timeout_ms: 100,
            expire_seconds: 1,
            ..Default::default()
        };
        assert!(config.validate().is_ok());
    }
}
