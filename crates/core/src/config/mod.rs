//! Application configuration with layered loading.
//!
//! This module provides configuration management using figment for layered
//! configuration loading from multiple sources:
//!
//! 1. Environment variables (SCRIPT_CACHE_*)
//! 2. TOML config file (if SCRIPT_CACHE_CONFIG_FILE set)
//! 3. Built-in defaults

use std::path::PathBuf;
use std::time::Duration;

use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
};
use serde::{Deserialize, Serialize};

mod validation;

pub use validation::ConfigError;

/// Which transport the background fetcher uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// Pick at runtime based on what the executing context supports.
    #[default]
    Auto,
    /// Async client reading the body incrementally.
    Streaming,
    /// Blocking client on a request thread, polled for completion.
    Legacy,
}

/// Application configuration with layered loading.
///
/// Loading precedence (highest wins):
/// 1. Environment variables (SCRIPT_CACHE_*)
/// 2. TOML config file (if SCRIPT_CACHE_CONFIG_FILE set)
/// 3. Built-in defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Path to SQLite cache database.
    ///
    /// Set via SCRIPT_CACHE_DB_PATH environment variable.
    #[serde(default = "default_db_path")]
    pub db_path: PathBuf,

    /// Storage ceiling in bytes, counting keys and values.
    ///
    /// Set via SCRIPT_CACHE_QUOTA_BYTES environment variable.
    #[serde(default = "default_quota_bytes")]
    pub quota_bytes: u64,

    /// Namespace prefix for every stored key.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,

    /// Lifetime of a cached artifact in seconds.
    ///
    /// Set via SCRIPT_CACHE_EXPIRE_SECONDS environment variable.
    #[serde(default = "default_expire_seconds")]
    pub expire_seconds: i64,

    /// Payloads larger than this are split into chunks of this size.
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,

    /// Network timeout for a single background fetch, in milliseconds.
    #[serde(default = "default_fetch_timeout_ms")]
    pub fetch_timeout_ms: u64,

    /// How long the orchestrator waits for a background fetch before giving up on it.
    #[serde(default = "default_request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Maximum bytes to fetch per request.
    #[serde(default = "default_max_bytes")]
    pub max_bytes: usize,

    /// User-Agent string for HTTP requests.
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Fetch transport selection.
    #[serde(default)]
    pub transport: TransportKind,
}

fn default_db_path() -> PathBuf {
    PathBuf::from("./script-cache.sqlite")
}

fn default_quota_bytes() -> u64 {
    5_242_880 // 5MB
}

fn default_key_prefix() -> String {
    "script-cache:".into()
}

fn default_expire_seconds() -> i64 {
    7 * 24 * 60 * 60
}

fn default_chunk_size() -> usize {
    100_000
}

fn default_fetch_timeout_ms() -> u64 {
    20_000
}

fn default_request_timeout_ms() -> u64 {
    30_000
}

fn default_max_bytes() -> usize {
    5_242_880 // 5MB
}

fn default_user_agent() -> String {
    "script-cache/0.1".into()
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
            quota_bytes: default_quota_bytes(),
            key_prefix: default_key_prefix(),
            expire_seconds: default_expire_seconds(),
            chunk_size: default_chunk_size(),
            fetch_timeout_ms: default_fetch_timeout_ms(),
            request_timeout_ms: default_request_timeout_ms(),
            max_bytes: default_max_bytes(),
            user_agent: default_user_agent(),
            transport: TransportKind::Auto,
        }
    }
}

impl AppConfig {
    /// Fetch timeout as Duration for use with reqwest/tokio.
    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_millis(self.fetch_timeout_ms)
    }

    /// Orchestrator-side wait for a background fetch.
    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.request_timeout_ms)
    }

    /// Load configuration from all sources with layered precedence.
    ///
    /// Priority (highest wins):
    /// 1. Environment variables prefixed with `SCRIPT_CACHE_`
    /// 2. TOML file from `SCRIPT_CACHE_CONFIG_FILE` (if set)
    /// 3. Built-in defaults via `Default::default()`
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` if:
    /// - Configuration file cannot be read
    /// - Environment variables cannot be parsed
    /// - Validation fails after loading
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(Self::default()));

        if let Ok(config_path) = std::env::var("SCRIPT_CACHE_CONFIG_FILE") {
            figment = figment.merge(Toml::file(&config_path));
        }

        figment = figment.merge(
            Env::prefixed("SCRIPT_CACHE_")
                .ignore(&["CONFIG_FILE"])
                .map(|key| key.as_str().to_lowercase().into())
                .split("__"),
        );

        let config: Self = figment.extract().map_err(|e| ConfigError::LoadFailed(e.to_string()))?;

        config.validate()?;

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.db_path, PathBuf::from("./script-cache.sqlite"));
        assert_eq!(config.quota_bytes, 5_242_880);
        assert_eq!(config.key_prefix, "script-cache:");
        assert_eq!(config.expire_seconds, 604_800);
        assert_eq!(config.chunk_size, 100_000);
        assert_eq!(config.user_agent, "script-cache/0.1");
        assert_eq!(config.transport, TransportKind::Auto);
    }

    #[test]
    fn test_timeout_durations() {
        let config = AppConfig::default();
        assert_eq!(config.fetch_timeout(), Duration::from_millis(20_000));
        assert_eq!(config.request_timeout(), Duration::from_millis(30_000));
    }

    #[test]
    fn test_load_from_env() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SCRIPT_CACHE_QUOTA_BYTES", "1048576");
            jail.set_env("SCRIPT_CACHE_TRANSPORT", "legacy");
            jail.set_env("SCRIPT_CACHE_CHUNK_SIZE", "4096");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.quota_bytes, 1_048_576);
            assert_eq!(config.transport, TransportKind::Legacy);
            assert_eq!(config.chunk_size, 4096);
            Ok(())
        });
    }

    #[test]
    fn test_load_from_toml_file() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("cache.toml", "expire_seconds = 60\nkey_prefix = \"t:\"\n")?;
            jail.set_env("SCRIPT_CACHE_CONFIG_FILE", "cache.toml");
            jail.set_env("SCRIPT_CACHE_EXPIRE_SECONDS", "120");

            let config = AppConfig::load().expect("config should load");
            assert_eq!(config.key_prefix, "t:");
            assert_eq!(config.expire_seconds, 120);
            Ok(())
        });
    }

    #[test]
    fn test_load_rejects_invalid() {
        figment::Jail::expect_with(|jail| {
            jail.set_env("SCRIPT_CACHE_CHUNK_SIZE", "0");
            assert!(matches!(AppConfig::load(), Err(ConfigError::Invalid { .. })));
            Ok(())
        });
    }
}
