//! `get` command: show what is cached for a URL.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CliError;
use script_cache_client::cache_key;
use script_cache_core::CacheStore;

/// Report for a cached entry. The payload itself is not printed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheGetOutput {
    pub key: String,
    pub bytes: usize,
    pub chunks: Option<usize>,
    pub created_at: Option<DateTime<Utc>>,
    pub expires_at: Option<DateTime<Utc>>,
}

/// Look up `url` and describe the entry, failing on a miss.
pub async fn get_impl(store: &CacheStore, url: &str) -> Result<String, CliError> {
    let key = cache_key(url);
    let entry = store.get(&key).await?.ok_or_else(|| CliError::CacheMiss(url.to_string()))?;

    let output = CacheGetOutput {
        key: entry.key,
        bytes: entry.payload.len(),
        chunks: entry.chunks,
        created_at: DateTime::from_timestamp_millis(entry.created_at),
        expires_at: DateTime::from_timestamp_millis(entry.expires_at),
    };
    Ok(serde_json::to_string_pretty(&output)?)
}
