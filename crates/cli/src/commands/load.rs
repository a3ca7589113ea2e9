//! `load` command: run one foreground load through the cache.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::oneshot;

use crate::error::CliError;
use script_cache_client::{CacheLookup, ScriptCache, cache_key};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoadOutput {
    pub url: String,
    /// "cache" or "network".
    pub served_from: String,
    /// Blob handle URL the loader was given, on a hit.
    pub handle: Option<String>,
    /// Whether the entry is cached once the command finishes.
    pub cached: bool,
}

/// Load `url` and wait up to `timeout` for the foreground load and any
/// background population it triggers.
pub async fn load_impl(cache: &ScriptCache, url: &str, timeout: Duration) -> Result<String, CliError> {
    let (tx, rx) = oneshot::channel();
    let lookup = cache
        .load_cached_script(url, move || {
            let _ = tx.send(());
        })
        .await;

    match tokio::time::timeout(timeout, rx).await {
        Ok(Ok(())) => {}
        _ => return Err(CliError::LoadFailed(url.to_string())),
    }

    let (served_from, handle) = match lookup {
        CacheLookup::Cached(handle) => ("cache", Some(handle.url().to_string())),
        CacheLookup::NotCached => {
            await_population(cache, url, timeout).await;
            ("network", None)
        }
    };

    let cached = cache.store().get(&cache_key(url)).await?.is_some();
    let output = LoadOutput { url: url.to_string(), served_from: served_from.into(), handle, cached };
    Ok(serde_json::to_string_pretty(&output)?)
}

/// Population is queued by the load task just after the loaded callback, so
/// it may not be visible yet when this starts.
async fn await_population(cache: &ScriptCache, url: &str, timeout: Duration) {
    let start = tokio::time::Instant::now();
    while !cache.is_populating(url) {
        let landed = matches!(cache.store().get(&cache_key(url)).await, Ok(Some(_)));
        if landed || start.elapsed() >= Duration::from_secs(1) {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    super::settle(cache, &[url.to_string()], timeout).await;
}
