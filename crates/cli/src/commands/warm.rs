//! `warm` command: populate the cache for a list of URLs.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::CliError;
use script_cache_client::{ScriptCache, cache_key};

/// Outcome for a single URL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmResult {
    pub url: String,
    pub cached: bool,
    pub bytes: Option<usize>,
    pub chunks: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WarmOutput {
    pub results: Vec<WarmResult>,
    pub cached: u32,
    pub failed: u32,
}

/// Queue every URL on the background worker and wait up to `timeout` for
/// the writes to land. Failed fetches are reported, not returned as errors.
pub async fn warm_impl(cache: &ScriptCache, urls: &[String], timeout: Duration) -> Result<String, CliError> {
    for url in urls {
        cache.populate(url);
    }

    if !super::settle(cache, urls, timeout).await {
        tracing::warn!(timeout_ms = timeout.as_millis() as u64, "gave up waiting for background fetches");
    }

    let mut results = Vec::with_capacity(urls.len());
    for url in urls {
        let entry = cache.store().get(&cache_key(url)).await?;
        results.push(WarmResult {
            url: url.clone(),
            cached: entry.is_some(),
            bytes: entry.as_ref().map(|e| e.payload.len()),
            chunks: entry.and_then(|e| e.chunks),
        });
    }

    let cached = results.iter().filter(|r| r.cached).count() as u32;
    let output = WarmOutput { failed: results.len() as u32 - cached, cached, results };
    Ok(serde_json::to_string_pretty(&output)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_cache_core::{AppConfig, CacheDb};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[tokio::test]
    async fn test_warm_reports_each_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/big.js"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'x'; 2_500]))
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/gone.js"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let config = AppConfig { chunk_size: 1_000, ..Default::default() };
        let cache = ScriptCache::with_db(CacheDb::open_in_memory(1 << 20).await.unwrap(), &config).await.unwrap();
        let urls = vec![format!("{}/big.js", server.uri()), format!("{}/gone.js", server.uri())];

        let json = warm_impl(&cache, &urls, Duration::from_secs(10)).await.unwrap();
        let output: WarmOutput = serde_json::from_str(&json).unwrap();
        assert_eq!((output.cached, output.failed), (1, 1));
        assert_eq!(output.results[0].chunks, Some(3));
        assert_eq!(output.results[0].bytes, Some(2_500));
        assert!(!output.results[1].cached);
        cache.shutdown();
    }
}
