//! Single-GET fetch pipeline used by the background worker.
//!
//! ### Transports
//! - [`StreamingTransport`]: async client, body read incrementally.
//! - [`LegacyTransport`]: blocking client on a request thread, body read in
//!   fixed increments while polling an abort flag.
//!
//! ### Timeout contract
//! Both transports arm one timer when the request starts. If it fires before a
//! terminal response the caller gets `FETCH_TIMEOUT`; whatever the request does
//! afterwards is never observed. The first terminal outcome wins.
//!
//! ### Outcomes
//! - 2xx: body bytes (at most `max_bytes`)
//! - non-2xx: `HTTP_ERROR` with status code and reason phrase
//! - anything else below HTTP: `FETCH_TRANSPORT`

pub mod legacy;
pub mod streaming;
pub mod url;

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use reqwest::StatusCode;

pub use legacy::LegacyTransport;
pub use streaming::StreamingTransport;
pub use url::{UrlError, cache_key, canonicalize};

use script_cache_core::{AppConfig, Error, TransportKind};

/// Configuration for the fetcher.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// User agent string (default: "script-cache/0.1")
    pub user_agent: String,

    /// Maximum response body size in bytes (default: 5MB)
    pub max_bytes: usize,

    /// Request timeout (default: 20s)
    pub timeout: Duration,

    /// Maximum number of redirects to follow (default: 5)
    pub max_redirects: usize,

    /// Transport selection (default: auto)
    pub transport: TransportKind,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self {
            user_agent: "script-cache/0.1".to_string(),
            max_bytes: 5 * 1024 * 1024,
            timeout: Duration::from_millis(20000),
            max_redirects: 5,
            transport: TransportKind::Auto,
        }
    }
}

impl From<&AppConfig> for FetchConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            user_agent: config.user_agent.clone(),
            max_bytes: config.max_bytes,
            timeout: config.fetch_timeout(),
            transport: config.transport,
            ..Default::default()
        }
    }
}

/// A way of performing one HTTP GET under a timeout.
#[async_trait::async_trait]
pub trait Transport: Send + Sync + std::fmt::Debug {
    /// Short name for diagnostics.
    fn name(&self) -> &'static str;

    /// GET `url`, returning the body or the first terminal error.
    async fn get(&self, url: &reqwest::Url, timeout: Duration) -> Result<Bytes, Error>;
}

/// Pick a concrete transport for `kind`.
///
/// `Auto` uses the streaming transport when a tokio runtime handle is
/// reachable from the calling context and the legacy transport otherwise.
/// Only the handle is checked, not which drivers the runtime enabled.
pub fn detect_transport(kind: TransportKind) -> TransportKind {
    match kind {
        TransportKind::Auto => match tokio::runtime::Handle::try_current() {
            Ok(_) => TransportKind::Streaming,
            Err(_) => TransportKind::Legacy,
        },
        other => other,
    }
}

/// Fetcher bound to one transport and one timeout policy.
#[derive(Debug, Clone)]
pub struct Fetcher {
    transport: Arc<dyn Transport>,
    timeout: Duration,
}

impl Fetcher {
    /// Create a fetcher, resolving the transport for the current context.
    pub fn new(config: FetchConfig) -> Result<Self, Error> {
        let transport: Arc<dyn Transport> = match detect_transport(config.transport) {
            TransportKind::Legacy => Arc::new(LegacyTransport::new(&config)),
            _ => Arc::new(StreamingTransport::new(&config)?),
        };
        tracing::debug!(transport = transport.name(), "fetcher ready");
        Ok(Self { transport, timeout: config.timeout })
    }

    /// Create a fetcher over an explicit transport.
    pub fn with_transport(transport: Arc<dyn Transport>, timeout: Duration) -> Self {
        Self { transport, timeout }
    }

    pub fn transport_name(&self) -> &'static str {
        self.transport.name()
    }

    /// Fetch a URL, returning the body bytes.
    pub async fn fetch(&self, url_str: &str) -> Result<Bytes, Error> {
        let url = canonicalize(url_str).map_err(|e| Error::InvalidUrl(e.to_string()))?;
        let result = self.transport.get(&url, self.timeout).await;

        match &result {
            Ok(bytes) => tracing::debug!(%url, bytes = bytes.len(), transport = self.transport.name(), "fetched"),
            Err(e) => tracing::debug!(%url, error = %e, transport = self.transport.name(), "fetch failed"),
        }
        result
    }
}

/// Error for a non-2xx status.
pub(crate) fn http_error(status: StatusCode) -> Error {
    Error::FetchHttp { status: status.as_u16(), status_text: status.canonical_reason().unwrap_or_default().to_string() }
}

pub(crate) fn too_large(len: usize, max: usize) -> Error {
    Error::FetchTooLarge(format!("{len} bytes exceeds {max}"))
}

pub(crate) fn timed_out(url: &reqwest::Url, timeout: Duration) -> Error {
    Error::FetchTimeout(format!("{url} after {}ms", timeout.as_millis()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    #[test]
    fn test_fetch_config_default() {
        let config = FetchConfig::default();
        assert_eq!(config.user_agent, "script-cache/0.1");
        assert_eq!(config.max_bytes, 5 * 1024 * 1024);
        assert_eq!(config.timeout, Duration::from_millis(20000));
        assert_eq!(config.max_redirects, 5);
        assert_eq!(config.transport, TransportKind::Auto);
    }

    #[test]
    fn test_fetch_config_from_app_config() {
        let app = AppConfig { fetch_timeout_ms: 1500, transport: TransportKind::Legacy, ..Default::default() };
        let config = FetchConfig::from(&app);
        assert_eq!(config.timeout, Duration::from_millis(1500));
        assert_eq!(config.transport, TransportKind::Legacy);
    }

    #[test]
    fn test_detect_without_runtime_is_legacy() {
        assert_eq!(detect_transport(TransportKind::Auto), TransportKind::Legacy);
        assert_eq!(detect_transport(TransportKind::Streaming), TransportKind::Streaming);
    }

    #[tokio::test]
    async fn test_detect_inside_runtime_is_streaming() {
        assert_eq!(detect_transport(TransportKind::Auto), TransportKind::Streaming);
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        assert_eq!(fetcher.transport_name(), "streaming");
    }

    #[test]
    fn test_http_error_carries_reason() {
        let err = http_error(StatusCode::SERVICE_UNAVAILABLE);
        assert!(matches!(err, Error::FetchHttp { status: 503, ref status_text } if status_text == "Service Unavailable"));
    }

    #[tokio::test]
    async fn test_fetcher_rejects_bad_url() {
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let err = fetcher.fetch("ftp://example.com/a.js").await.unwrap_err();
        assert!(matches!(err, Error::InvalidUrl(_)));
    }

    #[tokio::test]
    async fn test_fetcher_both_transports_agree() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/lib.js"))
            .respond_with(ResponseTemplate::new(200).set_body_string("var lib = 1;"))
            .mount(&server)
            .await;

        let url = format!("{}/lib.js", server.uri());
        for transport in [TransportKind::Streaming, TransportKind::Legacy] {
            let fetcher = Fetcher::new(FetchConfig { transport, ..Default::default() }).unwrap();
            let body = fetcher.fetch(&url).await.unwrap();
            assert_eq!(body, Bytes::from_static(b"var lib = 1;"), "transport {transport:?}");
        }
    }
}
