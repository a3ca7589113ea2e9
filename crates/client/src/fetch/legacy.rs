//! Blocking transport polled from a dedicated request thread.
//!
//! The request runs on its own OS thread with a blocking client. The body is
//! read in fixed increments and the thread checks an abort flag between reads,
//! which is as close to cancellation as a blocking request gets. The result
//! travels back over a one-shot channel; once the caller has timed out the
//! receiver is gone and the late send is dropped.

use std::io::Read;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::Url;
use tokio::sync::oneshot;

use super::{FetchConfig, Transport, http_error, timed_out, too_large};
use script_cache_core::Error;

const READ_INCREMENT: usize = 16 * 1024;

/// Blocking reqwest client on a per-request thread.
#[derive(Debug, Clone)]
pub struct LegacyTransport {
    user_agent: String,
    max_bytes: usize,
    max_redirects: usize,
}

impl LegacyTransport {
    pub fn new(config: &FetchConfig) -> Self {
        Self { user_agent: config.user_agent.clone(), max_bytes: config.max_bytes, max_redirects: config.max_redirects }
    }
}

/// Everything the request thread needs, moved onto that thread.
struct LegacyRequest {
    url: Url,
    user_agent: String,
    max_bytes: usize,
    max_redirects: usize,
    timeout: Duration,
    aborted: Arc<AtomicBool>,
}

impl LegacyRequest {
    fn run(self) -> Result<Bytes, Error> {
        // blocking clients must be built and dropped off any async runtime
        let http = reqwest::blocking::Client::builder()
            .user_agent(&self.user_agent)
            .timeout(self.timeout)
            .redirect(reqwest::redirect::Policy::limited(self.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::FetchTransport(format!("failed to build HTTP client: {e}")))?;

        let mut response = http
            .get(self.url.as_str())
            .send()
            .map_err(|e| Error::FetchTransport(format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status));
        }

        let mut body = BytesMut::new();
        let mut buf = vec![0u8; READ_INCREMENT];
        loop {
            if self.aborted.load(Ordering::Acquire) {
                return Err(Error::FetchTransport(format!("{} aborted", self.url)));
            }

            let n = response
                .read(&mut buf)
                .map_err(|e| Error::FetchTransport(format!("failed to read response: {e}")))?;
            if n == 0 {
                break;
            }
            if body.len() + n > self.max_bytes {
                return Err(too_large(body.len() + n, self.max_bytes));
            }
            body.extend_from_slice(&buf[..n]);
        }

        Ok(body.freeze())
    }
}

#[async_trait::async_trait]
impl Transport for LegacyTransport {
    fn name(&self) -> &'static str {
        "legacy"
    }

    async fn get(&self, url: &Url, timeout: Duration) -> Result<Bytes, Error> {
        let aborted = Arc::new(AtomicBool::new(false));
        let request = LegacyRequest {
            url: url.clone(),
            user_agent: self.user_agent.clone(),
            max_bytes: self.max_bytes,
            max_redirects: self.max_redirects,
            timeout,
            aborted: aborted.clone(),
        };

        let (tx, rx) = oneshot::channel();
        std::thread::Builder::new()
            .name("script-cache-request".into())
            .spawn(move || {
                let _ = tx.send(request.run());
            })
            .map_err(|e| Error::FetchTransport(format!("failed to start request thread: {e}")))?;

        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(result)) => result,
            Ok(Err(_)) => Err(Error::FetchTransport(format!("{url}: request thread exited without a result"))),
            Err(_) => {
                aborted.store(true, Ordering::Release);
                Err(timed_out(url, timeout))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(max_bytes: usize) -> LegacyTransport {
        LegacyTransport::new(&FetchConfig { max_bytes, ..Default::default() })
    }

    #[tokio::test]
    async fn test_legacy_success() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/app.js"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![b'a'; 50_000]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/app.js", server.uri())).unwrap();
        let bytes = transport(1 << 20).get(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes.len(), 50_000);
    }

    #[tokio::test]
    async fn test_legacy_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/app.js", server.uri())).unwrap();
        let err = transport(1024).get(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::FetchHttp { status: 500, .. }));
    }

    #[tokio::test]
    async fn test_legacy_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 40_000]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/app.js", server.uri())).unwrap();
        let err = transport(20_000).get(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::FetchTooLarge(_)));
    }

    #[tokio::test]
    async fn test_legacy_timeout_wins_over_late_completion() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("late").set_delay(Duration::from_millis(400)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/slow.js", server.uri())).unwrap();
        let err = transport(1024).get(&url, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::FetchTimeout(_)));

        // the request thread finishes after this and its send goes nowhere
        tokio::time::sleep(Duration::from_millis(600)).await;
    }
}
