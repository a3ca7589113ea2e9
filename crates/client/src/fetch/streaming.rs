//! Async transport that reads the response body incrementally.

use std::time::Duration;

use bytes::{Bytes, BytesMut};
use reqwest::{Client, Url};

use super::{FetchConfig, Transport, http_error, timed_out, too_large};
use script_cache_core::Error;

/// Async reqwest client reading the body chunk by chunk.
///
/// On timeout the request future is dropped, so a completion that arrives
/// later is never seen by anyone.
#[derive(Debug, Clone)]
pub struct StreamingTransport {
    http: Client,
    max_bytes: usize,
}

impl StreamingTransport {
    pub fn new(config: &FetchConfig) -> Result<Self, Error> {
        let http = Client::builder()
            .user_agent(&config.user_agent)
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .use_rustls_tls()
            .gzip(true)
            .brotli(true)
            .deflate(true)
            .build()
            .map_err(|e| Error::FetchTransport(format!("failed to build HTTP client: {e}")))?;

        Ok(Self { http, max_bytes: config.max_bytes })
    }

    async fn download(&self, url: &Url) -> Result<Bytes, Error> {
        let mut response = self
            .http
            .get(url.as_str())
            .send()
            .await
            .map_err(|e| Error::FetchTransport(format!("network error: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(http_error(status));
        }

        if let Some(len) = response.content_length()
            && len as usize > self.max_bytes
        {
            return Err(too_large(len as usize, self.max_bytes));
        }

        let mut body = BytesMut::new();
        while let Some(chunk) = response
            .chunk()
            .await
            .map_err(|e| Error::FetchTransport(format!("failed to read response: {e}")))?
        {
            if body.len() + chunk.len() > self.max_bytes {
                return Err(too_large(body.len() + chunk.len(), self.max_bytes));
            }
            body.extend_from_slice(&chunk);
        }

        Ok(body.freeze())
    }
}

#[async_trait::async_trait]
impl Transport for StreamingTransport {
    fn name(&self) -> &'static str {
        "streaming"
    }

    async fn get(&self, url: &Url, timeout: Duration) -> Result<Bytes, Error> {
        match tokio::time::timeout(timeout, self.download(url)).await {
            Ok(result) => result,
            Err(_) => Err(timed_out(url, timeout)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn transport(max_bytes: usize) -> StreamingTransport {
        StreamingTransport::new(&FetchConfig { max_bytes, ..Default::default() }).unwrap()
    }

    #[tokio::test]
    async fn test_streaming_success() {
        let server = MockServer::start().await;
        let body = vec![b'x'; 300_000];
        Mock::given(method("GET"))
            .and(path("/big.js"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(body.clone()))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/big.js", server.uri())).unwrap();
        let bytes = transport(1 << 20).get(&url, Duration::from_secs(5)).await.unwrap();
        assert_eq!(bytes.len(), 300_000);
        assert_eq!(&bytes[..], &body[..]);
    }

    #[tokio::test]
    async fn test_streaming_http_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/missing.js", server.uri())).unwrap();
        let err = transport(1024).get(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::FetchHttp { status: 404, ref status_text } if status_text == "Not Found"));
    }

    #[tokio::test]
    async fn test_streaming_too_large() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(vec![0u8; 2048]))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/a.js", server.uri())).unwrap();
        let err = transport(1024).get(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::FetchTooLarge(_)));
    }

    #[tokio::test]
    async fn test_streaming_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("late").set_delay(Duration::from_millis(500)))
            .mount(&server)
            .await;

        let url = Url::parse(&format!("{}/slow.js", server.uri())).unwrap();
        let err = transport(1024).get(&url, Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, Error::FetchTimeout(_)));
    }

    #[tokio::test]
    async fn test_streaming_connection_refused() {
        // bind then drop to get a port nobody listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let url = Url::parse(&format!("http://{addr}/a.js")).unwrap();
        let err = transport(1024).get(&url, Duration::from_secs(5)).await.unwrap_err();
        assert!(matches!(err, Error::FetchTransport(_)));
    }
}
