//! Foreground loader boundary.
//!
//! The loader is what actually makes a script usable for the host. The cache
//! only ever asks it to load a URL (either the original or a blob handle)
//! and waits for success; what it does on failure is its own business.

use std::sync::Arc;

use bytes::Bytes;
use script_cache_core::{Error, HandleRegistry};

use crate::fetch::Fetcher;

/// Foreground loader errors.
#[derive(Debug, thiserror::Error)]
pub enum LoadError {
    /// A blob handle URL that is not (or no longer) live.
    #[error("unknown blob handle: {0}")]
    UnknownHandle(String),

    /// Network load failed.
    #[error(transparent)]
    Fetch(#[from] Error),
}

/// Loads a script so it is usable by the host.
#[async_trait::async_trait]
pub trait ScriptLoader: Send + Sync {
    /// Load `url`. Returning `Ok` means the script is usable.
    async fn load_script(&self, url: &str) -> Result<(), LoadError>;
}

/// Reference loader: blob handles resolve through the registry, everything
/// else is fetched over the network. Loaded bodies go to `sink`.
pub struct FetchLoader {
    fetcher: Fetcher,
    handles: Arc<HandleRegistry>,
    sink: Box<dyn Fn(&str, &Bytes) + Send + Sync>,
}

impl FetchLoader {
    pub fn new(fetcher: Fetcher, handles: Arc<HandleRegistry>) -> Self {
        Self::with_sink(fetcher, handles, |url, body| {
            tracing::info!(url, bytes = body.len(), "script loaded");
        })
    }

    pub fn with_sink(
        fetcher: Fetcher, handles: Arc<HandleRegistry>, sink: impl Fn(&str, &Bytes) + Send + Sync + 'static,
    ) -> Self {
        Self { fetcher, handles, sink: Box::new(sink) }
    }
}

#[async_trait::async_trait]
impl ScriptLoader for FetchLoader {
    async fn load_script(&self, url: &str) -> Result<(), LoadError> {
        let body = if HandleRegistry::is_handle_url(url) {
            self.handles
                .resolve(url)
                .ok_or_else(|| LoadError::UnknownHandle(url.to_string()))?
        } else {
            self.fetcher.fetch(url).await?
        };

        (self.sink)(url, &body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fetch::FetchConfig;
    use std::sync::Mutex;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn recording_loader(handles: Arc<HandleRegistry>) -> (FetchLoader, Arc<Mutex<Vec<(String, usize)>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let fetcher = Fetcher::new(FetchConfig::default()).unwrap();
        let loader = FetchLoader::with_sink(fetcher, handles, move |url, body| {
            sink.lock().unwrap().push((url.to_string(), body.len()));
        });
        (loader, seen)
    }

    #[tokio::test]
    async fn test_loads_blob_handle_from_registry() {
        let handles = Arc::new(HandleRegistry::new());
        let handle = handles.create("https://cdn.test/a.js", Bytes::from_static(b"var a = 1;"));
        let (loader, seen) = recording_loader(handles);

        loader.load_script(handle.url()).await.unwrap();
        assert_eq!(seen.lock().unwrap().as_slice(), &[(handle.url().to_string(), 10)]);
    }

    #[tokio::test]
    async fn test_released_handle_fails() {
        let handles = Arc::new(HandleRegistry::new());
        let handle = handles.create("https://cdn.test/a.js", Bytes::from_static(b"x"));
        handles.release_all();
        let (loader, _) = recording_loader(handles);

        let err = loader.load_script(handle.url()).await.unwrap_err();
        assert!(matches!(err, LoadError::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn test_loads_network_url() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("net"))
            .mount(&server)
            .await;
        let (loader, seen) = recording_loader(Arc::new(HandleRegistry::new()));

        let url = format!("{}/n.js", server.uri());
        loader.load_script(&url).await.unwrap();
        assert_eq!(seen.lock().unwrap()[0].1, 3);
    }
}
