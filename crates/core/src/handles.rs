//! Registry of materialized artifact handles.
//!
//! A [`BlobHandle`] stands in for a network URL: the foreground loader is
//! given `blob:script-cache/<id>` and resolves it back to bytes through the
//! registry. Every handle created during a session is released exactly once,
//! in one bulk pass at teardown.

use std::collections::HashMap;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;

/// URL scheme prefix for materialized handles.
pub const HANDLE_SCHEME: &str = "blob:script-cache/";

/// Opaque reference to in-memory artifact bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlobHandle {
    id: u64,
    url: String,
    source: String,
    len: usize,
}

impl BlobHandle {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The URL to hand to the foreground loader in place of `source`.
    pub fn url(&self) -> &str {
        &self.url
    }

    /// The original resource URL this handle materializes.
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

/// Owns every handle created in a session.
#[derive(Debug, Default)]
pub struct HandleRegistry {
    next_id: AtomicU64,
    live: Mutex<HashMap<String, Bytes>>,
}

impl HandleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Materialize `payload` and register the resulting handle.
    pub fn create(&self, source: &str, payload: Bytes) -> BlobHandle {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let url = format!("{HANDLE_SCHEME}{id}");
        let handle = BlobHandle { id, url: url.clone(), source: source.to_string(), len: payload.len() };

        self.lock().insert(url, payload);
        tracing::debug!(source, handle = %handle.url, bytes = handle.len, "materialized blob handle");
        handle
    }

    /// Bytes behind a handle URL, if it is still live.
    pub fn resolve(&self, url: &str) -> Option<Bytes> {
        self.lock().get(url).cloned()
    }

    /// Whether `url` names a handle (live or not) rather than a network resource.
    pub fn is_handle_url(url: &str) -> bool {
        url.starts_with(HANDLE_SCHEME)
    }

    /// Number of live handles.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    /// Release every live handle. Returns how many were released; a second
    /// call releases nothing.
    pub fn release_all(&self) -> usize {
        let released = std::mem::take(&mut *self.lock());
        tracing::debug!(count = released.len(), "released blob handles");
        released.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, Bytes>> {
        // every mutation is a single map call, so a poisoned map is still consistent
        self.live.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
