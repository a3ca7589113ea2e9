//! Cached-script orchestration.
//!
//! Probe the store; on a hit serve a blob handle, on a miss load the original
//! URL now and populate the cache in the background once the foreground load
//! has finished. Background population is best-effort: every failure on that
//! path is logged and dropped, never surfaced to the caller.

use std::collections::HashSet;
use std::sync::{Arc, Mutex};

use script_cache_core::{AppConfig, BlobHandle, CacheDb, CacheEntry, CacheStore, Error, HandleRegistry};

use crate::fetch::{Fetcher, cache_key};
use crate::loader::{FetchLoader, ScriptLoader};
use crate::worker::{Payload, WorkerChannel, WorkerConfig};

/// Result of a cache probe from [`ScriptCache::load_cached_script`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CacheLookup {
    /// Served from cache; the loader was given this handle's URL.
    Cached(BlobHandle),
    /// Not cached; the loader was given the original URL.
    NotCached,
}

struct Inner {
    store: CacheStore,
    workers: WorkerChannel,
    handles: Arc<HandleRegistry>,
    loader: Arc<dyn ScriptLoader>,
    expire_seconds: i64,
    populating: Mutex<HashSet<String>>,
}

/// One cache instance: store, worker, handles and loader together.
///
/// Cloning is cheap and clones share all state.
#[derive(Clone)]
pub struct ScriptCache {
    inner: Arc<Inner>,
}

impl ScriptCache {
    /// Assemble a cache and sweep expired entries.
    pub async fn new(
        store: CacheStore, workers: WorkerChannel, handles: Arc<HandleRegistry>, loader: Arc<dyn ScriptLoader>,
        expire_seconds: i64,
    ) -> Result<Self, Error> {
        let swept = store.clear_expired(true).await?;
        tracing::debug!(swept, "cold start sweep");

        Ok(Self {
            inner: Arc::new(Inner {
                store,
                workers,
                handles,
                loader,
                expire_seconds,
                populating: Mutex::new(HashSet::new()),
            }),
        })
    }

    /// Open the database at `config.db_path` and build a cache with the
    /// reference [`FetchLoader`].
    pub async fn open(config: &AppConfig) -> Result<Self, Error> {
        let db = CacheDb::open(&config.db_path, config.quota_bytes).await?;
        Self::with_db(db, config).await
    }

    /// Build a cache over an already-open database with the reference loader.
    pub async fn with_db(db: CacheDb, config: &AppConfig) -> Result<Self, Error> {
        let worker_config = WorkerConfig::from(config);
        let handles = Arc::new(HandleRegistry::new());
        let loader = FetchLoader::new(Fetcher::new(worker_config.fetch.clone())?, handles.clone());

        Self::new(
            CacheStore::new(db, config.key_prefix.clone()),
            WorkerChannel::new(worker_config, config.request_timeout()),
            handles,
            Arc::new(loader),
            config.expire_seconds,
        )
        .await
    }

    pub fn store(&self) -> &CacheStore {
        &self.inner.store
    }

    pub fn workers(&self) -> &WorkerChannel {
        &self.inner.workers
    }

    pub fn handles(&self) -> &Arc<HandleRegistry> {
        &self.inner.handles
    }

    /// Load `url` through the cache.
    ///
    /// On a hit the loader gets a blob handle and `on_loaded` runs once it
    /// succeeds. On a miss the loader gets `url`; once it succeeds
    /// `on_loaded` runs and a background population of `url` is queued.
    pub async fn load_cached_script<F>(&self, url: &str, on_loaded: F) -> CacheLookup
    where
        F: FnOnce() + Send + 'static,
    {
        let key = cache_key(url);

        if let Some(entry) = self.probe(&key).await {
            let handle = self.inner.handles.create(url, entry.payload);
            tracing::debug!(url, handle = handle.url(), "serving script from cache");
            self.spawn_foreground(handle.url().to_string(), on_loaded, None);
            return CacheLookup::Cached(handle);
        }

        tracing::debug!(url, "script not cached, loading from network");
        self.spawn_foreground(url.to_string(), on_loaded, Some(url.to_string()));
        CacheLookup::NotCached
    }

    /// URL to use for `url`: a blob handle on a hit, `url` itself on a miss.
    ///
    /// Never calls the loader. A miss queues background population.
    pub async fn cached_script_url(&self, url: &str) -> String {
        let key = cache_key(url);

        if let Some(entry) = self.probe(&key).await {
            return self.inner.handles.create(url, entry.payload).url().to_string();
        }

        self.populate(url);
        url.to_string()
    }

    async fn probe(&self, key: &str) -> Option<CacheEntry> {
        match self.inner.store.get(key).await {
            Ok(entry) => entry,
            Err(e) => {
                tracing::warn!(key, error = %e, "cache probe failed, treating as miss");
                None
            }
        }
    }

    fn spawn_foreground<F>(&self, target: String, on_loaded: F, populate: Option<String>)
    where
        F: FnOnce() + Send + 'static,
    {
        let this = self.clone();
        tokio::spawn(async move {
            match this.inner.loader.load_script(&target).await {
                Ok(()) => {
                    on_loaded();
                    if let Some(url) = populate {
                        this.populate(&url);
                    }
                }
                Err(e) => tracing::debug!(url = %target, error = %e, "foreground load failed"),
            }
        });
    }

    /// Queue a background fetch of `url` and persist whatever comes back.
    ///
    /// A URL that is already being populated is not queued again.
    pub fn populate(&self, url: &str) {
        let key = cache_key(url);
        if !self.populating().insert(key.clone()) {
            tracing::debug!(url, "population already in flight");
            return;
        }

        let rx = match self.inner.workers.enqueue(url) {
            Ok(rx) => rx,
            Err(e) => {
                tracing::warn!(url, error = %e, "could not queue background population");
                self.populating().remove(&key);
                return;
            }
        };

        let this = self.clone();
        tokio::spawn(async move {
            match rx.await {
                Ok(payload) => {
                    if let Err(e) = this.persist(&key, payload).await {
                        tracing::warn!(key, error = %e, "failed to cache script");
                    }
                }
                Err(_) => tracing::debug!(key, "background fetch produced no data"),
            }
            this.populating().remove(&key);
        });
    }

    /// Persist a fetched payload, chunked if the worker chunked it.
    pub async fn persist(&self, key: &str, payload: Payload) -> Result<(), Error> {
        let expire = self.inner.expire_seconds;
        match payload {
            Payload::Whole(body) => self.inner.store.put(key, &body, expire).await,
            Payload::Chunked(chunks) => self.inner.store.put_chunked(key, &chunks, expire).await,
        }
    }

    /// Whether a background population for `url` is in flight.
    pub fn is_populating(&self, url: &str) -> bool {
        self.populating().contains(&cache_key(url))
    }

    fn populating(&self) -> std::sync::MutexGuard<'_, HashSet<String>> {
        self.inner.populating.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Session teardown: release every blob handle and stop the worker.
    ///
    /// Returns the number of handles released.
    pub fn shutdown(&self) -> usize {
        let released = self.inner.handles.release_all();
        self.inner.workers.terminate();
        tracing::debug!(released, "script cache shut down");
        released
    }
}
