//! Artifact store with expiry, chunked entries and quota eviction.
//!
//! Keys live under a fixed prefix. A parent record sits at `<prefix><key>`;
//! chunk `i` of a chunked entry sits at `<prefix>chunk:<i>:<key>`. Chunks are
//! never swept or expired on their own, only removed together with their
//! parent.
//!
//! Eviction is reactive: a write that hits the quota evicts the single oldest
//! parent entry (by creation time) and is retried once. If the retry also
//! fails, or nothing can be evicted, the write is abandoned.

use std::sync::Arc;

use bytes::{Bytes, BytesMut};
use tokio::sync::Mutex;

use super::clock::{Clock, SystemClock};
use super::connection::CacheDb;
use super::entry::{CacheEntry, Record};
use crate::Error;

const CHUNK_SEGMENT: &str = "chunk:";

/// Persistent cache store.
///
/// Cloning is cheap; clones share the connection and the write lock.
#[derive(Clone, Debug)]
pub struct CacheStore {
    db: CacheDb,
    prefix: Arc<str>,
    clock: Arc<dyn Clock>,
    /// Held by every write and by `get`, so a read never sees a half-replaced entry.
    write_lock: Arc<Mutex<()>>,
}

impl CacheStore {
    pub fn new(db: CacheDb, prefix: impl Into<String>) -> Self {
        Self::with_clock(db, prefix, Arc::new(SystemClock))
    }

    pub fn with_clock(db: CacheDb, prefix: impl Into<String>, clock: Arc<dyn Clock>) -> Self {
        Self { db, prefix: Arc::from(prefix.into()), clock, write_lock: Arc::new(Mutex::new(())) }
    }

    /// The underlying key/value database.
    pub fn db(&self) -> &CacheDb {
        &self.db
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    fn storage_key(&self, key: &str) -> String {
        format!("{}{key}", self.prefix)
    }

    fn chunk_key(&self, index: usize, key: &str) -> String {
        format!("{}{CHUNK_SEGMENT}{index}:{key}", self.prefix)
    }

    fn chunk_prefix(&self) -> String {
        format!("{}{CHUNK_SEGMENT}", self.prefix)
    }

    fn expiry(&self, now: i64, expire_seconds: i64) -> i64 {
        now.saturating_add(expire_seconds.saturating_mul(1000))
    }

    /// Store `value` inline under `key` for `expire_seconds`.
    ///
    /// Any previous entry under `key` (including its chunks) is replaced. If
    /// the new record cannot be written the previous entry is left intact.
    pub async fn put(&self, key: &str, value: &[u8], expire_seconds: i64) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;

        let now = self.clock.now_ms();
        let record = Record::inline(now, self.expiry(now, expire_seconds), value);

        self.replace_parent(key, record.encode()?).await?;

        tracing::debug!(key, bytes = value.len(), "cached inline entry");
        Ok(())
    }

    /// Store an ordered sequence of chunks under `key` for `expire_seconds`.
    ///
    /// The parent record is written first, then each chunk in index order. If
    /// the parent write fails the previous entry is left intact. A failed
    /// chunk write stops the sequence and returns the error; the parent is
    /// left behind and reads of it report a miss.
    pub async fn put_chunked(&self, key: &str, chunks: &[Bytes], expire_seconds: i64) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;

        let now = self.clock.now_ms();
        let record = Record::chunked(now, self.expiry(now, expire_seconds), chunks.len());

        self.replace_parent(key, record.encode()?).await?;

        for (index, chunk) in chunks.iter().enumerate() {
            if let Err(e) = self.write_evicting(&self.chunk_key(index, key), chunk.to_vec(), key).await {
                tracing::warn!(key, index, total = chunks.len(), error = %e, "chunk write failed, entry left incomplete");
                return Err(e);
            }
        }

        tracing::debug!(key, chunks = chunks.len(), "cached chunked entry");
        Ok(())
    }

    /// Look up `key`.
    ///
    /// Returns None when the entry is absent, expired, undecodable, or
    /// chunked with any chunk missing. Expired entries are left in place.
    pub async fn get(&self, key: &str) -> Result<Option<CacheEntry>, Error> {
        let _guard = self.write_lock.lock().await;

        let Some(raw) = self.db.get_item(&self.storage_key(key)).await? else {
            return Ok(None);
        };
        let record = match Record::decode(&raw) {
            Ok(record) => record,
            Err(e) => {
                let err = Error::CorruptEntry(format!("{key}: {e}"));
                tracing::warn!(key, error = %err, "treating undecodable entry as a miss");
                return Ok(None);
            }
        };

        if record.expire < self.clock.now_ms() {
            tracing::debug!(key, expires_at = record.expire, "cache entry expired");
            return Ok(None);
        }

        let payload = match record.chunk_count() {
            None => match record.inline_payload() {
                Ok(payload) => payload.unwrap_or_default(),
                Err(e) => {
                    let err = Error::CorruptEntry(format!("{key}: {e}"));
                    tracing::warn!(key, error = %err, "treating undecodable entry as a miss");
                    return Ok(None);
                }
            },
            Some(count) => match self.read_chunks(key, count).await? {
                Some(payload) => payload,
                None => return Ok(None),
            },
        };

        Ok(Some(CacheEntry {
            key: key.to_string(),
            created_at: record.date,
            expires_at: record.expire,
            chunks: record.chunk_count(),
            payload,
        }))
    }

    async fn read_chunks(&self, key: &str, count: usize) -> Result<Option<Bytes>, Error> {
        let keys = (0..count).map(|i| self.chunk_key(i, key)).collect();
        let values = self.db.get_items(keys).await?;

        let mut payload = BytesMut::with_capacity(values.iter().flatten().map(Vec::len).sum());
        for (index, value) in values.into_iter().enumerate() {
            match value {
                Some(chunk) => payload.extend_from_slice(&chunk),
                None => {
                    let err = Error::CorruptEntry(format!("{key} is missing chunk {index} of {count}"));
                    tracing::warn!(key, index, count, error = %err, "treating incomplete entry as a miss");
                    return Ok(None);
                }
            }
        }
        Ok(Some(payload.freeze()))
    }

    /// Write a new parent record over `key`, then drop the chunks of the
    /// record it replaced. A failed write leaves the old entry untouched.
    async fn replace_parent(&self, key: &str, encoded: Vec<u8>) -> Result<(), Error> {
        let storage_key = self.storage_key(key);
        let stale = match self.db.get_item(&storage_key).await? {
            Some(raw) => Record::decode(&raw).ok().and_then(|r| r.chunk_count()).unwrap_or(0),
            None => 0,
        };

        self.write_evicting(&storage_key, encoded, key).await?;

        if stale > 0 {
            self.db.remove_items((0..stale).map(|i| self.chunk_key(i, key)).collect()).await?;
        }
        Ok(())
    }

    /// Remove `key` and, if chunked, all of its chunks.
    pub async fn remove(&self, key: &str) -> Result<(), Error> {
        let _guard = self.write_lock.lock().await;
        self.remove_locked(key).await
    }

    async fn remove_locked(&self, key: &str) -> Result<(), Error> {
        let storage_key = self.storage_key(key);
        let Some(raw) = self.db.get_item(&storage_key).await? else {
            return Ok(());
        };

        let mut keys = vec![storage_key];
        match Record::decode(&raw) {
            Ok(record) => {
                if let Some(count) = record.chunk_count() {
                    keys.extend((0..count).map(|i| self.chunk_key(i, key)));
                }
            }
            Err(e) => tracing::warn!(key, error = %e, "removing undecodable cache record"),
        }

        self.db.remove_items(keys).await?;
        Ok(())
    }

    /// Sweep parent entries.
    ///
    /// With `only_expired` set, removes entries whose expiry is at or before
    /// now; otherwise removes every entry. Chunks go with their parents.
    /// Returns the number of parent entries removed.
    pub async fn clear_expired(&self, only_expired: bool) -> Result<usize, Error> {
        let _guard = self.write_lock.lock().await;

        let now = self.clock.now_ms();
        let mut removed = 0;
        for (key, record) in self.parents().await? {
            let expired = record.as_ref().map(|r| r.expire <= now).unwrap_or(true);
            if !only_expired || expired {
                self.remove_locked(&key).await?;
                removed += 1;
            }
        }

        tracing::debug!(removed, only_expired, "swept cache entries");
        Ok(removed)
    }

    /// All parent entries as `(key, record)`; records that fail to decode are None.
    async fn parents(&self) -> Result<Vec<(String, Option<Record>)>, Error> {
        let items = self.db.scan(&self.prefix, Some(&self.chunk_prefix())).await?;
        Ok(items
            .into_iter()
            .map(|(storage_key, raw)| {
                let key = storage_key[self.prefix.len()..].to_string();
                (key, Record::decode(&raw).ok())
            })
            .collect())
    }

    /// Parent entry keys sorted oldest first. This is the eviction order.
    pub async fn eviction_order(&self) -> Result<Vec<String>, Error> {
        let mut parents: Vec<(String, i64)> = self
            .parents()
            .await?
            .into_iter()
            .map(|(key, record)| (key, record.map(|r| r.date).unwrap_or(i64::MIN)))
            .collect();
        parents.sort_by_key(|(_, date)| *date);
        Ok(parents.into_iter().map(|(key, _)| key).collect())
    }

    /// Write one item; on a quota failure evict the oldest entry other than
    /// `owner` and retry exactly once.
    async fn write_evicting(&self, storage_key: &str, value: Vec<u8>, owner: &str) -> Result<(), Error> {
        let err = match self.db.set_item(storage_key, value.clone()).await {
            Ok(()) => return Ok(()),
            Err(e) if e.is_quota() => e,
            Err(e) => return Err(e),
        };

        let victim = self.eviction_order().await?.into_iter().find(|k| k != owner);
        let Some(victim) = victim else {
            tracing::warn!(key = owner, error = %err, "quota exceeded and nothing to evict");
            return Err(Error::QuotaExceeded(format!("{owner}: nothing to evict")));
        };

        tracing::info!(key = owner, evicted = %victim, "quota exceeded, evicting oldest entry");
        self.remove_locked(&victim).await?;

        match self.db.set_item(storage_key, value).await {
            Ok(()) => Ok(()),
            Err(e) if e.is_quota() => {
                tracing::warn!(key = owner, error = %e, "quota still exceeded after eviction, abandoning write");
                Err(Error::QuotaExceeded(format!("{owner}: still over quota after evicting {victim}")))
            }
            Err(e) => Err(e),
        }
    }
}
