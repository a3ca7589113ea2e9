//! `purge` command: sweep expired entries, or everything.

use serde::{Deserialize, Serialize};

use crate::error::CliError;
use script_cache_core::CacheStore;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CachePurgeOutput {
    /// Number of entries deleted.
    pub deleted: usize,
}

pub async fn purge_impl(store: &CacheStore, all: bool) -> Result<String, CliError> {
    let deleted = store.clear_expired(!all).await?;
    Ok(serde_json::to_string_pretty(&CachePurgeOutput { deleted })?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use script_cache_core::{CacheDb, ManualClock};
    use std::sync::Arc;

    #[tokio::test]
    async fn test_purge_expired_then_all() {
        let clock = Arc::new(ManualClock::new(1_000_000));
        let store = CacheStore::with_clock(CacheDb::open_in_memory(1 << 20).await.unwrap(), "sc:", clock.clone());
        store.put("short", b"a", 10).await.unwrap();
        store.put("long", b"b", 3600).await.unwrap();

        clock.advance(60_000);
        let json = purge_impl(&store, false).await.unwrap();
        assert_eq!(serde_json::from_str::<CachePurgeOutput>(&json).unwrap().deleted, 1);

        let json = purge_impl(&store, true).await.unwrap();
        assert_eq!(serde_json::from_str::<CachePurgeOutput>(&json).unwrap().deleted, 1);
        assert!(store.get("long").await.unwrap().is_none());
    }
}
