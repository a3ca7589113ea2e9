//! Raw key/value operations with a hard storage quota.
//!
//! The quota is checked after the write inside the same transaction, so an
//! over-quota write is rolled back and surfaces as [`Error::QuotaExceeded`]
//! instead of being predicted up front. Usage is measured as the byte length
//! of every key plus every value.

use super::connection::CacheDb;
use crate::Error;
use tokio_rusqlite::params;
use tokio_rusqlite::rusqlite::OptionalExtension;

const USAGE_SQL: &str = "SELECT COALESCE(SUM(length(CAST(key AS BLOB)) + length(value)), 0) FROM entries";

impl CacheDb {
    /// Insert or replace a single item, failing if the store would exceed its quota.
    pub async fn set_item(&self, key: &str, value: Vec<u8>) -> Result<(), Error> {
        let key = key.to_string();
        let quota = self.quota_bytes;
        self.conn
            .call(move |conn| -> Result<(), Error> {
                let tx = conn.transaction()?;
                tx.execute(
                    "INSERT INTO entries (key, value) VALUES (?1, ?2)
                    ON CONFLICT(key) DO UPDATE SET value = excluded.value",
                    params![key, value],
                )?;

                let used: i64 = tx.query_row(USAGE_SQL, [], |row| row.get(0))?;
                if used as u64 > quota {
                    return Err(Error::QuotaExceeded(format!("writing {key} needs {used} bytes, quota is {quota}")));
                }

                tx.commit()?;
                Ok(())
            })
            .await
            .map_err(Error::from)
    }

    /// Get a single item. Returns None if the key doesn't exist.
    pub async fn get_item(&self, key: &str) -> Result<Option<Vec<u8>>, Error> {
        let key = key.to_string();
        self.conn
            .call(move |conn| -> Result<Option<Vec<u8>>, Error> {
                let value = conn
                    .query_row("SELECT value FROM entries WHERE key = ?1", params![key], |row| row.get(0))
                    .optional()?;
                Ok(value)
            })
            .await
            .map_err(Error::from)
    }

    /// Get several items in one round trip, preserving the order of `keys`.
    pub async fn get_items(&self, keys: Vec<String>) -> Result<Vec<Option<Vec<u8>>>, Error> {
        self.conn
            .call(move |conn| -> Result<Vec<Option<Vec<u8>>>, Error> {
                let mut stmt = conn.prepare("SELECT value FROM entries WHERE key = ?1")?;
                let mut values = Vec::with_capacity(keys.len());
                for key in &keys {
                    values.push(stmt.query_row(params![key], |row| row.get(0)).optional()?);
                }
                Ok(values)
            })
            .await
            .map_err(Error::from)
    }

    /// Delete items by key. Keys that don't exist are ignored.
    ///
    /// Returns the number of rows actually deleted.
    pub async fn remove_items(&self, keys: Vec<String>) -> Result<u64, Error> {
        self.conn
            .call(move |conn| -> Result<u64, Error> {
                let tx = conn.transaction()?;
                let mut deleted = 0u64;
                {
                    let mut stmt = tx.prepare("DELETE FROM entries WHERE key = ?1")?;
                    for key in &keys {
                        deleted += stmt.execute(params![key])? as u64;
                    }
                }
                tx.commit()?;
                Ok(deleted)
            })
            .await
            .map_err(Error::from)
    }

    /// List all items whose key starts with `prefix`, skipping keys that start
    /// with `exclude`.
    pub async fn scan(&self, prefix: &str, exclude: Option<&str>) -> Result<Vec<(String, Vec<u8>)>, Error> {
        let prefix = prefix.to_string();
        let exclude = exclude.map(str::to_string);
        self.conn
            .call(move |conn| -> Result<Vec<(String, Vec<u8>)>, Error> {
                let mut stmt =
                    conn.prepare("SELECT key, value FROM entries WHERE substr(key, 1, ?2) = ?1 ORDER BY key")?;
                let rows = stmt.query_map(params![prefix, prefix.chars().count() as i64], |row| {
                    Ok((row.get::<_, String>(0)?, row.get::<_, Vec<u8>>(1)?))
                })?;

                let mut items = Vec::new();
                for row in rows {
                    let (key, value) = row?;
                    if exclude.as_deref().is_some_and(|ex| key.starts_with(ex)) {
                        continue;
                    }
                    items.push((key, value));
                }
                Ok(items)
            })
            .await
            .map_err(Error::from)
    }

    /// Bytes currently counted against the quota.
    pub async fn usage(&self) -> Result<u64, Error> {
        self.conn
            .call(|conn| -> Result<u64, Error> {
                let used: i64 = conn.query_row(USAGE_SQL, [], |row| row.get(0))?;
                Ok(used as u64)
            })
            .await
            .map_err(Error::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_and_get_item() {
        let db = CacheDb::open_in_memory(1024).await.unwrap();
        db.set_item("a", b"hello".to_vec()).await.unwrap();

        assert_eq!(db.get_item("a").await.unwrap(), Some(b"hello".to_vec()));
        assert_eq!(db.get_item("b").await.unwrap(), None);
        assert_eq!(db.usage().await.unwrap(), 6);
    }

    #[tokio::test]
    async fn test_set_item_over_quota_rolls_back() {
        let db = CacheDb::open_in_memory(16).await.unwrap();
        db.set_item("a", vec![1; 8]).await.unwrap();

        let err = db.set_item("b", vec![2; 8]).await.unwrap_err();
        assert!(err.is_quota());
        assert_eq!(db.get_item("b").await.unwrap(), None);
        assert_eq!(db.usage().await.unwrap(), 9);
    }

    #[tokio::test]
    async fn test_replace_counts_new_size_only() {
        let db = CacheDb::open_in_memory(12).await.unwrap();
        db.set_item("a", vec![1; 10]).await.unwrap();
        db.set_item("a", vec![2; 11]).await.unwrap();
        assert_eq!(db.get_item("a").await.unwrap(), Some(vec![2; 11]));
    }

    #[tokio::test]
    async fn test_remove_items_ignores_missing() {
        let db = CacheDb::open_in_memory(1024).await.unwrap();
        db.set_item("a", b"1".to_vec()).await.unwrap();

        let deleted = db.remove_items(vec!["a".into(), "missing".into()]).await.unwrap();
        assert_eq!(deleted, 1);
        assert_eq!(db.get_item("a").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_scan_with_exclude() {
        let db = CacheDb::open_in_memory(1024).await.unwrap();
        db.set_item("p:one", b"1".to_vec()).await.unwrap();
        db.set_item("p:chunk:0:one", b"2".to_vec()).await.unwrap();
        db.set_item("q:two", b"3".to_vec()).await.unwrap();

        let items = db.scan("p:", Some("p:chunk:")).await.unwrap();
        assert_eq!(items, vec![("p:one".to_string(), b"1".to_vec())]);

        let all = db.scan("p:", None).await.unwrap();
        assert_eq!(all.len(), 2);
    }

    #[tokio::test]
    async fn test_get_items_preserves_order() {
        let db = CacheDb::open_in_memory(1024).await.unwrap();
        db.set_item("x", b"X".to_vec()).await.unwrap();
        db.set_item("y", b"Y".to_vec()).await.unwrap();

        let values = db.get_items(vec!["y".into(), "missing".into(), "x".into()]).await.unwrap();
        assert_eq!(values, vec![Some(b"Y".to_vec()), None, Some(b"X".to_vec())]);
    }
}
