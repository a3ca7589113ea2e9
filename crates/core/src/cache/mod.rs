//! SQLite-backed persistent store for cached script artifacts.
//!
//! This module provides a key/value cache using SQLite with async access via
//! tokio-rusqlite. It supports:
//!
//! - Expiring entries with inline or chunked payloads
//! - A hard storage quota with reactive oldest-first eviction
//! - Automatic schema migrations
//! - WAL mode for concurrent access

pub mod clock;
pub mod connection;
pub mod entry;
pub mod kv;
pub mod migrations;
pub mod store;

pub use crate::Error;

pub use clock::{Clock, ManualClock, SystemClock};
pub use connection::CacheDb;
pub use entry::CacheEntry;
pub use store::CacheStore;
