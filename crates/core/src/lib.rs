//! Core types and shared functionality for script-cache.
//!
//! This crate provides:
//! - Persistent cache store with SQLite backend, chunked entries and quota eviction
//! - Blob handle registry for materialized artifacts
//! - Unified error types
//! - Configuration structures

pub mod cache;
pub mod config;
pub mod error;
pub mod handles;

pub use cache::{CacheDb, CacheEntry, CacheStore, Clock, ManualClock, SystemClock};
pub use config::{AppConfig, ConfigError, TransportKind};
pub use error::Error;
pub use handles::{BlobHandle, HandleRegistry};
