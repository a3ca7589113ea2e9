//! Client side of script-cache.
//!
//! This crate provides the background fetch pipeline, the isolated worker
//! that runs it, the channel manager that talks to that worker, and the
//! orchestrator that ties the cache store to the foreground loader.

pub mod fetch;
pub mod loader;
pub mod orchestrator;
pub mod worker;

pub use fetch::{FetchConfig, Fetcher, LegacyTransport, StreamingTransport, Transport, cache_key};
pub use loader::{FetchLoader, LoadError, ScriptLoader};
pub use orchestrator::{CacheLookup, ScriptCache};
pub use worker::{ChannelState, Outbound, Payload, WorkerChannel, WorkerConfig};
