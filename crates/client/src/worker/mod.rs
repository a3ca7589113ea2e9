//! Background fetch worker and the channel that drives it.
//!
//! The worker ([`runtime`]) is an isolated execution context with its own
//! event loop; the channel manager ([`channel`]) lives with the orchestrator.
//! They share no memory and talk only through the messages in [`protocol`].

pub mod channel;
pub mod protocol;
pub mod runtime;

pub use channel::{ChannelState, WorkerChannel};
pub use protocol::{ErrorInfo, KIND_DATA, KIND_ERROR, LoadRequest, Outbound, Payload};

use crate::fetch::FetchConfig;
use script_cache_core::AppConfig;

/// Configuration handed to each worker instance.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    pub fetch: FetchConfig,
    /// Bodies larger than this are sent back as ordered chunks of this size.
    pub chunk_size: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self { fetch: FetchConfig::default(), chunk_size: 100_000 }
    }
}

impl From<&AppConfig> for WorkerConfig {
    fn from(config: &AppConfig) -> Self {
        Self { fetch: FetchConfig::from(config), chunk_size: config.chunk_size }
    }
}
