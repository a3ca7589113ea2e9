//! Structured errors for the script-cache CLI.

use script_cache_core::Error;

/// Command failures, in the same `CODE: detail` shape as the core errors.
#[derive(Debug, thiserror::Error)]
pub enum CliError {
    /// Nothing usable is cached for the URL.
    #[error("CACHE_MISS: {0}")]
    CacheMiss(String),

    /// The foreground load did not finish in time.
    #[error("LOAD_FAILED: {0}")]
    LoadFailed(String),

    #[error(transparent)]
    Cache(#[from] Error),
}

impl From<serde_json::Error> for CliError {
    fn from(err: serde_json::Error) -> Self {
        CliError::Cache(Error::from(err))
    }
}
