//! Unified error types for script-cache.
//!
//! Every failure on the background population path ends up here and is
//! reported to diagnostics only; none of these reach the foreground loader.

use tokio_rusqlite::rusqlite;

/// Unified error types for the script cache.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Store write failed and eviction could not reclaim space.
    #[error("QUOTA_EXCEEDED: {0}")]
    QuotaExceeded(String),

    /// A chunked entry references a chunk that is not in the store.
    #[error("CORRUPT_ENTRY: {0}")]
    CorruptEntry(String),

    /// Database operation failed.
    #[error("CACHE_ERROR: {0}")]
    Database(tokio_rusqlite::Error),

    /// Migration failed to apply.
    #[error("CACHE_ERROR: migration failed: {0}")]
    MigrationFailed(String),

    /// Stored record could not be encoded or decoded.
    #[error("CACHE_ERROR: serialization failed: {0}")]
    Serialization(String),

    /// Invalid URL.
    #[error("INVALID_URL: {0}")]
    InvalidUrl(String),

    /// Fetch timeout.
    #[error("FETCH_TIMEOUT: {0}")]
    FetchTimeout(String),

    /// Fetch response too large.
    #[error("FETCH_TOO_LARGE: {0}")]
    FetchTooLarge(String),

    /// Non-2xx HTTP response.
    #[error("HTTP_ERROR: {status} {status_text}")]
    FetchHttp { status: u16, status_text: String },

    /// Network or protocol failure below HTTP.
    #[error("FETCH_TRANSPORT: {0}")]
    FetchTransport(String),

    /// Malformed message on the worker channel.
    #[error("PROTOCOL_VIOLATION: {0}")]
    ProtocolViolation(String),

    /// Background worker could not be started or has gone away.
    #[error("WORKER_UNAVAILABLE: {0}")]
    WorkerUnavailable(String),
}

impl Error {
    /// Short machine-readable code, the prefix of the display string.
    pub fn code(&self) -> &'static str {
        match self {
            Error::QuotaExceeded(_) => "QUOTA_EXCEEDED",
            Error::CorruptEntry(_) => "CORRUPT_ENTRY",
            Error::Database(_) | Error::MigrationFailed(_) | Error::Serialization(_) => "CACHE_ERROR",
            Error::InvalidUrl(_) => "INVALID_URL",
            Error::FetchTimeout(_) => "FETCH_TIMEOUT",
            Error::FetchTooLarge(_) => "FETCH_TOO_LARGE",
            Error::FetchHttp { .. } => "HTTP_ERROR",
            Error::FetchTransport(_) => "FETCH_TRANSPORT",
            Error::ProtocolViolation(_) => "PROTOCOL_VIOLATION",
            Error::WorkerUnavailable(_) => "WORKER_UNAVAILABLE",
        }
    }

    /// Whether this error came from the storage quota ceiling.
    pub fn is_quota(&self) -> bool {
        matches!(self, Error::QuotaExceeded(_))
    }
}

impl From<tokio_rusqlite::Error<Error>> for Error {
    fn from(err: tokio_rusqlite::Error<Error>) -> Self {
        match err {
            tokio_rusqlite::Error::Error(e) => e,
            tokio_rusqlite::Error::ConnectionClosed => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
            tokio_rusqlite::Error::Close(c) => Error::Database(tokio_rusqlite::Error::Close(c)),
            _ => Error::Database(tokio_rusqlite::Error::ConnectionClosed),
        }
    }
}

impl From<tokio_rusqlite::Error<rusqlite::Error>> for Error {
    fn from(err: tokio_rusqlite::Error<rusqlite::Error>) -> Self {
        Error::Database(err)
    }
}

impl From<rusqlite::Error> for Error {
    fn from(err: rusqlite::Error) -> Self {
        Error::Database(tokio_rusqlite::Error::Error(err))
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}
