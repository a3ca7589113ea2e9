//! Cache entry types and the persisted record layout.
//!
//! A parent record serializes to `{date, expire, chunked, chunks}` for a
//! chunked entry or `{date, expire, data}` for an inline one, with `data`
//! base64-encoded. Chunk records are raw bytes and have no envelope.

use base64::{Engine, engine::general_purpose::STANDARD as BASE64};
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use crate::Error;

/// A cached artifact as returned by a cache probe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Cache key, without the store prefix.
    pub key: String,
    /// Creation time, ms since epoch.
    pub created_at: i64,
    /// Expiry time, ms since epoch.
    pub expires_at: i64,
    /// Number of chunks the payload was stored in, or None for inline entries.
    pub chunks: Option<usize>,
    /// The full artifact bytes (reassembled for chunked entries).
    pub payload: Bytes,
}

impl CacheEntry {
    pub fn is_chunked(&self) -> bool {
        self.chunks.is_some()
    }
}

/// What a parent record carries besides its timestamps.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub(crate) enum RecordBody {
    Chunked { chunked: bool, chunks: usize },
    Inline { data: String },
}

/// Parent record as persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub(crate) struct Record {
    pub date: i64,
    pub expire: i64,
    #[serde(flatten)]
    pub body: RecordBody,
}

impl Record {
    pub fn inline(date: i64, expire: i64, payload: &[u8]) -> Self {
        Self { date, expire, body: RecordBody::Inline { data: BASE64.encode(payload) } }
    }

    pub fn chunked(date: i64, expire: i64, chunks: usize) -> Self {
        Self { date, expire, body: RecordBody::Chunked { chunked: true, chunks } }
    }

    pub fn encode(&self) -> Result<Vec<u8>, Error> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn decode(raw: &[u8]) -> Result<Self, Error> {
        Ok(serde_json::from_slice(raw)?)
    }

    /// Chunk count for chunked records, None for inline ones.
    pub fn chunk_count(&self) -> Option<usize> {
        match self.body {
            RecordBody::Chunked { chunked: true, chunks } => Some(chunks),
            _ => None,
        }
    }

    pub fn inline_payload(&self) -> Result<Option<Bytes>, Error> {
        match &self.body {
            RecordBody::Inline { data } => {
                let bytes = BASE64.decode(data).map_err(|e| Error::Serialization(e.to_string()))?;
                Ok(Some(Bytes::from(bytes)))
            }
            RecordBody::Chunked { .. } => Ok(None),
        }
    }
}
