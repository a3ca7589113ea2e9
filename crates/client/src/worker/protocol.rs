//! Message contract between the channel manager and the background worker.
//!
//! Inbound: `{"url": "...", "i": 7}` or an array of such objects.
//! Outbound: `[kind, index, payload]` where kind is [`KIND_DATA`] with the
//! (possibly chunked) body, or [`KIND_ERROR`] with an [`ErrorInfo`].

use bytes::{Bytes, BytesMut};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use script_cache_core::Error;

pub const KIND_DATA: u8 = 1;
pub const KIND_ERROR: u8 = 2;

/// One load request as sent to the worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoadRequest {
    pub url: String,
    #[serde(rename = "i")]
    pub index: u64,
}

impl LoadRequest {
    pub fn to_message(&self) -> Value {
        serde_json::json!({ "url": self.url, "i": self.index })
    }
}

/// Parse an inbound message into its requests.
///
/// A malformed message is rejected as a whole with `PROTOCOL_VIOLATION`.
pub fn parse_inbound(message: &Value) -> Result<Vec<LoadRequest>, Error> {
    let parse_one = |value: &Value| {
        LoadRequest::deserialize(value)
            .map_err(|e| Error::ProtocolViolation(format!("invalid load request {value}: {e}")))
    };

    match message {
        Value::Array(items) => items.iter().map(parse_one).collect(),
        other => parse_one(other).map(|request| vec![request]),
    }
}

/// Body of a successful fetch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    Whole(Bytes),
    /// Ordered fixed-size slices; every slice but the last is full size.
    Chunked(Vec<Bytes>),
}

impl Payload {
    /// Split `body` into `chunk_size` slices when it is larger than `chunk_size`.
    pub fn split(body: Bytes, chunk_size: usize) -> Self {
        if chunk_size == 0 || body.len() <= chunk_size {
            return Payload::Whole(body);
        }

        let mut chunks = Vec::with_capacity(body.len().div_ceil(chunk_size));
        let mut offset = 0;
        while offset < body.len() {
            let end = (offset + chunk_size).min(body.len());
            chunks.push(body.slice(offset..end));
            offset = end;
        }
        Payload::Chunked(chunks)
    }

    pub fn len(&self) -> usize {
        match self {
            Payload::Whole(bytes) => bytes.len(),
            Payload::Chunked(chunks) => chunks.iter().map(Bytes::len).sum(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reassemble into one contiguous buffer.
    pub fn into_bytes(self) -> Bytes {
        match self {
            Payload::Whole(bytes) => bytes,
            Payload::Chunked(chunks) => {
                let mut buf = BytesMut::with_capacity(chunks.iter().map(Bytes::len).sum());
                for chunk in chunks {
                    buf.extend_from_slice(&chunk);
                }
                buf.freeze()
            }
        }
    }
}

/// Serializable description of a failed fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorInfo {
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_text: Option<String>,
    pub message: String,
}

impl From<&Error> for ErrorInfo {
    fn from(err: &Error) -> Self {
        let (status, status_text) = match err {
            Error::FetchHttp { status, status_text } => (Some(*status), Some(status_text.clone())),
            _ => (None, None),
        };
        Self { code: err.code().to_string(), status, status_text, message: err.to_string() }
    }
}

/// Worker to manager traffic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// `[KIND_DATA, index, payload]`
    Data { index: u64, payload: Payload },
    /// `[KIND_ERROR, index, error]`
    Error { index: u64, error: ErrorInfo },
    /// Out-of-band fault raised by the worker itself, e.g. a malformed inbound message.
    Fault { error: ErrorInfo },
}

impl Outbound {
    /// Wire kind for request-bound messages; faults have none.
    pub fn kind(&self) -> Option<u8> {
        match self {
            Outbound::Data { .. } => Some(KIND_DATA),
            Outbound::Error { .. } => Some(KIND_ERROR),
            Outbound::Fault { .. } => None,
        }
    }

    pub fn index(&self) -> Option<u64> {
        match self {
            Outbound::Data { index, .. } | Outbound::Error { index, .. } => Some(*index),
            Outbound::Fault { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_single_request() {
        let requests = parse_inbound(&json!({"url": "https://a.test/a.js", "i": 3})).unwrap();
        assert_eq!(requests, vec![LoadRequest { url: "https://a.test/a.js".into(), index: 3 }]);
    }

    #[test]
    fn test_parse_request_sequence() {
        let requests = parse_inbound(&json!([{"url": "a", "i": 1}, {"url": "b", "i": 2}])).unwrap();
        assert_eq!(requests.len(), 2);
        assert_eq!(requests[1].url, "b");
    }

    #[test]
    fn test_parse_rejects_missing_fields() {
        assert!(matches!(parse_inbound(&json!({"url": "a"})), Err(Error::ProtocolViolation(_))));
        assert!(matches!(parse_inbound(&json!({"i": 1})), Err(Error::ProtocolViolation(_))));
        assert!(matches!(parse_inbound(&json!("a.js")), Err(Error::ProtocolViolation(_))));
        assert!(matches!(parse_inbound(&json!([{"url": "a", "i": 1}, {"i": 2}])), Err(Error::ProtocolViolation(_))));
    }

    #[test]
    fn test_to_message_round_trips() {
        let request = LoadRequest { url: "a.js".into(), index: 9 };
        assert_eq!(parse_inbound(&request.to_message()).unwrap(), vec![request]);
    }

    #[test]
    fn test_split_below_threshold_is_whole() {
        let payload = Payload::split(Bytes::from(vec![1u8; 500]), 100_000);
        assert!(matches!(payload, Payload::Whole(ref b) if b.len() == 500));
    }

    #[test]
    fn test_split_800k_into_eight() {
        let body: Vec<u8> = (0..800_000u32).map(|i| (i % 7) as u8).collect();
        let payload = Payload::split(Bytes::from(body.clone()), 100_000);
        match &payload {
            Payload::Chunked(chunks) => {
                assert_eq!(chunks.len(), 8);
                assert!(chunks.iter().all(|c| c.len() == 100_000));
            }
            other => panic!("expected chunks, got {other:?}"),
        }
        assert_eq!(payload.len(), 800_000);
        assert_eq!(&payload.into_bytes()[..], &body[..]);
    }

    #[test]
    fn test_split_uneven_tail() {
        let payload = Payload::split(Bytes::from(vec![0u8; 250]), 100);
        match payload {
            Payload::Chunked(chunks) => {
                assert_eq!(chunks.iter().map(Bytes::len).collect::<Vec<_>>(), vec![100, 100, 50]);
            }
            other => panic!("expected chunks, got {other:?}"),
        }
    }

    #[test]
    fn test_error_info_from_http_error() {
        let info = ErrorInfo::from(&Error::FetchHttp { status: 502, status_text: "Bad Gateway".into() });
        assert_eq!(info.code, "HTTP_ERROR");
        assert_eq!(info.status, Some(502));
        assert_eq!(info.status_text.as_deref(), Some("Bad Gateway"));
    }

    #[test]
    fn test_outbound_kinds() {
        let data = Outbound::Data { index: 1, payload: Payload::Whole(Bytes::new()) };
        let error = Outbound::Error { index: 2, error: ErrorInfo::from(&Error::FetchTimeout("t".into())) };
        assert_eq!(data.kind(), Some(KIND_DATA));
        assert_eq!(error.kind(), Some(KIND_ERROR));
        assert_eq!(error.index(), Some(2));
    }
}
