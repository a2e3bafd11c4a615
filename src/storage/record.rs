//! Data model for one captured exchange.

use std::borrow::Cow;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

/// Default status of a trace until the response sets one.
pub const DEFAULT_HTTP_STATUS: u16 = 200;

/// Opaque byte blob captured on one side of an exchange.
///
/// Persisted as a nested object whose `bytes` field is base64 text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TracePayload {
    #[serde(with = "base64_bytes")]
    pub bytes: Vec<u8>,
}

impl TracePayload {
    pub fn new(bytes: impl Into<Vec<u8>>) -> Self {
        Self { bytes: bytes.into() }
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Lossy UTF-8 view used by the renderers.
    pub fn as_text(&self) -> Cow<'_, str> {
        String::from_utf8_lossy(&self.bytes)
    }
}

/// One captured request/response exchange.
///
/// Created by [`TraceStore::create_trace`](crate::storage::TraceStore::create_trace)
/// with its ID already assigned, filled in by the request task, then handed to the
/// store exactly once. The persisted copy is never rewritten.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraceRecord {
    /// Sortable identifier; lexicographic order is creation order.
    pub id: String,
    pub start: DateTime<Utc>,
    /// Set once the response is finalized.
    pub end: Option<DateTime<Utc>>,
    pub http_status: u16,
    pub http_method: String,
    pub uri: String,
    /// Total bytes forwarded to the client.
    pub length: u64,
    pub ingress: Option<TracePayload>,
    pub egress: Option<TracePayload>,
}

impl TraceRecord {
    /// Create an empty record started now.
    pub fn new(id: impl Into<String>) -> Self {
        Self::started_at(id, Utc::now())
    }

    pub fn started_at(id: impl Into<String>, start: DateTime<Utc>) -> Self {
        Self {
            id: id.into(),
            start,
            end: None,
            http_status: DEFAULT_HTTP_STATUS,
            http_method: String::new(),
            uri: String::new(),
            length: 0,
            ingress: None,
            egress: None,
        }
    }

    /// Mark the exchange complete. `end` never precedes `start`.
    pub fn finish(&mut self, end: DateTime<Utc>) {
        self.end = Some(end.max(self.start));
    }

    /// Elapsed time between start and end, if finished.
    pub fn duration(&self) -> Option<Duration> {
        self.end.map(|end| end - self.start)
    }
}

mod base64_bytes {
    use base64::{engine::general_purpose::STANDARD, Engine as _};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&STANDARD.encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let encoded = String::deserialize(deserializer)?;
        STANDARD
            .decode(encoded.as_bytes())
            .map_err(serde::de::Error::custom)
    }
}
