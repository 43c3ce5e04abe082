//! Wire records and the opaque payload envelope.
//!
//! Log payloads traverse the fabric as opaque bytes: the aggregator decodes
//! a [`LogRecord`] only to learn the routing app id, then forwards the raw
//! datagram unchanged. The record encoding is also used for the in-band
//! error frames the edge sends to a viewer before closing its stream.

use bytes::Bytes;
use prost::Message as _;

/// Source name stamped on frames the fabric itself generates.
pub const FABRIC_SOURCE_NAME: &str = "LGR";

/// An immutable log payload plus its length, captured at construction.
///
/// Cloning is cheap; the payload is shared, not copied.
#[derive(Clone, Debug)]
pub struct Envelope {
    raw: Bytes,
    len: usize,
}

impl Envelope {
    pub fn new(raw: Bytes) -> Self {
        let len = raw.len();
        Self { raw, len }
    }

    pub fn payload(&self) -> &Bytes {
        &self.raw
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

impl From<Vec<u8>> for Envelope {
    fn from(raw: Vec<u8>) -> Self {
        Self::new(Bytes::from(raw))
    }
}

/// A structured log message as emitters encode it on the wire.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogRecord {
    /// Human-readable message body.
    #[prost(bytes = "vec", tag = "1")]
    pub message: Vec<u8>,
    #[prost(enumeration = "MessageKind", tag = "2")]
    pub message_type: i32,
    /// Wall-clock nanoseconds.
    #[prost(int64, tag = "3")]
    pub timestamp: i64,
    #[prost(string, tag = "4")]
    pub app_id: String,
    #[prost(string, tag = "5")]
    pub source_name: String,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, prost::Enumeration)]
#[repr(i32)]
pub enum MessageKind {
    Out = 1,
    Err = 2,
}

/// Encode an error frame for in-band delivery on an upgraded stream.
pub fn error_frame(app_id: &str, reason: &str) -> Vec<u8> {
    LogRecord {
        message: reason.as_bytes().to_vec(),
        message_type: MessageKind::Err as i32,
        timestamp: chrono::Utc::now().timestamp_nanos_opt().unwrap_or_default(),
        app_id: app_id.to_owned(),
        source_name: FABRIC_SOURCE_NAME.to_owned(),
    }
    .encode_to_vec()
}
