use bytes::Bytes;

use crate::message::peek_type_id;

/// One verified inbound payload as stored in a skaibin recording
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedEntry {
    /// Arrival time in seconds since the Unix epoch
    pub timestamp: f64,
    /// Listening port the payload arrived on
    pub port: u16,
    /// Verified `type_id + body`, checksum already stripped
    pub payload: Bytes,
}

impl RecordedEntry {
    pub fn new(timestamp: f64, port: u16, payload: impl Into<Bytes>) -> Self {
        Self {
            timestamp,
            port,
            payload: payload.into(),
        }
    }

    pub fn type_id(&self) -> Option<u16> {
        peek_type_id(&self.payload)
    }
}
