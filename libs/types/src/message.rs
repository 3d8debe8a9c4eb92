//! Typed wire message

use bytes::{BufMut, Bytes, BytesMut};

use crate::TYPE_ID_SIZE;

/// A message as seen by the transport: numeric type id plus an opaque body.
///
/// Only the channel registry interprets `body`. The *payload* form used on the
/// wire and in recordings is the big-endian type id followed by the body.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WireMessage {
    type_id: u16,
    body: Bytes,
}

impl WireMessage {
    pub fn new(type_id: u16, body: impl Into<Bytes>) -> Self {
        Self {
            type_id,
            body: body.into(),
        }
    }

    /// Split a payload into type id and body.
    ///
    /// Returns `None` when the payload is shorter than a type id.
    pub fn from_payload(payload: &[u8]) -> Option<Self> {
        if payload.len() < TYPE_ID_SIZE {
            return None;
        }
        let type_id = u16::from_be_bytes([payload[0], payload[1]]);
        Some(Self {
            type_id,
            body: Bytes::copy_from_slice(&payload[TYPE_ID_SIZE..]),
        })
    }

    pub fn type_id(&self) -> u16 {
        self.type_id
    }

    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Length of the payload form (type id + body)
    pub fn payload_len(&self) -> usize {
        TYPE_ID_SIZE + self.body.len()
    }

    /// Payload form: type id (big-endian) followed by the body
    pub fn to_payload(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.payload_len());
        buf.put_u16(self.type_id);
        buf.extend_from_slice(&self.body);
        buf.freeze()
    }
}

/// Peek the type id of a payload without copying the body
pub fn peek_type_id(payload: &[u8]) -> Option<u16> {
    match payload {
        [hi, lo, ..] => Some(u16::from_be_bytes([*hi, *lo])),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_form() {
        let msg = WireMessage::new(0x0102, &b"body"[..]);
        let payload = msg.to_payload();
        assert_eq!(&payload[..], &[0x01, 0x02, b'b', b'o', b'd', b'y']);
        assert_eq!(msg.payload_len(), payload.len());

        let back = WireMessage::from_payload(&payload).unwrap();
        assert_eq!(back, msg);
    }

    #[test]
    fn test_short_payload() {
        assert!(WireMessage::from_payload(&[7]).is_none());
        assert_eq!(peek_type_id(&[7]), None);
        assert_eq!(peek_type_id(&[0, 5, 9]), Some(5));
    }

    #[test]
    fn test_empty_body() {
        let msg = WireMessage::from_payload(&[0, 3]).unwrap();
        assert_eq!(msg.type_id(), 3);
        assert!(msg.body().is_empty());
    }
}
