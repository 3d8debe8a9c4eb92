//! TCP frame encoding and decoding
//!
//! A *sealed* blob is `payload + md5(payload)`. A *frame* is a sealed blob
//! behind a big-endian `u32` length prefix. UDP carries sealed blobs without
//! the prefix, so both paths share [`seal`] and [`open_sealed`].

use bytes::{BufMut, Bytes, BytesMut};
use types::WireMessage;

use crate::checksum::{digest, digest_for, ChecksumMode, Digest};
use crate::constants::{CHECKSUM_SIZE, LENGTH_PREFIX_SIZE, MIN_SEALED_SIZE, TYPE_ID_SIZE};
use crate::error::{ProtocolError, ProtocolResult};

/// `payload + digest` with no length prefix
pub fn seal(payload: &[u8], mode: ChecksumMode) -> Bytes {
    let mut buf = BytesMut::with_capacity(payload.len() + CHECKSUM_SIZE);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&digest_for(payload, mode));
    buf.freeze()
}

/// Full TCP frame for an already packed payload (`type_id + body`)
pub fn encode_payload(payload: &[u8], mode: ChecksumMode) -> Bytes {
    let sealed_len = payload.len() + CHECKSUM_SIZE;
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + sealed_len);
    buf.put_u32(sealed_len as u32);
    buf.extend_from_slice(payload);
    buf.extend_from_slice(&digest_for(payload, mode));
    buf.freeze()
}

/// Full TCP frame for a type id and body
pub fn encode_frame(type_id: u16, body: &[u8]) -> Bytes {
    let payload_len = TYPE_ID_SIZE + body.len();
    let mut buf = BytesMut::with_capacity(LENGTH_PREFIX_SIZE + payload_len + CHECKSUM_SIZE);
    buf.put_u32((payload_len + CHECKSUM_SIZE) as u32);
    buf.put_u16(type_id);
    buf.extend_from_slice(body);
    let d = digest(&buf[LENGTH_PREFIX_SIZE..]);
    buf.extend_from_slice(&d);
    buf.freeze()
}

pub fn encode_message(message: &WireMessage) -> Bytes {
    encode_frame(message.type_id(), message.body())
}

/// Decode the declared length from a 4-byte prefix
pub fn frame_length(prefix: [u8; LENGTH_PREFIX_SIZE]) -> usize {
    u32::from_be_bytes(prefix) as usize
}

/// Verify a sealed blob and return the payload it protects.
pub fn open_sealed(sealed: &[u8]) -> ProtocolResult<&[u8]> {
    if sealed.len() < CHECKSUM_SIZE {
        return Err(ProtocolError::message_too_small(
            CHECKSUM_SIZE,
            sealed.len(),
            "sealed blob shorter than checksum",
        ));
    }
    let (payload, trailer) = sealed.split_at(sealed.len() - CHECKSUM_SIZE);
    let calculated = digest(payload);
    if calculated[..] != *trailer {
        let mut expected: Digest = [0u8; CHECKSUM_SIZE];
        expected.copy_from_slice(trailer);
        return Err(ProtocolError::checksum_mismatch(
            &expected,
            &calculated,
            payload.len(),
        ));
    }
    Ok(payload)
}

/// Decode the first frame in `frame` into a [`WireMessage`].
///
/// Bytes after the declared frame are ignored.
pub fn decode_frame(frame: &[u8]) -> ProtocolResult<WireMessage> {
    if frame.len() < LENGTH_PREFIX_SIZE {
        return Err(ProtocolError::message_too_small(
            LENGTH_PREFIX_SIZE,
            frame.len(),
            "length prefix",
        ));
    }
    let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
    prefix.copy_from_slice(&frame[..LENGTH_PREFIX_SIZE]);
    let declared = frame_length(prefix);
    let available = frame.len() - LENGTH_PREFIX_SIZE;
    if available < declared {
        return Err(ProtocolError::truncated_frame(declared, available));
    }
    let sealed = &frame[LENGTH_PREFIX_SIZE..LENGTH_PREFIX_SIZE + declared];
    let payload = open_sealed(sealed)?;
    if sealed.len() < MIN_SEALED_SIZE {
        return Err(ProtocolError::message_too_small(
            MIN_SEALED_SIZE,
            sealed.len(),
            "payload has no type id",
        ));
    }

    WireMessage::from_payload(payload).ok_or_else(|| {
        ProtocolError::message_too_small(TYPE_ID_SIZE, payload.len(), "type id")
    })
}
