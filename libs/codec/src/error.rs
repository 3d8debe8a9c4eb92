//! Protocol-level errors for frame and registry processing
//!
//! Each variant carries enough context to tell a corrupted frame from a
//! deliberately corrupted one, or a truncated read from a bad length field.

use thiserror::Error;

use crate::checksum::{corrupt, Digest};

/// Frame, fragment and registry errors with diagnostic context
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ProtocolError {
    /// Buffer is too small to contain the expected structure
    #[error("Message too small: need {need} bytes, got {got} (context: {context})")]
    MessageTooSmall {
        need: usize,
        got: usize,
        context: String,
    },

    /// Frame declares more bytes than the buffer holds
    #[error("Truncated frame: declared {declared} bytes, buffer has {available} (action: {suggested_action})")]
    TruncatedFrame {
        declared: usize,
        available: usize,
        suggested_action: String,
    },

    /// MD5 digest does not match the payload - the message must be dropped
    #[error("Checksum mismatch: expected {expected}, calculated {calculated} (payload: {payload_size} bytes, cause: {likely_cause})")]
    ChecksumMismatch {
        expected: String,
        calculated: String,
        payload_size: usize,
        likely_cause: String,
    },

    /// Declared frame length exceeds the configured limit
    #[error("Frame too large: {size} bytes exceeds maximum {max}")]
    FrameTooLarge { size: usize, max: usize },

    /// No codec is registered for this type id
    #[error("Unknown type id {type_id}: no codec registered")]
    UnknownTypeId { type_id: u16 },

    /// A second codec tried to claim an existing type id
    #[error("Duplicate type id {type_id}: '{attempted}' conflicts with registered '{existing}'")]
    DuplicateTypeId {
        type_id: u16,
        existing: String,
        attempted: String,
    },

    /// A port is bound to two different channels
    #[error("Port {port} already bound to '{existing}', cannot bind '{attempted}'")]
    PortConflict {
        port: u16,
        existing: String,
        attempted: String,
    },

    /// UDP datagram expected to carry a fragment count did not
    #[error("Invalid fragment count datagram: {reason} ({size} bytes)")]
    InvalidFragmentCount { size: usize, reason: String },

    /// Message body rejected by its codec
    #[error("Codec '{codec}' failed: {message}")]
    Codec { codec: String, message: String },
}

impl ProtocolError {
    pub fn message_too_small(need: usize, got: usize, context: impl Into<String>) -> Self {
        Self::MessageTooSmall {
            need,
            got,
            context: context.into(),
        }
    }

    pub fn truncated_frame(declared: usize, available: usize) -> Self {
        let suggested_action = if available == 0 {
            "check message framing and socket reads"
        } else if declared > available.saturating_mul(2) {
            "likely corrupted length field"
        } else {
            "incomplete transmission - wait for the rest of the frame"
        };

        Self::TruncatedFrame {
            declared,
            available,
            suggested_action: suggested_action.to_string(),
        }
    }

    /// Create a ChecksumMismatch error, diagnosing the likely cause
    pub fn checksum_mismatch(expected: &Digest, calculated: &Digest, payload_size: usize) -> Self {
        let likely_cause = if *expected == corrupt(calculated) {
            "sender deliberately corrupted the checksum"
        } else if expected.iter().all(|b| *b == 0) {
            "message created without checksum calculation"
        } else {
            "data corruption during transmission"
        };

        Self::ChecksumMismatch {
            expected: hex::encode(expected),
            calculated: hex::encode(calculated),
            payload_size,
            likely_cause: likely_cause.to_string(),
        }
    }

    pub fn invalid_fragment_count(size: usize, reason: impl Into<String>) -> Self {
        Self::InvalidFragmentCount {
            size,
            reason: reason.into(),
        }
    }

    pub fn codec(codec: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Codec {
            codec: codec.into(),
            message: message.into(),
        }
    }

    /// Integrity failures mean the bytes arrived but cannot be trusted
    pub fn is_integrity(&self) -> bool {
        matches!(
            self,
            ProtocolError::ChecksumMismatch { .. }
                | ProtocolError::TruncatedFrame { .. }
                | ProtocolError::MessageTooSmall { .. }
        )
    }

    pub fn category(&self) -> &'static str {
        match self {
            ProtocolError::MessageTooSmall { .. }
            | ProtocolError::TruncatedFrame { .. }
            | ProtocolError::ChecksumMismatch { .. } => "integrity",
            ProtocolError::FrameTooLarge { .. }
            | ProtocolError::UnknownTypeId { .. }
            | ProtocolError::InvalidFragmentCount { .. } => "protocol",
            ProtocolError::DuplicateTypeId { .. } | ProtocolError::PortConflict { .. } => {
                "registry"
            }
            ProtocolError::Codec { .. } => "codec",
        }
    }
}

/// Result type for protocol operations
pub type ProtocolResult<T> = std::result::Result<T, ProtocolError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checksum::digest;

    #[test]
    fn test_checksum_mismatch_diagnosis() {
        let real = digest(b"payload");

        let err = ProtocolError::checksum_mismatch(&corrupt(&real), &real, 7);
        match &err {
            ProtocolError::ChecksumMismatch { likely_cause, .. } => {
                assert!(likely_cause.contains("deliberately"));
            }
            other => panic!("unexpected {other:?}"),
        }
        assert!(err.is_integrity());
        assert_eq!(err.category(), "integrity");

        let err = ProtocolError::checksum_mismatch(&[0u8; 16], &real, 7);
        assert!(err.to_string().contains("without checksum"));
    }

    #[test]
    fn test_categories() {
        assert_eq!(
            ProtocolError::UnknownTypeId { type_id: 9 }.category(),
            "protocol"
        );
        assert_eq!(ProtocolError::codec("pose", "bad").category(), "codec");
        assert!(!ProtocolError::UnknownTypeId { type_id: 9 }.is_integrity());
    }
}
