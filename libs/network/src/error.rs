//! Transport Error Types
//!
//! Error handling for listeners, senders and connection management.
//! Integrity failures on inbound frames never surface here: listeners drop
//! the frame and keep going.

use thiserror::Error;

use codec::ProtocolError;
use recording::RecordingError;

/// Main transport error type
#[derive(Error, Debug)]
pub enum TransportError {
    /// Network connectivity errors
    #[error("Network error: {message}")]
    Network {
        message: String,
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Framing and codec errors
    #[error("Protocol error: {message}")]
    Protocol {
        message: String,
        source: Option<ProtocolError>,
    },

    /// Configuration errors, raised before any socket is opened
    #[error("Configuration error: {message}")]
    Configuration {
        message: String,
        field: Option<String>,
    },

    /// Connect attempts used up the retry budget
    #[error("Retries exhausted: {operation} to {destination} failed after {attempts} attempts")]
    RetriesExhausted {
        operation: String,
        destination: String,
        attempts: u32,
    },

    /// Recorder could not be opened or has failed
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    /// Operation attempted after `stop()`
    #[error("Transport stopped")]
    Stopped,

    /// Generic I/O errors
    #[error("I/O error: {message}")]
    Io {
        message: String,
        source: std::io::Error,
    },
}

/// Result type alias for transport operations
pub type Result<T> = std::result::Result<T, TransportError>;

impl TransportError {
    /// Create a network error with source
    pub fn network_with_source(
        message: impl Into<String>,
        source: impl std::error::Error + Send + Sync + 'static,
    ) -> Self {
        Self::Network {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a configuration error
    pub fn configuration(message: impl Into<String>, field: Option<&str>) -> Self {
        Self::Configuration {
            message: message.into(),
            field: field.map(|s| s.to_string()),
        }
    }

    pub fn retries_exhausted(
        operation: impl Into<String>,
        destination: impl Into<String>,
        attempts: u32,
    ) -> Self {
        Self::RetriesExhausted {
            operation: operation.into(),
            destination: destination.into(),
            attempts,
        }
    }

    pub fn io(message: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            message: message.into(),
            source,
        }
    }

    /// Get error category for logs and diagnostics
    pub fn category(&self) -> &'static str {
        match self {
            TransportError::Network { .. } => "network",
            TransportError::Protocol { .. } => "protocol",
            TransportError::Configuration { .. } => "configuration",
            TransportError::RetriesExhausted { .. } => "retries_exhausted",
            TransportError::Recording(_) => "recording",
            TransportError::Stopped => "stopped",
            TransportError::Io { .. } => "io",
        }
    }
}

impl From<std::io::Error> for TransportError {
    fn from(err: std::io::Error) -> Self {
        TransportError::Io {
            message: err.to_string(),
            source: err,
        }
    }
}

impl From<ProtocolError> for TransportError {
    fn from(err: ProtocolError) -> Self {
        TransportError::Protocol {
            message: err.to_string(),
            source: Some(err),
        }
    }
}
