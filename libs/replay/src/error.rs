//! Replay error types

use network::TransportError;
use recording::RecordingError;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ReplayError {
    /// The recording could not be read
    #[error("Recording error: {0}")]
    Recording(#[from] RecordingError),

    /// The recording holds no complete record
    #[error("Recording contains no messages")]
    EmptyRecording,

    /// Port cannot carry a camera group suffix
    #[error("Invalid port {port}: {reason}")]
    InvalidPort { port: u16, reason: String },

    /// Camera group does not fit the suffix width
    #[error("Camera group {group} does not fit in {suffix_digits} digit(s)")]
    InvalidCameraGroup { group: u16, suffix_digits: u32 },

    /// Two recorded ports would replay to the same destination port
    #[error("Remapping sends ports {first} and {second} to the same port {target}")]
    RemapCollision { target: u16, first: u16, second: u16 },

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),
}

pub type Result<T> = std::result::Result<T, ReplayError>;

impl ReplayError {
    pub fn invalid_port(port: u16, reason: impl Into<String>) -> Self {
        Self::InvalidPort {
            port,
            reason: reason.into(),
        }
    }
}
