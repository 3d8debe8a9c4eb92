use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RecordingError {
    /// Recording paths must carry the `.skaibin` extension
    #[error("Invalid recording path {path:?}: file name must end in .skaibin")]
    InvalidExtension { path: PathBuf },

    #[error("I/O error on {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The writer thread has exited, usually after a disk error
    #[error("Recorder writer has stopped")]
    WriterClosed,

    #[error("Payload of {size} bytes does not fit the record length field")]
    PayloadTooLarge { size: usize },
}

impl RecordingError {
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type Result<T> = std::result::Result<T, RecordingError>;
