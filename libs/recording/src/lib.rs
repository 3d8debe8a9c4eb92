//! # skaibin Recordings
//!
//! Every verified inbound payload can be appended to a `.skaibin` file and
//! later replayed with its original timing.
//!
//! ## File Format
//!
//! ```text
//! | timestamp: f64 BE | port: u16 BE | length: u32 BE | payload[length] | ...
//! ```
//!
//! No header, footer, separators or checksums: the payload was already
//! verified on arrival. A file cut short mid-record (crash while recording)
//! still yields every complete record before the cut.
//!
//! ## Components
//! - [`Recorder`]: non-blocking appends through a dedicated writer thread
//! - [`parse_recording`] / [`read_recording`]: tolerant reader

pub mod error;
pub mod format;
pub mod recorder;

pub use error::{RecordingError, Result};
pub use format::{
    describe, encode_entry, parse_recording, read_recording, validate_extension, write_entry,
    ParsedRecording, RecordedMessage, TruncatedTail, FILE_EXTENSION, RECORD_HEADER_SIZE,
};
pub use recorder::Recorder;
pub use types::RecordedEntry;
