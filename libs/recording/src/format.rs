//! skaibin encoding and the tolerant reader

use std::fmt;
use std::io::Write;
use std::path::Path;

use byteorder::{BigEndian, ByteOrder, WriteBytesExt};
use bytes::Bytes;
use codec::ChannelRegistry;
use tracing::warn;
use types::RecordedEntry;

use crate::error::{RecordingError, Result};

pub const FILE_EXTENSION: &str = "skaibin";

/// timestamp (8) + port (2) + length (4)
pub const RECORD_HEADER_SIZE: usize = 14;

/// Reject paths that do not end in `.skaibin`
pub fn validate_extension(path: &Path) -> Result<()> {
    match path.extension().and_then(|e| e.to_str()) {
        Some(FILE_EXTENSION) => Ok(()),
        _ => Err(RecordingError::InvalidExtension {
            path: path.to_path_buf(),
        }),
    }
}

pub fn write_entry<W: Write>(w: &mut W, entry: &RecordedEntry) -> std::io::Result<()> {
    w.write_f64::<BigEndian>(entry.timestamp)?;
    w.write_u16::<BigEndian>(entry.port)?;
    w.write_u32::<BigEndian>(entry.payload.len() as u32)?;
    w.write_all(&entry.payload)
}

pub fn encode_entry(entry: &RecordedEntry) -> Vec<u8> {
    let mut out = Vec::with_capacity(RECORD_HEADER_SIZE + entry.payload.len());
    write_entry(&mut out, entry).expect("Vec write is infallible");
    out
}

/// Bytes left over after the last complete record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TruncatedTail {
    pub offset: usize,
    pub bytes: usize,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct ParsedRecording {
    pub entries: Vec<RecordedEntry>,
    pub truncated: Option<TruncatedTail>,
}

/// Parse every complete record in `data`.
///
/// A partial trailing record is reported in `truncated`, never as an error.
pub fn parse_recording(data: &[u8]) -> ParsedRecording {
    let mut entries = Vec::new();
    let mut offset = 0;

    while offset < data.len() {
        let rest = &data[offset..];
        if rest.len() < RECORD_HEADER_SIZE {
            break;
        }
        let timestamp = BigEndian::read_f64(&rest[0..8]);
        let port = BigEndian::read_u16(&rest[8..10]);
        let length = BigEndian::read_u32(&rest[10..14]) as usize;
        let end = RECORD_HEADER_SIZE + length;
        if rest.len() < end {
            break;
        }
        entries.push(RecordedEntry {
            timestamp,
            port,
            payload: Bytes::copy_from_slice(&rest[RECORD_HEADER_SIZE..end]),
        });
        offset += end;
    }

    let truncated = (offset < data.len()).then(|| TruncatedTail {
        offset,
        bytes: data.len() - offset,
    });
    if let Some(tail) = &truncated {
        warn!(
            recovered = entries.len(),
            offset = tail.offset,
            discarded = tail.bytes,
            "Recording ends mid-record"
        );
    }

    ParsedRecording { entries, truncated }
}

/// Read and parse a whole recording file
pub fn read_recording(path: impl AsRef<Path>) -> Result<ParsedRecording> {
    let path = path.as_ref();
    let data = std::fs::read(path).map_err(|e| RecordingError::io(path, e))?;
    Ok(parse_recording(&data))
}

/// Human-readable view of one recorded payload
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedMessage {
    pub timestamp: f64,
    pub port: u16,
    pub type_id: Option<u16>,
    pub type_name: Option<String>,
    pub size: usize,
}

impl fmt::Display for RecordedMessage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = self.type_name.as_deref().unwrap_or("UNKNOWN");
        match self.type_id {
            Some(id) => write!(
                f,
                "{:.6} port={} type={}({}) bytes={}",
                self.timestamp, self.port, name, id, self.size
            ),
            None => write!(
                f,
                "{:.6} port={} type=<none> bytes={}",
                self.timestamp, self.port, self.size
            ),
        }
    }
}

/// Pair each entry with its channel name from `registry`
pub fn describe(entries: &[RecordedEntry], registry: &ChannelRegistry) -> Vec<RecordedMessage> {
    entries
        .iter()
        .map(|e| RecordedMessage {
            timestamp: e.timestamp,
            port: e.port,
            type_id: e.type_id(),
            type_name: registry.name_of_payload(&e.payload).map(str::to_string),
            size: e.payload.len(),
        })
        .collect()
}
