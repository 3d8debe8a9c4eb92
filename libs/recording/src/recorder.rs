//! Background recorder
//!
//! Socket tasks must never wait on the disk, so [`Recorder::record`] only
//! queues the entry. A dedicated writer thread drains the queue into a
//! buffered file and flushes whenever the queue runs dry.

use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::thread::JoinHandle;

use bytes::Bytes;
use crossbeam_channel::{unbounded, Receiver, Sender};
use tracing::{debug, error, info};
use types::RecordedEntry;

use crate::error::{RecordingError, Result};
use crate::format::{validate_extension, write_entry};

pub struct Recorder {
    path: PathBuf,
    tx: Option<Sender<RecordedEntry>>,
    writer: Option<JoinHandle<Result<u64>>>,
}

impl Recorder {
    /// Open `path` for recording.
    ///
    /// The path must end in `.skaibin`. Missing parent directories are
    /// created. `append` keeps existing records, otherwise the file is
    /// truncated.
    pub fn create(path: impl AsRef<Path>, append: bool) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        validate_extension(&path)?;

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| RecordingError::io(parent, e))?;
        }

        let mut options = OpenOptions::new();
        options.create(true);
        if append {
            options.append(true);
        } else {
            options.write(true).truncate(true);
        }
        let file = options
            .open(&path)
            .map_err(|e| RecordingError::io(&path, e))?;

        let (tx, rx) = unbounded();
        let writer_path = path.clone();
        let writer = std::thread::Builder::new()
            .name("skaibin-writer".to_string())
            .spawn(move || run_writer(BufWriter::new(file), rx, writer_path))
            .map_err(|e| RecordingError::io(&path, e))?;

        info!(path = %path.display(), append, "Recording to skaibin file");

        Ok(Self {
            path,
            tx: Some(tx),
            writer: Some(writer),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Queue an entry for writing; never blocks on I/O
    pub fn record(&self, entry: RecordedEntry) -> Result<()> {
        if u32::try_from(entry.payload.len()).is_err() {
            return Err(RecordingError::PayloadTooLarge {
                size: entry.payload.len(),
            });
        }
        match &self.tx {
            Some(tx) => tx.send(entry).map_err(|_| RecordingError::WriterClosed),
            None => Err(RecordingError::WriterClosed),
        }
    }

    pub fn record_payload(&self, timestamp: f64, port: u16, payload: Bytes) -> Result<()> {
        self.record(RecordedEntry {
            timestamp,
            port,
            payload,
        })
    }

    /// Entries queued but not yet written
    pub fn pending(&self) -> usize {
        self.tx.as_ref().map_or(0, |tx| tx.len())
    }

    /// Drain the queue, flush and stop the writer.
    ///
    /// Returns the number of entries written by this recorder.
    pub fn close(mut self) -> Result<u64> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<u64> {
        // Dropping the sender ends the writer loop once the queue is empty
        self.tx.take();
        match self.writer.take() {
            Some(handle) => handle.join().unwrap_or(Err(RecordingError::WriterClosed)),
            None => Ok(0),
        }
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!(path = %self.path.display(), error = %e, "Recorder did not shut down cleanly");
        }
    }
}

fn run_writer<W: Write>(
    mut out: W,
    rx: Receiver<RecordedEntry>,
    path: PathBuf,
) -> Result<u64> {
    let mut written = 0u64;
    for entry in rx.iter() {
        if let Err(e) = write_entry(&mut out, &entry) {
            error!(path = %path.display(), error = %e, "Failed to write record");
            return Err(RecordingError::io(path, e));
        }
        written += 1;
        if rx.is_empty() {
            out.flush().map_err(|e| RecordingError::io(&path, e))?;
        }
    }
    out.flush().map_err(|e| RecordingError::io(&path, e))?;
    debug!(path = %path.display(), written, "Recorder writer finished");
    Ok(written)
}
