//! Out-of-band diagnostics
//!
//! Components emit typed events to an optional queue alongside their
//! `tracing` output, so a supervising process can react to refused
//! connections or checksum failures without scraping logs. Emitting never
//! blocks and is a no-op when no queue is attached.

use std::net::SocketAddr;

use crossbeam_channel::{unbounded, Receiver, Sender};
use types::TransportKind;

#[derive(Debug, Clone, PartialEq)]
pub enum DiagnosticEvent {
    Listening {
        port: u16,
        transport: TransportKind,
    },
    PortFailed {
        port: u16,
        error: String,
    },
    ConnectionAccepted {
        port: u16,
        peer: SocketAddr,
    },
    ConnectionClosed {
        port: u16,
        peer: SocketAddr,
    },
    ChecksumFailed {
        port: u16,
        peer: Option<SocketAddr>,
        size: usize,
    },
    UnknownType {
        port: u16,
        type_id: u16,
    },
    FragmentError {
        port: u16,
        error: String,
    },
    RecorderError {
        error: String,
    },
    ConnectionRefused {
        destination: String,
        attempt: u32,
    },
    Connected {
        destination: String,
    },
    Reconnecting {
        destination: String,
    },
    Paused {
        destination: String,
        queued: usize,
    },
    FailedToConnect {
        destination: String,
        attempts: u32,
    },
}

#[derive(Clone, Debug, Default)]
pub struct Diagnostics {
    tx: Option<Sender<DiagnosticEvent>>,
}

impl Diagnostics {
    pub fn disabled() -> Self {
        Self::default()
    }

    pub fn new(tx: Sender<DiagnosticEvent>) -> Self {
        Self { tx: Some(tx) }
    }

    /// Diagnostics wired to a fresh unbounded queue
    pub fn channel() -> (Self, Receiver<DiagnosticEvent>) {
        let (tx, rx) = unbounded();
        (Self::new(tx), rx)
    }

    pub fn is_enabled(&self) -> bool {
        self.tx.is_some()
    }

    pub fn emit(&self, event: DiagnosticEvent) {
        if let Some(tx) = &self.tx {
            // A dropped receiver just means nobody is listening any more
            let _ = tx.try_send(event);
        }
    }
}
