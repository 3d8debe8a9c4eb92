//! Verification and delivery shared by both concurrency models

use std::net::SocketAddr;
use std::sync::Arc;

use bytes::Bytes;
use codec::{open_sealed, ChannelRegistry, ProtocolError};
use crossbeam_channel::Sender;
use recording::Recorder;
use tracing::{debug, warn};
use types::{peek_type_id, TYPE_ID_SIZE};

use super::{InboundMessage, MessageHandler};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::stats::TransportStats;
use crate::stop::StopSignal;

/// Bytes as read from the socket, before checksum verification
#[derive(Debug, Clone)]
pub(crate) struct RawFrame {
    /// `payload + digest`
    pub sealed: Bytes,
    pub port: u16,
    pub server_addr: SocketAddr,
    pub peer_addr: Option<SocketAddr>,
    pub arrival: f64,
}

/// Per-port settings handed to each socket task
#[derive(Clone)]
pub(crate) struct PortContext {
    pub port: u16,
    pub server_addr: SocketAddr,
    pub max_frame_size: usize,
    pub stop: StopSignal,
    pub diagnostics: Diagnostics,
    pub stats: TransportStats,
}

/// Where socket tasks hand their frames
#[derive(Clone)]
pub(crate) enum FrameSink {
    Inline(Arc<Pipeline>),
    Queue(Sender<RawFrame>),
}

impl FrameSink {
    pub(crate) fn submit(&self, frame: RawFrame) {
        match self {
            FrameSink::Inline(pipeline) => pipeline.deliver(frame),
            FrameSink::Queue(tx) => {
                let port = frame.port;
                if tx.send(frame).is_err() {
                    warn!(port, "Dispatcher gone, dropping frame");
                }
            }
        }
    }
}

pub(crate) struct Pipeline {
    pub(crate) registry: Option<Arc<ChannelRegistry>>,
    pub(crate) drop_unknown_types: bool,
    pub(crate) recorder: Option<Recorder>,
    pub(crate) handler: Arc<dyn MessageHandler>,
    pub(crate) verbose: bool,
    pub(crate) stats: TransportStats,
    pub(crate) diagnostics: Diagnostics,
}

impl Pipeline {
    /// Verify, filter, record and hand the message to the callback.
    ///
    /// Bad frames are logged and dropped; nothing here fails the listener.
    pub(crate) fn deliver(&self, frame: RawFrame) {
        let RawFrame {
            sealed,
            port,
            server_addr,
            peer_addr,
            arrival,
        } = frame;

        let payload_len = match open_sealed(&sealed) {
            Ok(payload) => payload.len(),
            Err(e) => {
                self.reject(port, peer_addr, sealed.len(), e);
                return;
            }
        };
        let payload = sealed.slice(..payload_len);

        let Some(type_id) = peek_type_id(&payload) else {
            warn!(port, bytes = payload.len(), "Dropping payload without a type id");
            return;
        };

        let name = match &self.registry {
            Some(registry) => match registry.type_name(type_id) {
                Some(name) => Some(name),
                None => {
                    self.stats.record_unknown_type();
                    self.diagnostics
                        .emit(DiagnosticEvent::UnknownType { port, type_id });
                    if self.drop_unknown_types {
                        warn!(port, type_id, "Dropping message with unknown type id");
                        return;
                    }
                    warn!(port, type_id, "Unknown type id");
                    None
                }
            },
            None => None,
        };

        if let Some(recorder) = &self.recorder {
            if let Err(e) = recorder.record_payload(arrival, port, payload.clone()) {
                warn!(port, error = %e, "Failed to record message");
                self.diagnostics.emit(DiagnosticEvent::RecorderError {
                    error: e.to_string(),
                });
            }
        }

        if self.verbose {
            debug!(
                port,
                peer = ?peer_addr,
                type_id,
                name = name.unwrap_or("?"),
                bytes = payload.len() - TYPE_ID_SIZE,
                "Received message"
            );
        }

        self.stats.record_message(payload.len());
        self.handler.on_message(InboundMessage {
            payload,
            port,
            server_addr,
            peer_addr,
            arrival,
        });
    }

    fn reject(&self, port: u16, peer: Option<SocketAddr>, size: usize, error: ProtocolError) {
        if matches!(error, ProtocolError::ChecksumMismatch { .. }) {
            self.stats.record_checksum_failure();
            self.diagnostics
                .emit(DiagnosticEvent::ChecksumFailed { port, peer, size });
        }
        warn!(port, peer = ?peer, bytes = size, error = %error, "Dropping frame");
    }
}
