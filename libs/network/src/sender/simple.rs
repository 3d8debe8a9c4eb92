//! Synchronous-style TCP sender
//!
//! `send` returns once the frame is written. A broken connection is rebuilt
//! inline with the reconnect budget and the same frame is written again;
//! running out of retries is returned to the caller.

use async_trait::async_trait;
use bytes::Bytes;
use codec::{encode_payload, ChecksumMode};
use tokio::io::AsyncWriteExt;
use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::state::{SenderConnectionState, StateCell};
use super::{write_frame, FrameSender, SenderConfig};
use crate::connect::{
    connect_with_retry, is_connection_lost, ConnectOutcome, Connector, RetryPolicy, TcpConnector,
};
use crate::diagnostics::DiagnosticEvent;
use crate::stats::TransportStats;
use crate::{Result, TransportError};

pub struct SimpleSender<C: Connector = TcpConnector> {
    connector: C,
    config: SenderConfig,
    stream: Option<C::Stream>,
    state: StateCell,
    stats: TransportStats,
}

impl SimpleSender<TcpConnector> {
    /// Connect to `host:port` over TCP
    pub async fn connect_tcp(
        host: impl Into<String>,
        port: u16,
        ipv6: bool,
        config: SenderConfig,
    ) -> Result<Self> {
        Self::connect(TcpConnector::new(host, port).with_ipv6(ipv6), config).await
    }
}

impl<C: Connector> SimpleSender<C> {
    /// Establish the first connection with the initial retry budget.
    ///
    /// Always waits for the connection; the simple sender has no background
    /// mode.
    pub async fn connect(connector: C, config: SenderConfig) -> Result<Self> {
        let state = StateCell::new(connector.destination());
        let mut sender = Self {
            connector,
            config,
            stream: None,
            state,
            stats: TransportStats::new(),
        };
        let policy = sender.config.initial.clone();
        sender
            .establish(SenderConnectionState::Connecting, &policy, "connect")
            .await?;
        Ok(sender)
    }

    pub fn state(&self) -> SenderConnectionState {
        self.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SenderConnectionState> {
        self.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SenderConnectionState::Connected
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn destination(&self) -> String {
        self.connector.destination()
    }

    /// Frame and write `payload` (`type_id + body`)
    pub async fn send(&mut self, payload: &[u8]) -> Result<()> {
        self.send_with(payload, ChecksumMode::Valid).await
    }

    /// Like [`send`](Self::send) with an explicit checksum mode
    pub async fn send_with(&mut self, payload: &[u8], mode: ChecksumMode) -> Result<()> {
        let frame = encode_payload(payload, mode);

        loop {
            if self.config.stop.is_set() || self.state.get().is_terminal() {
                self.state.set(SenderConnectionState::Stopped);
                return Err(TransportError::Stopped);
            }

            let Some(stream) = self.stream.as_mut() else {
                self.reconnect().await?;
                continue;
            };

            match write_frame(stream, &frame).await {
                Ok(()) => {
                    self.stats.record_message(frame.len());
                    debug!(
                        destination = %self.connector.destination(),
                        bytes = frame.len(),
                        "Sent frame"
                    );
                    return Ok(());
                }
                Err(e) if is_connection_lost(&e) => {
                    warn!(
                        destination = %self.connector.destination(),
                        error = %e,
                        "Connection lost, reconnecting"
                    );
                    self.stream = None;
                    self.reconnect().await?;
                }
                Err(e) => {
                    return Err(TransportError::network_with_source("Failed to write frame", e));
                }
            }
        }
    }

    /// Close the connection; later sends fail with `Stopped`.
    ///
    /// Only this sender stops; a shared stop signal is left untouched.
    pub async fn stop(&mut self) {
        self.state.set(SenderConnectionState::Stopped);
        if let Some(mut stream) = self.stream.take() {
            let _ = stream.shutdown().await;
        }
        info!(destination = %self.connector.destination(), "Sender stopped");
    }

    async fn reconnect(&mut self) -> Result<()> {
        self.stats.record_reconnect();
        self.config.diagnostics.emit(DiagnosticEvent::Reconnecting {
            destination: self.connector.destination(),
        });
        let policy = self.config.reconnect.clone();
        self.establish(SenderConnectionState::Reconnecting, &policy, "reconnect")
            .await
    }

    async fn establish(
        &mut self,
        phase: SenderConnectionState,
        policy: &RetryPolicy,
        operation: &str,
    ) -> Result<()> {
        self.state.set(phase);
        match connect_with_retry(
            &self.connector,
            policy,
            &self.config.stop,
            &self.config.diagnostics,
        )
        .await
        {
            ConnectOutcome::Connected(stream) => {
                self.stream = Some(stream);
                self.stats.record_connection();
                self.state.set(SenderConnectionState::Connected);
                Ok(())
            }
            ConnectOutcome::Exhausted { attempts } => {
                self.state.set(SenderConnectionState::Disconnected);
                self.config.diagnostics.emit(DiagnosticEvent::FailedToConnect {
                    destination: self.connector.destination(),
                    attempts,
                });
                Err(TransportError::retries_exhausted(
                    operation,
                    self.connector.destination(),
                    attempts,
                ))
            }
            ConnectOutcome::Stopped => {
                self.state.set(SenderConnectionState::Stopped);
                Err(TransportError::Stopped)
            }
        }
    }
}

#[async_trait]
impl<C: Connector> FrameSender for SimpleSender<C> {
    async fn send_payload(&mut self, payload: Bytes) -> Result<()> {
        self.send(&payload).await
    }

    fn destination(&self) -> String {
        self.connector.destination()
    }
}
