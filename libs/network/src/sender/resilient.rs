//! Queued TCP sender that survives disconnects
//!
//! `send` frames the payload and enqueues it without waiting. One worker task
//! owns the stream and drains the queue in FIFO order. When a write fails the
//! frame is kept, the connection is rebuilt with the reconnect budget and the
//! same frame is written first. If the budget runs out the sender pauses:
//! nothing is dropped, new sends keep queueing, and [`ResilientSender::resume`]
//! starts another reconnect round.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use codec::{encode_payload, ChecksumMode};
use tokio::sync::{mpsc, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::state::{SenderConnectionState, StateCell};
use super::{write_frame, FrameSender, SenderConfig};
use crate::connect::{connect_with_retry, ConnectOutcome, Connector, RetryPolicy, TcpConnector};
use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::stats::TransportStats;
use crate::stop::StopSignal;
use crate::{Result, TransportError};

struct Shared {
    state: StateCell,
    /// Frames accepted by `send` and not yet written, including one in flight
    queued: AtomicUsize,
    resume: Notify,
    /// Stops this sender only; linked to the configured stop signal
    halt: StopSignal,
    stats: TransportStats,
}

pub struct ResilientSender {
    tx: mpsc::UnboundedSender<Bytes>,
    shared: Arc<Shared>,
    worker: Option<JoinHandle<()>>,
    destination: String,
}

impl ResilientSender {
    /// Start a sender to `host:port` over TCP
    pub async fn start_tcp(
        host: impl Into<String>,
        port: u16,
        ipv6: bool,
        config: SenderConfig,
    ) -> Result<Self> {
        Self::start(TcpConnector::new(host, port).with_ipv6(ipv6), config).await
    }

    /// Spawn the worker and begin connecting.
    ///
    /// With `blocking_connect` this waits for the first connection and fails
    /// with `RetriesExhausted` if the initial budget runs out. Otherwise it
    /// returns at once; an exhausted initial budget then leaves the sender
    /// `Paused`.
    pub async fn start<C: Connector>(connector: C, config: SenderConfig) -> Result<Self> {
        let destination = connector.destination();
        let halt = StopSignal::new();
        link_stop(config.stop.clone(), halt.clone());

        let shared = Arc::new(Shared {
            state: StateCell::new(destination.clone()),
            queued: AtomicUsize::new(0),
            resume: Notify::new(),
            halt,
            stats: TransportStats::new(),
        });

        let (tx, rx) = mpsc::unbounded_channel();
        let worker = tokio::spawn(run_worker(
            connector,
            config.initial.clone(),
            config.reconnect.clone(),
            config.diagnostics.clone(),
            shared.clone(),
            rx,
        ));

        let sender = Self {
            tx,
            shared,
            worker: Some(worker),
            destination,
        };

        if config.blocking_connect {
            let mut states = sender.shared.state.subscribe();
            let settled = states
                .wait_for(|s| s.is_settled())
                .await
                .map(|s| *s)
                .map_err(|_| TransportError::Stopped)?;
            match settled {
                SenderConnectionState::Paused => {
                    return Err(TransportError::retries_exhausted(
                        "connect",
                        sender.destination.clone(),
                        config.initial.max_attempts().unwrap_or(0),
                    ));
                }
                SenderConnectionState::Stopped => return Err(TransportError::Stopped),
                _ => {}
            }
        }

        Ok(sender)
    }

    /// Enqueue `payload` (`type_id + body`); never waits for the network
    pub fn send(&self, payload: &[u8]) -> Result<()> {
        self.send_with(payload, ChecksumMode::Valid)
    }

    pub fn send_with(&self, payload: &[u8], mode: ChecksumMode) -> Result<()> {
        if self.shared.halt.is_set() || self.shared.state.get().is_terminal() {
            return Err(TransportError::Stopped);
        }
        let frame = encode_payload(payload, mode);
        self.shared.queued.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(frame).is_err() {
            self.shared.queued.fetch_sub(1, Ordering::SeqCst);
            return Err(TransportError::Stopped);
        }
        Ok(())
    }

    /// Start a new reconnect round after the sender paused
    pub fn resume(&self) {
        if self.state() == SenderConnectionState::Paused {
            info!(destination = %self.destination, "Resuming sender");
            self.shared.resume.notify_one();
        }
    }

    /// Stop the worker; queued frames are discarded
    pub async fn stop(&mut self) {
        self.shared.halt.trigger();
        self.shared.state.set(SenderConnectionState::Stopped);
        if let Some(worker) = self.worker.take() {
            let _ = worker.await;
        }
        info!(destination = %self.destination, "Sender stopped");
    }

    /// Wait until the sender is connected; fails if it stops first
    pub async fn wait_connected(&self) -> Result<()> {
        let mut states = self.shared.state.subscribe();
        let state = states
            .wait_for(|s| *s == SenderConnectionState::Connected || s.is_terminal())
            .await
            .map(|s| *s)
            .map_err(|_| TransportError::Stopped)?;
        match state {
            SenderConnectionState::Connected => Ok(()),
            _ => Err(TransportError::Stopped),
        }
    }

    pub fn state(&self) -> SenderConnectionState {
        self.shared.state.get()
    }

    pub fn subscribe(&self) -> watch::Receiver<SenderConnectionState> {
        self.shared.state.subscribe()
    }

    pub fn is_connected(&self) -> bool {
        self.state() == SenderConnectionState::Connected
    }

    pub fn is_paused(&self) -> bool {
        self.state() == SenderConnectionState::Paused
    }

    /// Worker task still running
    pub fn is_alive(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    pub fn queued(&self) -> usize {
        self.shared.queued.load(Ordering::SeqCst)
    }

    pub fn stats(&self) -> &TransportStats {
        &self.shared.stats
    }

    pub fn destination(&self) -> &str {
        &self.destination
    }
}

impl Drop for ResilientSender {
    fn drop(&mut self) {
        self.shared.halt.trigger();
    }
}

#[async_trait]
impl FrameSender for ResilientSender {
    async fn send_payload(&mut self, payload: Bytes) -> Result<()> {
        self.send(&payload)
    }

    fn destination(&self) -> String {
        self.destination.clone()
    }
}

/// Propagate a shared stop into this sender's own halt signal
fn link_stop(shared: StopSignal, halt: StopSignal) {
    tokio::spawn(async move {
        tokio::select! {
            _ = shared.wait() => halt.trigger(),
            _ = halt.wait() => {}
        }
    });
}

async fn run_worker<C: Connector>(
    connector: C,
    initial: RetryPolicy,
    reconnect: RetryPolicy,
    diagnostics: Diagnostics,
    shared: Arc<Shared>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
) {
    let destination = connector.destination();
    let ctx = WorkerContext {
        connector: &connector,
        reconnect: &reconnect,
        diagnostics: &diagnostics,
        shared: &shared,
    };

    let Some(mut stream) = ctx.establish(SenderConnectionState::Connecting, &initial).await else {
        shared.state.set(SenderConnectionState::Stopped);
        return;
    };

    let mut pending: Option<Bytes> = None;
    loop {
        let frame = match pending.take() {
            Some(frame) => frame,
            None => tokio::select! {
                biased;
                _ = shared.halt.wait() => break,
                next = rx.recv() => match next {
                    Some(frame) => frame,
                    None => break,
                },
            },
        };

        match write_frame(&mut stream, &frame).await {
            Ok(()) => {
                shared.queued.fetch_sub(1, Ordering::SeqCst);
                shared.stats.record_message(frame.len());
                debug!(%destination, bytes = frame.len(), "Sent frame");
            }
            Err(e) => {
                warn!(%destination, error = %e, "Write failed, reconnecting");
                pending = Some(frame);
                shared.stats.record_reconnect();
                diagnostics.emit(DiagnosticEvent::Reconnecting {
                    destination: destination.clone(),
                });
                match ctx
                    .establish(SenderConnectionState::Reconnecting, &reconnect)
                    .await
                {
                    Some(next) => stream = next,
                    None => break,
                }
            }
        }
    }

    shared.state.set(SenderConnectionState::Stopped);
    debug!(%destination, "Sender worker exited");
}

struct WorkerContext<'a, C: Connector> {
    connector: &'a C,
    reconnect: &'a RetryPolicy,
    diagnostics: &'a Diagnostics,
    shared: &'a Shared,
}

impl<C: Connector> WorkerContext<'_, C> {
    /// Connect, pausing on exhaustion until resumed. `None` means stopped.
    async fn establish(
        &self,
        mut phase: SenderConnectionState,
        first_policy: &RetryPolicy,
    ) -> Option<C::Stream> {
        let destination = self.connector.destination();
        let mut policy = first_policy;

        loop {
            self.shared.state.set(phase);
            match connect_with_retry(self.connector, policy, &self.shared.halt, self.diagnostics)
                .await
            {
                ConnectOutcome::Connected(stream) => {
                    self.shared.stats.record_connection();
                    self.shared.state.set(SenderConnectionState::Connected);
                    return Some(stream);
                }
                ConnectOutcome::Stopped => return None,
                ConnectOutcome::Exhausted { attempts } => {
                    let queued = self.shared.queued.load(Ordering::SeqCst);
                    if phase == SenderConnectionState::Connecting {
                        warn!(%destination, attempts, "Failed to connect, pausing");
                        self.diagnostics.emit(DiagnosticEvent::FailedToConnect {
                            destination: destination.clone(),
                            attempts,
                        });
                    } else {
                        warn!(%destination, attempts, queued, "Reconnect retries exhausted, pausing");
                    }
                    self.diagnostics.emit(DiagnosticEvent::Paused {
                        destination: destination.clone(),
                        queued,
                    });
                    self.shared.state.set(SenderConnectionState::Paused);

                    tokio::select! {
                        _ = self.shared.resume.notified() => {}
                        _ = self.shared.halt.wait() => return None,
                    }
                    phase = SenderConnectionState::Reconnecting;
                    policy = self.reconnect;
                }
            }
        }
    }
}
