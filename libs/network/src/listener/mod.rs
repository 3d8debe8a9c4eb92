//! # Multi-port Listener
//!
//! One socket per configured port. Every socket is bound before any task is
//! spawned, so a bad port fails `start` without leaving half a listener
//! running.
//!
//! ## Concurrency Models
//!
//! ```text
//! Inline:     port task ── read ── verify ── record ── callback
//!
//! Decoupled:  port task ── read ──┐
//!             port task ── read ──┼──> RawFrame queue ──> dispatcher thread
//!             port task ── read ──┘                       verify ── record ── callback
//! ```
//!
//! Inline is the lowest latency; decoupled keeps a slow callback or disk from
//! stalling socket reads.

mod decoupled;
mod pipeline;
mod tcp;
mod udp;

use std::collections::HashSet;
use std::fmt;
use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use codec::{ChannelRegistry, DEFAULT_MAX_FRAME_SIZE};
use recording::{validate_extension, Recorder};
use tokio::net::{TcpListener, UdpSocket};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};
use types::{peek_type_id, TransportKind, TYPE_ID_SIZE};

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::stats::{StatsSnapshot, TransportStats};
use crate::stop::StopSignal;
use crate::{Result, TransportError};

use pipeline::{FrameSink, Pipeline, PortContext};

pub use tcp::read_frame;

/// A verified message handed to the user callback
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// `type_id + body`
    pub payload: Bytes,
    /// Configured port the message arrived on
    pub port: u16,
    pub server_addr: SocketAddr,
    /// Sender address; always known for TCP, the count datagram's source for UDP
    pub peer_addr: Option<SocketAddr>,
    /// Epoch seconds when the length prefix (or count datagram) arrived
    pub arrival: f64,
}

impl InboundMessage {
    pub fn type_id(&self) -> Option<u16> {
        peek_type_id(&self.payload)
    }

    pub fn body(&self) -> &[u8] {
        self.payload.get(TYPE_ID_SIZE..).unwrap_or_default()
    }
}

/// Receives every verified message
///
/// Called from a port task (inline) or the dispatcher thread (decoupled), so
/// implementations should return quickly.
pub trait MessageHandler: Send + Sync + 'static {
    fn on_message(&self, message: InboundMessage);
}

impl<F> MessageHandler for F
where
    F: Fn(InboundMessage) + Send + Sync + 'static,
{
    fn on_message(&self, message: InboundMessage) {
        self(message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConcurrencyModel {
    /// Verify and deliver on the socket task
    #[default]
    Inline,
    /// Socket tasks only read; one dispatcher thread verifies and delivers
    Decoupled,
}

#[derive(Clone)]
pub struct ListenerConfig {
    pub ports: Vec<u16>,
    pub transport: TransportKind,
    /// Bind `[::]` instead of `0.0.0.0`
    pub ipv6: bool,
    /// Log every delivered message at debug level
    pub verbose: bool,
    pub model: ConcurrencyModel,
    pub record_path: Option<PathBuf>,
    /// Append to an existing recording instead of truncating it
    pub append: bool,
    /// Largest declared frame length accepted before the connection is closed
    pub max_frame_size: usize,
    /// When set, messages with unregistered type ids are counted and logged
    pub registry: Option<Arc<ChannelRegistry>>,
    /// Drop (rather than only log) messages the registry does not know
    pub drop_unknown_types: bool,
    pub stop: StopSignal,
    pub diagnostics: Diagnostics,
}

impl fmt::Debug for ListenerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerConfig")
            .field("ports", &self.ports)
            .field("transport", &self.transport)
            .field("ipv6", &self.ipv6)
            .field("model", &self.model)
            .field("record_path", &self.record_path)
            .field("max_frame_size", &self.max_frame_size)
            .field("registry", &self.registry.as_ref().map(|r| r.len()))
            .finish()
    }
}

impl ListenerConfig {
    pub fn new(ports: impl IntoIterator<Item = u16>, transport: TransportKind) -> Self {
        Self {
            ports: ports.into_iter().collect(),
            transport,
            ipv6: false,
            verbose: false,
            model: ConcurrencyModel::Inline,
            record_path: None,
            append: false,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            registry: None,
            drop_unknown_types: true,
            stop: StopSignal::new(),
            diagnostics: Diagnostics::disabled(),
        }
    }

    pub fn tcp(ports: impl IntoIterator<Item = u16>) -> Self {
        Self::new(ports, TransportKind::Tcp)
    }

    pub fn udp(ports: impl IntoIterator<Item = u16>) -> Self {
        Self::new(ports, TransportKind::Udp)
    }

    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    pub fn with_verbose(mut self, verbose: bool) -> Self {
        self.verbose = verbose;
        self
    }

    pub fn with_model(mut self, model: ConcurrencyModel) -> Self {
        self.model = model;
        self
    }

    pub fn record_to(mut self, path: impl Into<PathBuf>, append: bool) -> Self {
        self.record_path = Some(path.into());
        self.append = append;
        self
    }

    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    pub fn with_registry(mut self, registry: Arc<ChannelRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn with_drop_unknown_types(mut self, drop: bool) -> Self {
        self.drop_unknown_types = drop;
        self
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    /// Reject configurations that can never work.
    ///
    /// Port 0 asks the OS for an ephemeral port and may be repeated.
    pub fn validate(&self) -> Result<()> {
        if self.ports.is_empty() {
            return Err(TransportError::configuration(
                "At least one port is required",
                Some("ports"),
            ));
        }

        let mut seen = HashSet::new();
        for &port in &self.ports {
            if port != 0 && !seen.insert(port) {
                return Err(TransportError::configuration(
                    format!("Port {port} is listed more than once"),
                    Some("ports"),
                ));
            }
        }

        if self.max_frame_size == 0 {
            return Err(TransportError::configuration(
                "max_frame_size must be positive",
                Some("max_frame_size"),
            ));
        }

        if let Some(path) = &self.record_path {
            validate_extension(path)?;
        }
        Ok(())
    }

    fn bind_addr(&self, port: u16) -> SocketAddr {
        if self.ipv6 {
            (Ipv6Addr::UNSPECIFIED, port).into()
        } else {
            (Ipv4Addr::UNSPECIFIED, port).into()
        }
    }
}

enum BoundSocket {
    Tcp(TcpListener),
    Udp(UdpSocket),
}

/// Entry point shared by both concurrency models
pub struct Listener;

impl Listener {
    /// Bind every port, open the recorder and spawn the port tasks
    pub async fn start<H: MessageHandler>(
        config: ListenerConfig,
        handler: H,
    ) -> Result<ListenerHandle> {
        config.validate()?;

        let mut bound = Vec::with_capacity(config.ports.len());
        for &port in &config.ports {
            let socket = bind(&config, port).await.inspect_err(|e| {
                error!(port, transport = %config.transport, error = %e, "Failed to bind port");
                config.diagnostics.emit(DiagnosticEvent::PortFailed {
                    port,
                    error: e.to_string(),
                });
            })?;
            let local = match &socket {
                BoundSocket::Tcp(l) => l.local_addr(),
                BoundSocket::Udp(s) => s.local_addr(),
            }
            .map_err(|e| TransportError::io(format!("Failed to read local address of port {port}"), e))?;
            bound.push((socket, local));
        }

        let recorder = match &config.record_path {
            Some(path) => {
                let recorder = Recorder::create(path, config.append)?;
                info!(path = %path.display(), append = config.append, "Recording inbound messages");
                Some(recorder)
            }
            None => None,
        };

        let stats = TransportStats::new();
        let pipeline = Arc::new(Pipeline {
            registry: config.registry.clone(),
            drop_unknown_types: config.drop_unknown_types,
            recorder,
            handler: Arc::new(handler),
            verbose: config.verbose,
            stats: stats.clone(),
            diagnostics: config.diagnostics.clone(),
        });

        let (sink, dispatcher) = match config.model {
            ConcurrencyModel::Inline => (FrameSink::Inline(pipeline.clone()), None),
            ConcurrencyModel::Decoupled => {
                let (tx, rx) = crossbeam_channel::unbounded();
                let thread = decoupled::spawn_dispatcher(rx, pipeline.clone(), config.stop.clone())
                    .map_err(|e| TransportError::io("Failed to spawn dispatcher thread", e))?;
                (FrameSink::Queue(tx), Some(thread))
            }
        };

        let mut tasks = Vec::with_capacity(bound.len());
        let mut local_addrs = Vec::with_capacity(bound.len());
        for (socket, local) in bound {
            let ctx = PortContext {
                port: local.port(),
                server_addr: local,
                max_frame_size: config.max_frame_size,
                stop: config.stop.clone(),
                diagnostics: config.diagnostics.clone(),
                stats: stats.clone(),
            };
            let sink = sink.clone();
            let task = match socket {
                BoundSocket::Tcp(listener) => tokio::spawn(tcp::serve(listener, sink, ctx)),
                BoundSocket::Udp(socket) => tokio::spawn(udp::serve(socket, sink, ctx)),
            };
            info!(port = local.port(), transport = %config.transport, model = ?config.model, "Listening");
            config.diagnostics.emit(DiagnosticEvent::Listening {
                port: local.port(),
                transport: config.transport,
            });
            tasks.push(task);
            local_addrs.push(local);
        }

        Ok(ListenerHandle {
            local_addrs,
            tasks,
            dispatcher,
            pipeline: Some(pipeline),
            stop: config.stop,
            stats,
        })
    }
}

/// Inline concurrency: socket tasks deliver directly
pub struct InlineListener;

impl InlineListener {
    pub async fn start<H: MessageHandler>(
        config: ListenerConfig,
        handler: H,
    ) -> Result<ListenerHandle> {
        Listener::start(config.with_model(ConcurrencyModel::Inline), handler).await
    }
}

/// Decoupled concurrency: one dispatcher thread delivers
pub struct DecoupledListener;

impl DecoupledListener {
    pub async fn start<H: MessageHandler>(
        config: ListenerConfig,
        handler: H,
    ) -> Result<ListenerHandle> {
        Listener::start(config.with_model(ConcurrencyModel::Decoupled), handler).await
    }
}

async fn bind(config: &ListenerConfig, port: u16) -> Result<BoundSocket> {
    let addr = config.bind_addr(port);
    let socket = match config.transport {
        TransportKind::Tcp => TcpListener::bind(addr).await.map(BoundSocket::Tcp),
        TransportKind::Udp => UdpSocket::bind(addr).await.map(BoundSocket::Udp),
    };
    socket.map_err(|e| {
        TransportError::network_with_source(format!("Failed to bind {} on {addr}", config.transport), e)
    })
}

/// Running listener
///
/// Dropping the handle stops the port tasks but does not wait for them.
pub struct ListenerHandle {
    local_addrs: Vec<SocketAddr>,
    tasks: Vec<JoinHandle<()>>,
    dispatcher: Option<std::thread::JoinHandle<u64>>,
    pipeline: Option<Arc<Pipeline>>,
    stop: StopSignal,
    stats: TransportStats,
}

impl ListenerHandle {
    /// Bound addresses, in configured port order
    pub fn local_addrs(&self) -> &[SocketAddr] {
        &self.local_addrs
    }

    pub fn ports(&self) -> Vec<u16> {
        self.local_addrs.iter().map(|a| a.port()).collect()
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub fn stop_signal(&self) -> StopSignal {
        self.stop.clone()
    }

    /// Ask every task to finish
    pub fn stop(&self) {
        self.stop.trigger();
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.is_set()
    }

    /// Wait for every port task and the dispatcher, then close the recorder.
    ///
    /// Returns once the stop signal is set (or every port has failed).
    pub async fn join(mut self) -> Result<StatsSnapshot> {
        for task in std::mem::take(&mut self.tasks) {
            if let Err(e) = task.await {
                warn!(error = %e, "Listener task ended abnormally");
            }
        }

        if let Some(dispatcher) = self.dispatcher.take() {
            match tokio::task::spawn_blocking(move || dispatcher.join()).await {
                Ok(Ok(delivered)) => info!(delivered, "Dispatcher finished"),
                _ => warn!("Dispatcher thread panicked"),
            }
        }

        if let Some(pipeline) = self.pipeline.take() {
            match Arc::try_unwrap(pipeline) {
                Ok(pipeline) => {
                    if let Some(recorder) = pipeline.recorder {
                        let written = recorder.close()?;
                        info!(written, "Recording closed");
                    }
                }
                Err(_) => warn!("Listener pipeline still shared; recorder closes on drop"),
            }
        }

        Ok(self.stats.snapshot())
    }

    /// Stop and wait
    pub async fn shutdown(self) -> Result<StatsSnapshot> {
        self.stop();
        self.join().await
    }
}

impl Drop for ListenerHandle {
    fn drop(&mut self) {
        if !self.tasks.is_empty() {
            self.stop.trigger();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_rejects_empty_ports() {
        let err = ListenerConfig::tcp([]).validate().unwrap_err();
        assert!(matches!(err, TransportError::Configuration { .. }));
    }

    #[test]
    fn test_validate_rejects_duplicate_ports() {
        let err = ListenerConfig::udp([6940, 6941, 6940]).validate().unwrap_err();
        assert!(err.to_string().contains("6940"));
    }

    #[test]
    fn test_validate_allows_repeated_ephemeral_ports() {
        ListenerConfig::tcp([0, 0]).validate().unwrap();
    }

    #[test]
    fn test_validate_rejects_bad_record_extension() {
        let err = ListenerConfig::tcp([0])
            .record_to("/tmp/capture.bin", false)
            .validate()
            .unwrap_err();
        assert!(matches!(err, TransportError::Recording(_)));
    }

    #[test]
    fn test_inbound_message_accessors() {
        let message = InboundMessage {
            payload: Bytes::from_static(&[0, 3, 7, 8]),
            port: 6969,
            server_addr: "127.0.0.1:6969".parse().unwrap(),
            peer_addr: None,
            arrival: 1.5,
        };
        assert_eq!(message.type_id(), Some(3));
        assert_eq!(message.body(), &[7, 8]);
    }

    #[tokio::test]
    async fn test_bind_failure_is_returned() {
        let taken = TcpListener::bind("0.0.0.0:0").await.unwrap();
        let port = taken.local_addr().unwrap().port();
        let (diagnostics, events) = Diagnostics::channel();

        let config = ListenerConfig::tcp([port]).with_diagnostics(diagnostics);
        let result = Listener::start(config, |_m: InboundMessage| {}).await;
        assert!(result.is_err());
        assert!(events
            .try_iter()
            .any(|e| matches!(e, DiagnosticEvent::PortFailed { port: p, .. } if p == port)));
    }
}
