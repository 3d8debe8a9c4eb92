//! Test utilities for sender and listener behaviour
//!
//! [`ScriptedConnector`] replays a script of refusals and acceptances and
//! hands each accepted connection's far end to the test, so reconnect paths
//! can be driven deterministically. [`ChannelHandler`] forwards listener
//! deliveries to an async queue.

use std::collections::VecDeque;
use std::io;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::DuplexStream;
use tokio::sync::mpsc;

use crate::connect::Connector;
use crate::listener::{InboundMessage, MessageHandler};

const DUPLEX_CAPACITY: usize = 256 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptStep {
    Refuse,
    Accept,
}

struct ScriptState {
    steps: VecDeque<ScriptStep>,
    /// Used once the script runs out
    fallback: ScriptStep,
    peers: VecDeque<DuplexStream>,
}

/// Connector driven by a fixed script of outcomes
#[derive(Clone)]
pub struct ScriptedConnector {
    state: Arc<Mutex<ScriptState>>,
    attempts: Arc<AtomicU32>,
}

impl ScriptedConnector {
    pub fn new(steps: impl IntoIterator<Item = ScriptStep>, fallback: ScriptStep) -> Self {
        Self {
            state: Arc::new(Mutex::new(ScriptState {
                steps: steps.into_iter().collect(),
                fallback,
                peers: VecDeque::new(),
            })),
            attempts: Arc::new(AtomicU32::new(0)),
        }
    }

    pub fn always_refusing() -> Self {
        Self::new([], ScriptStep::Refuse)
    }

    pub fn always_accepting() -> Self {
        Self::new([], ScriptStep::Accept)
    }

    /// Refuse `refusals` times, then accept every attempt
    pub fn refusing_then_accepting(refusals: usize) -> Self {
        Self::new(
            std::iter::repeat(ScriptStep::Refuse).take(refusals),
            ScriptStep::Accept,
        )
    }

    pub fn set_fallback(&self, fallback: ScriptStep) {
        self.state.lock().fallback = fallback;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Far end of the oldest accepted connection not yet taken
    pub fn take_peer(&self) -> Option<DuplexStream> {
        self.state.lock().peers.pop_front()
    }
}

#[async_trait]
impl Connector for ScriptedConnector {
    type Stream = DuplexStream;

    async fn connect(&self) -> io::Result<DuplexStream> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let mut state = self.state.lock();
        let step = state.steps.pop_front().unwrap_or(state.fallback);
        match step {
            ScriptStep::Refuse => Err(io::Error::from(io::ErrorKind::ConnectionRefused)),
            ScriptStep::Accept => {
                let (client, server) = tokio::io::duplex(DUPLEX_CAPACITY);
                state.peers.push_back(server);
                Ok(client)
            }
        }
    }

    fn destination(&self) -> String {
        "scripted".to_string()
    }
}

/// Listener handler that forwards every message to an unbounded queue
#[derive(Clone)]
pub struct ChannelHandler {
    tx: mpsc::UnboundedSender<InboundMessage>,
}

impl ChannelHandler {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<InboundMessage>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

impl MessageHandler for ChannelHandler {
    fn on_message(&self, message: InboundMessage) {
        let _ = self.tx.send(message);
    }
}
