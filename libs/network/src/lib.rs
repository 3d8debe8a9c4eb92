//! # Skai Network Transport
//!
//! ## Purpose
//!
//! Moves framed messages between processes over TCP or UDP: multi-port
//! listeners that verify and deliver inbound frames (optionally recording
//! them), and senders that connect with retry, survive disconnects and
//! fragment UDP messages.
//!
//! ## Architecture Role
//!
//! ```text
//! codec (framing, checksums) ──> [network] ──> replay / tools
//!                                    │
//!                                    └──> recording (inbound capture)
//! ```
//!
//! ## Components
//! - [`listener`]: per-port TCP/UDP tasks, inline or decoupled delivery
//! - [`sender`]: [`SimpleSender`], [`ResilientSender`], [`UdpSender`]
//! - [`connect`]: retry loop behind a [`Connector`] seam
//! - [`StopSignal`]: the one cooperative shutdown flag
//! - [`Diagnostics`]: optional typed event queue next to the logs

pub mod connect;
pub mod diagnostics;
pub mod error;
pub mod listener;
pub mod sender;
pub mod stats;
pub mod stop;
#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

pub use connect::{connect_with_retry, ConnectOutcome, Connector, RetryPolicy, TcpConnector};
pub use diagnostics::{DiagnosticEvent, Diagnostics};
pub use error::{Result, TransportError};
pub use listener::{
    ConcurrencyModel, DecoupledListener, InboundMessage, InlineListener, Listener,
    ListenerConfig, ListenerHandle, MessageHandler,
};
pub use sender::{
    FrameSender, ResilientSender, SenderConfig, SenderConnectionState, SimpleSender, UdpSender,
};
pub use stats::{StatsSnapshot, TransportStats};
pub use stop::StopSignal;
pub use types::TransportKind;
