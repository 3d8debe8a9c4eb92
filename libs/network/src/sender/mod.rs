//! # Transport Senders
//!
//! - [`SimpleSender`]: `send` writes the frame before returning, rebuilding the
//!   connection inline when the peer has gone away
//! - [`ResilientSender`]: `send` only enqueues; a worker task drains the queue
//!   and pauses (keeping every queued frame) when reconnects run out
//! - [`UdpSender`]: count datagram plus fragments, best-effort
//!
//! All three implement [`FrameSender`], which is what replay drives.

pub mod resilient;
pub mod simple;
pub mod state;
pub mod udp;

use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};

use crate::connect::RetryPolicy;
use crate::diagnostics::Diagnostics;
use crate::stop::StopSignal;
use crate::Result;

pub use resilient::ResilientSender;
pub use simple::SimpleSender;
pub use state::SenderConnectionState;
pub use udp::UdpSender;

/// Anything that can deliver a packed payload (`type_id + body`)
#[async_trait]
pub trait FrameSender: Send {
    async fn send_payload(&mut self, payload: Bytes) -> Result<()>;

    fn destination(&self) -> String;
}

/// Connection behaviour shared by TCP senders
#[derive(Debug, Clone)]
pub struct SenderConfig {
    /// Budget for the very first connection
    pub initial: RetryPolicy,
    /// Budget for each re-establishment after a write failure
    pub reconnect: RetryPolicy,
    /// Wait for the first connection during construction.
    ///
    /// Only [`ResilientSender`] can start in the background; [`SimpleSender`]
    /// always connects before returning.
    pub blocking_connect: bool,
    pub stop: StopSignal,
    pub diagnostics: Diagnostics,
}

impl Default for SenderConfig {
    fn default() -> Self {
        Self {
            initial: RetryPolicy::default(),
            reconnect: RetryPolicy::limited(3, Duration::from_secs(2)),
            blocking_connect: true,
            stop: StopSignal::new(),
            diagnostics: Diagnostics::disabled(),
        }
    }
}

impl SenderConfig {
    /// Build from retry limits and a shared backoff
    pub fn with_limits(
        initial_retry_limit: Option<u32>,
        reconnect_retry_limit: Option<u32>,
        backoff: Duration,
    ) -> Self {
        Self {
            initial: RetryPolicy {
                max_retries: initial_retry_limit,
                backoff,
            },
            reconnect: RetryPolicy {
                max_retries: reconnect_retry_limit,
                backoff,
            },
            ..Self::default()
        }
    }

    pub fn with_stop(mut self, stop: StopSignal) -> Self {
        self.stop = stop;
        self
    }

    pub fn with_diagnostics(mut self, diagnostics: Diagnostics) -> Self {
        self.diagnostics = diagnostics;
        self
    }

    pub fn blocking(mut self, blocking: bool) -> Self {
        self.blocking_connect = blocking;
        self
    }
}

pub(crate) async fn write_frame<W>(stream: &mut W, frame: &[u8]) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    stream.write_all(frame).await?;
    stream.flush().await
}
