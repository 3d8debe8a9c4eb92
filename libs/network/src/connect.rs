//! Connection establishment with fixed-backoff retry
//!
//! Senders do not open sockets directly: they go through a [`Connector`], so
//! the reconnect state machine is the same for real TCP and for in-memory
//! streams in tests.

use std::io;
use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::net::{lookup_host, TcpStream};
use tracing::{info, warn};

use crate::diagnostics::{DiagnosticEvent, Diagnostics};
use crate::stop::StopSignal;

/// Retry budget for one connect phase
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Retries after the first attempt; `None` retries until stopped
    pub max_retries: Option<u32>,
    /// Fixed wait between attempts
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: None,
            backoff: Duration::from_secs(2),
        }
    }
}

impl RetryPolicy {
    pub fn unbounded(backoff: Duration) -> Self {
        Self {
            max_retries: None,
            backoff,
        }
    }

    pub fn limited(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries: Some(max_retries),
            backoff,
        }
    }

    /// Total attempts allowed, if bounded
    pub fn max_attempts(&self) -> Option<u32> {
        self.max_retries.map(|n| n.saturating_add(1))
    }

    /// Whether another attempt may follow `attempts` failed ones
    pub fn allows_retry(&self, attempts: u32) -> bool {
        self.max_retries.map_or(true, |n| attempts <= n)
    }
}

/// Opens the byte stream a sender writes frames to
#[async_trait]
pub trait Connector: Send + Sync + 'static {
    type Stream: AsyncWrite + Unpin + Send + 'static;

    async fn connect(&self) -> io::Result<Self::Stream>;

    /// Human-readable destination for logs
    fn destination(&self) -> String;
}

/// TCP connector resolving `host:port` on every attempt
#[derive(Debug, Clone)]
pub struct TcpConnector {
    host: String,
    port: u16,
    ipv6: bool,
}

impl TcpConnector {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ipv6: false,
        }
    }

    /// Only use IPv6 addresses for the host
    pub fn with_ipv6(mut self, ipv6: bool) -> Self {
        self.ipv6 = ipv6;
        self
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    async fn resolve(&self) -> io::Result<Vec<SocketAddr>> {
        let addrs: Vec<SocketAddr> = lookup_host((self.host.as_str(), self.port))
            .await?
            .filter(|a| a.is_ipv6() == self.ipv6)
            .collect();
        if addrs.is_empty() {
            return Err(io::Error::new(
                io::ErrorKind::AddrNotAvailable,
                format!(
                    "{} has no {} address",
                    self.host,
                    if self.ipv6 { "IPv6" } else { "IPv4" }
                ),
            ));
        }
        Ok(addrs)
    }
}

#[async_trait]
impl Connector for TcpConnector {
    type Stream = TcpStream;

    async fn connect(&self) -> io::Result<TcpStream> {
        let mut last_err = None;
        for addr in self.resolve().await? {
            match TcpStream::connect(addr).await {
                Ok(stream) => {
                    stream.set_nodelay(true)?;
                    return Ok(stream);
                }
                Err(e) => last_err = Some(e),
            }
        }
        Err(last_err.unwrap_or_else(|| io::Error::from(io::ErrorKind::ConnectionRefused)))
    }

    fn destination(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Outcome of [`connect_with_retry`]
#[derive(Debug)]
pub enum ConnectOutcome<S> {
    Connected(S),
    Exhausted { attempts: u32 },
    Stopped,
}

/// Attempt to connect until success, budget exhaustion or stop.
///
/// Each failure is logged and reported as `ConnectionRefused`, then the
/// policy's backoff elapses before the next attempt.
pub async fn connect_with_retry<C: Connector>(
    connector: &C,
    policy: &RetryPolicy,
    stop: &StopSignal,
    diagnostics: &Diagnostics,
) -> ConnectOutcome<C::Stream> {
    let destination = connector.destination();
    let mut attempts = 0u32;

    loop {
        if stop.is_set() {
            return ConnectOutcome::Stopped;
        }
        attempts += 1;

        match connector.connect().await {
            Ok(stream) => {
                info!(%destination, attempts, "Connected");
                diagnostics.emit(DiagnosticEvent::Connected {
                    destination: destination.clone(),
                });
                return ConnectOutcome::Connected(stream);
            }
            Err(e) => {
                warn!(%destination, attempt = attempts, error = %e, "Connection refused");
                diagnostics.emit(DiagnosticEvent::ConnectionRefused {
                    destination: destination.clone(),
                    attempt: attempts,
                });
            }
        }

        if !policy.allows_retry(attempts) {
            return ConnectOutcome::Exhausted { attempts };
        }

        tokio::select! {
            _ = tokio::time::sleep(policy.backoff) => {}
            _ = stop.wait() => return ConnectOutcome::Stopped,
        }
    }
}

/// Write errors that mean the peer is gone and the stream must be rebuilt
pub fn is_connection_lost(err: &io::Error) -> bool {
    matches!(
        err.kind(),
        io::ErrorKind::BrokenPipe
            | io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::NotConnected
            | io::ErrorKind::WriteZero
            | io::ErrorKind::UnexpectedEof
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::ScriptedConnector;

    #[test]
    fn test_policy_budget() {
        let policy = RetryPolicy::limited(3, Duration::ZERO);
        assert_eq!(policy.max_attempts(), Some(4));
        assert!(policy.allows_retry(3));
        assert!(!policy.allows_retry(4));
        assert!(RetryPolicy::default().allows_retry(u32::MAX));
    }

    #[tokio::test]
    async fn test_succeeds_within_budget() {
        let connector = ScriptedConnector::refusing_then_accepting(3);
        let policy = RetryPolicy::limited(3, Duration::from_millis(1));
        let (diagnostics, events) = Diagnostics::channel();

        let outcome =
            connect_with_retry(&connector, &policy, &StopSignal::new(), &diagnostics).await;
        assert!(matches!(outcome, ConnectOutcome::Connected(_)));
        assert_eq!(connector.attempts(), 4);

        let refused = events
            .try_iter()
            .filter(|e| matches!(e, DiagnosticEvent::ConnectionRefused { .. }))
            .count();
        assert_eq!(refused, 3);
    }

    #[tokio::test]
    async fn test_exhausts_budget() {
        let connector = ScriptedConnector::always_refusing();
        let policy = RetryPolicy::limited(3, Duration::from_millis(1));

        let outcome =
            connect_with_retry(&connector, &policy, &StopSignal::new(), &Diagnostics::disabled())
                .await;
        assert!(matches!(outcome, ConnectOutcome::Exhausted { attempts: 4 }));
        assert_eq!(connector.attempts(), 4);
    }

    #[tokio::test]
    async fn test_stop_interrupts_backoff() {
        let connector = ScriptedConnector::always_refusing();
        let policy = RetryPolicy::unbounded(Duration::from_secs(3600));
        let stop = StopSignal::new();

        let task = {
            let stop = stop.clone();
            let connector = connector.clone();
            tokio::spawn(async move {
                connect_with_retry(&connector, &policy, &stop, &Diagnostics::disabled()).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        stop.trigger();

        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(matches!(outcome, ConnectOutcome::Stopped));
        assert_eq!(connector.attempts(), 1);
    }

    #[tokio::test]
    async fn test_tcp_connector_refused_then_listening() {
        // Reserve a port, then free it so the first attempt is refused
        let reserved = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = reserved.local_addr().unwrap();
        drop(reserved);

        let connector = TcpConnector::new("127.0.0.1", addr.port());
        assert!(connector.connect().await.is_err());

        let listener = tokio::net::TcpListener::bind(addr).await.unwrap();
        let stream = connector.connect().await.unwrap();
        assert!(stream.nodelay().unwrap());
        let (_server, _) = listener.accept().await.unwrap();
        assert_eq!(connector.destination(), format!("127.0.0.1:{}", addr.port()));
    }

    #[test]
    fn test_connection_lost_kinds() {
        assert!(is_connection_lost(&io::Error::from(io::ErrorKind::BrokenPipe)));
        assert!(is_connection_lost(&io::Error::from(io::ErrorKind::ConnectionReset)));
        assert!(!is_connection_lost(&io::Error::from(io::ErrorKind::InvalidData)));
    }
}
