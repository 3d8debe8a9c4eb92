//! Best-effort UDP sender
//!
//! Each message goes out as a count datagram followed by the fragments of
//! `payload + digest`. There is no acknowledgement and no connection state.

use std::net::SocketAddr;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use codec::{fragment, ChecksumMode, UDP_FRAGMENT_SIZE};
use tokio::net::{lookup_host, UdpSocket};
use tracing::debug;

use super::FrameSender;
use crate::stats::TransportStats;
use crate::{Result, TransportError};

pub struct UdpSender {
    socket: UdpSocket,
    destination: SocketAddr,
    fragment_size: usize,
    inter_packet_delay: Duration,
    stats: TransportStats,
}

impl UdpSender {
    /// Resolve `host:port` and bind an ephemeral socket of the same family
    pub async fn to_host(host: &str, port: u16, ipv6: bool) -> Result<Self> {
        let destination = lookup_host((host, port))
            .await
            .map_err(|e| {
                TransportError::network_with_source(format!("Failed to resolve {host}:{port}"), e)
            })?
            .find(|addr| addr.is_ipv6() == ipv6)
            .ok_or_else(|| {
                TransportError::configuration(
                    format!(
                        "No {} address for {host}:{port}",
                        if ipv6 { "IPv6" } else { "IPv4" }
                    ),
                    Some("host"),
                )
            })?;
        Self::bind(destination).await
    }

    pub async fn bind(destination: SocketAddr) -> Result<Self> {
        let local: SocketAddr = if destination.is_ipv6() {
            (std::net::Ipv6Addr::UNSPECIFIED, 0).into()
        } else {
            (std::net::Ipv4Addr::UNSPECIFIED, 0).into()
        };
        let socket = UdpSocket::bind(local).await.map_err(|e| {
            TransportError::network_with_source(format!("Failed to bind UDP socket on {local}"), e)
        })?;
        debug!(%destination, "UDP sender ready");

        Ok(Self {
            socket,
            destination,
            fragment_size: UDP_FRAGMENT_SIZE,
            inter_packet_delay: Duration::ZERO,
            stats: TransportStats::new(),
        })
    }

    /// Fragment size in bytes; zero keeps the default
    pub fn with_fragment_size(mut self, size: usize) -> Self {
        if size > 0 {
            self.fragment_size = size;
        }
        self
    }

    /// Pause between datagrams; zero only yields to the scheduler
    pub fn with_inter_packet_delay(mut self, delay: Duration) -> Self {
        self.inter_packet_delay = delay;
        self
    }

    pub fn destination(&self) -> SocketAddr {
        self.destination
    }

    pub fn stats(&self) -> &TransportStats {
        &self.stats
    }

    pub async fn send(&self, payload: &[u8]) -> Result<()> {
        self.send_with(payload, ChecksumMode::Valid).await
    }

    pub async fn send_with(&self, payload: &[u8], mode: ChecksumMode) -> Result<()> {
        let fragments = fragment(payload, mode, self.fragment_size);
        let mut bytes = 0;

        for datagram in fragments.datagrams() {
            self.socket
                .send_to(&datagram, self.destination)
                .await
                .map_err(|e| {
                    TransportError::network_with_source(
                        format!("Failed to send UDP datagram to {}", self.destination),
                        e,
                    )
                })?;
            bytes += datagram.len();
            self.pace().await;
        }

        self.stats.record_message(bytes);
        debug!(
            destination = %self.destination,
            fragments = fragments.count(),
            bytes,
            "Sent UDP message"
        );
        Ok(())
    }

    async fn pace(&self) {
        if self.inter_packet_delay.is_zero() {
            tokio::task::yield_now().await;
        } else {
            tokio::time::sleep(self.inter_packet_delay).await;
        }
    }
}

#[async_trait]
impl FrameSender for UdpSender {
    async fn send_payload(&mut self, payload: Bytes) -> Result<()> {
        self.send(&payload).await
    }

    fn destination(&self) -> String {
        self.destination.to_string()
    }
}
