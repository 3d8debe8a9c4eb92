//! Transport counters
//!
//! Lock-free counters shared by every task of a listener or sender. Clones
//! share the same counters.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

use parking_lot::RwLock;

#[derive(Clone, Default)]
pub struct TransportStats {
    messages: Arc<AtomicU64>,
    bytes: Arc<AtomicU64>,
    checksum_failures: Arc<AtomicU64>,
    unknown_types: Arc<AtomicU64>,
    connections: Arc<AtomicU64>,
    reconnects: Arc<AtomicU64>,
    last_activity: Arc<RwLock<Option<Instant>>>,
}

/// Point-in-time copy of [`TransportStats`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatsSnapshot {
    pub messages: u64,
    pub bytes: u64,
    pub checksum_failures: u64,
    pub unknown_types: u64,
    pub connections: u64,
    pub reconnects: u64,
}

impl TransportStats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count one delivered (or sent) message
    #[inline]
    pub fn record_message(&self, bytes: usize) {
        self.messages.fetch_add(1, Ordering::Relaxed);
        self.bytes.fetch_add(bytes as u64, Ordering::Relaxed);
        *self.last_activity.write() = Some(Instant::now());
    }

    pub fn record_checksum_failure(&self) {
        self.checksum_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_unknown_type(&self) {
        self.unknown_types.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_connection(&self) {
        self.connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_reconnect(&self) {
        self.reconnects.fetch_add(1, Ordering::Relaxed);
    }

    pub fn last_activity(&self) -> Option<Instant> {
        *self.last_activity.read()
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            messages: self.messages.load(Ordering::Relaxed),
            bytes: self.bytes.load(Ordering::Relaxed),
            checksum_failures: self.checksum_failures.load(Ordering::Relaxed),
            unknown_types: self.unknown_types.load(Ordering::Relaxed),
            connections: self.connections.load(Ordering::Relaxed),
            reconnects: self.reconnects.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clones_share_counters() {
        let stats = TransportStats::new();
        let other = stats.clone();
        other.record_message(10);
        other.record_message(5);
        stats.record_checksum_failure();

        let snap = stats.snapshot();
        assert_eq!(snap.messages, 2);
        assert_eq!(snap.bytes, 15);
        assert_eq!(snap.checksum_failures, 1);
        assert!(stats.last_activity().is_some());
    }
}
