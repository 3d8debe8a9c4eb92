//! Sender connection state

use std::fmt;

use tokio::sync::watch;
use tracing::debug;

/// Lifecycle of a sender's connection
///
/// ```text
/// Disconnected -> Connecting -> Connected <-> Reconnecting
///                     |                           |
///                     +--------> Paused <---------+
///                                  | resume()
///                                  v
///                             Reconnecting
/// any state --stop()--> Stopped
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SenderConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    /// Retry budget exhausted; waiting for `resume()`
    Paused,
    /// Terminal
    Stopped,
}

impl SenderConnectionState {
    pub fn as_str(&self) -> &'static str {
        match self {
            SenderConnectionState::Disconnected => "disconnected",
            SenderConnectionState::Connecting => "connecting",
            SenderConnectionState::Connected => "connected",
            SenderConnectionState::Reconnecting => "reconnecting",
            SenderConnectionState::Paused => "paused",
            SenderConnectionState::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, SenderConnectionState::Stopped)
    }

    /// States a blocking constructor waits for
    pub(crate) fn is_settled(&self) -> bool {
        matches!(
            self,
            SenderConnectionState::Connected
                | SenderConnectionState::Paused
                | SenderConnectionState::Stopped
        )
    }
}

impl fmt::Display for SenderConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Single owner of a sender's state; readers subscribe
#[derive(Debug)]
pub(crate) struct StateCell {
    tx: watch::Sender<SenderConnectionState>,
    destination: String,
}

impl StateCell {
    pub(crate) fn new(destination: String) -> Self {
        let (tx, _) = watch::channel(SenderConnectionState::Disconnected);
        Self { tx, destination }
    }

    pub(crate) fn get(&self) -> SenderConnectionState {
        *self.tx.borrow()
    }

    /// Move to `next` unless already stopped
    pub(crate) fn set(&self, next: SenderConnectionState) {
        self.tx.send_if_modified(|current| {
            if current.is_terminal() || *current == next {
                return false;
            }
            debug!(destination = %self.destination, from = %current, to = %next, "Sender state change");
            *current = next;
            true
        });
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<SenderConnectionState> {
        self.tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stopped_is_terminal() {
        let cell = StateCell::new("test".into());
        cell.set(SenderConnectionState::Connected);
        assert_eq!(cell.get(), SenderConnectionState::Connected);
        cell.set(SenderConnectionState::Stopped);
        cell.set(SenderConnectionState::Reconnecting);
        assert_eq!(cell.get(), SenderConnectionState::Stopped);
    }

    #[tokio::test]
    async fn test_subscribers_see_changes() {
        let cell = StateCell::new("test".into());
        let mut rx = cell.subscribe();
        cell.set(SenderConnectionState::Paused);
        rx.changed().await.unwrap();
        assert_eq!(*rx.borrow(), SenderConnectionState::Paused);
    }
}
