//! Connection status surface.
//!
//! The client publishes a [`ConnectionStatus`] snapshot through a
//! `tokio::sync::watch` channel. Any number of observers may hold a receiver;
//! each sees the latest snapshot and is woken on change.

use std::sync::Arc;
use tokio::sync::watch;
use tracing::debug;

use crate::state::{ConnectionState, ConnectionStatus};

/// Shared publisher of [`ConnectionStatus`].
#[derive(Debug, Clone)]
pub struct StatusHandle {
    tx: Arc<watch::Sender<ConnectionStatus>>,
}

impl Default for StatusHandle {
    fn default() -> Self {
        Self::new()
    }
}

impl StatusHandle {
    /// Creates a handle publishing the default (disconnected) status.
    #[must_use]
    pub fn new() -> Self {
        let (tx, _) = watch::channel(ConnectionStatus::default());
        Self { tx: Arc::new(tx) }
    }

    /// Returns a receiver for status changes.
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.tx.subscribe()
    }

    /// Returns the current snapshot.
    #[must_use]
    pub fn current(&self) -> ConnectionStatus {
        self.tx.borrow().clone()
    }

    /// Returns the current lifecycle state.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.tx.borrow().state
    }

    /// Applies `f` to the status and notifies observers if anything changed.
    ///
    /// Returns the `(before, after)` pair so callers can react to transitions.
    pub fn update<F>(&self, f: F) -> (ConnectionStatus, ConnectionStatus)
    where
        F: FnOnce(&mut ConnectionStatus),
    {
        let mut transition = None;
        self.tx.send_if_modified(|status| {
            let before = status.clone();
            f(status);
            let changed = *status != before;
            transition = Some((before, status.clone()));
            changed
        });

        let (before, after) = transition.unwrap_or_else(|| {
            let current = self.current();
            (current.clone(), current)
        });
        if before.state != after.state {
            debug!(from = %before.state, to = %after.state, "Connection state changed");
        }
        (before, after)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::ServerReachability;

    #[tokio::test]
    async fn test_observers_see_changes() {
        let handle = StatusHandle::new();
        let mut rx = handle.subscribe();
        assert_eq!(rx.borrow().state, ConnectionState::Disconnected);

        handle.update(|s| s.set_state(ConnectionState::Connecting));
        rx.changed().await.unwrap();
        assert_eq!(rx.borrow_and_update().state, ConnectionState::Connecting);
    }

    #[tokio::test]
    async fn test_unchanged_update_does_not_notify() {
        let handle = StatusHandle::new();
        let mut rx = handle.subscribe();
        rx.borrow_and_update();

        let (before, after) = handle.update(|s| s.server = ServerReachability::Unknown);
        assert_eq!(before, after);
        assert!(!rx.has_changed().unwrap());
    }

    #[test]
    fn test_update_returns_transition() {
        let handle = StatusHandle::new();
        let (before, after) = handle.update(|s| s.mark_connected());
        assert_eq!(before.state, ConnectionState::Disconnected);
        assert_eq!(after.state, ConnectionState::Connected);
        assert!(handle.current().connected);
        assert_eq!(handle.state(), ConnectionState::Connected);
    }
}
