//! Connection state observable by the application.

use pulse_core::error::AuthError;
use serde::{Deserialize, Serialize};

/// Lifecycle state of the real-time connection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionState {
    /// No session; nothing is running.
    #[default]
    Disconnected,
    /// First transport open in progress.
    Connecting,
    /// Transport open, handshake not yet acknowledged.
    Connected,
    /// Transport open and the server accepted the handshake.
    Authenticated,
    /// Transport lost; the supervisor is retrying.
    Reconnecting,
    /// The server rejected the handshake.
    AuthFailed,
    /// Reconnection attempts exhausted; waiting for a manual retry.
    Failed,
    /// Torn down by the application.
    Closed,
}

impl ConnectionState {
    /// Returns true while a transport is open.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        matches!(self, Self::Connected | Self::Authenticated | Self::AuthFailed)
    }

    /// Returns true if the connection is in a transitional state.
    #[must_use]
    pub fn is_transitioning(&self) -> bool {
        matches!(self, Self::Connecting | Self::Reconnecting)
    }

    /// Returns true if no session is active.
    #[must_use]
    pub fn is_inactive(&self) -> bool {
        matches!(self, Self::Disconnected | Self::Closed)
    }

    /// Returns the snake_case label used in logs and CLI output.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Disconnected => "disconnected",
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Authenticated => "authenticated",
            Self::Reconnecting => "reconnecting",
            Self::AuthFailed => "auth_failed",
            Self::Failed => "failed",
            Self::Closed => "closed",
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of the most recent application-level health check.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServerReachability {
    /// No check has completed yet.
    #[default]
    Unknown,
    /// The health endpoint answered with a success status.
    Reachable,
    /// The health endpoint failed or timed out.
    Unreachable,
}

/// Snapshot published on every connection change.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ConnectionStatus {
    /// Lifecycle state.
    pub state: ConnectionState,
    /// Whether a transport is currently open.
    pub connected: bool,
    /// Whether the server accepted the handshake on the current transport.
    pub authenticated: bool,
    /// Outcome of the last health check.
    pub server: ServerReachability,
    /// Consecutive reconnection attempts since the last successful open.
    pub reconnect_attempt: u32,
    /// Most recent transport error, cleared on successful connect.
    pub last_error: Option<String>,
    /// Reason the handshake was rejected, set only in `AuthFailed`.
    pub auth_error: Option<AuthError>,
}

impl ConnectionStatus {
    pub(crate) fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.connected = state.is_connected();
        if state != ConnectionState::Authenticated {
            self.authenticated = false;
        }
        if state != ConnectionState::AuthFailed {
            self.auth_error = None;
        }
    }

    pub(crate) fn mark_connected(&mut self) {
        self.set_state(ConnectionState::Connected);
        self.reconnect_attempt = 0;
        self.last_error = None;
    }

    pub(crate) fn mark_authenticated(&mut self) {
        self.set_state(ConnectionState::Authenticated);
        self.authenticated = true;
    }

    pub(crate) fn mark_auth_failed(&mut self, error: AuthError) {
        self.set_state(ConnectionState::AuthFailed);
        self.auth_error = Some(error);
    }

    pub(crate) fn mark_reconnecting(&mut self, attempt: u32, error: Option<String>) {
        self.set_state(ConnectionState::Reconnecting);
        self.reconnect_attempt = attempt;
        if error.is_some() {
            self.last_error = error;
        }
    }

    pub(crate) fn reset(&mut self, state: ConnectionState) {
        *self = Self {
            server: self.server,
            ..Self::default()
        };
        self.set_state(state);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_helpers() {
        assert!(ConnectionState::Authenticated.is_connected());
        assert!(ConnectionState::AuthFailed.is_connected());
        assert!(!ConnectionState::Reconnecting.is_connected());
        assert!(ConnectionState::Reconnecting.is_transitioning());
        assert!(ConnectionState::Closed.is_inactive());
        assert_eq!(ConnectionState::AuthFailed.to_string(), "auth_failed");
    }

    #[test]
    fn test_auth_failure_is_distinct_from_disconnect() {
        let mut status = ConnectionStatus::default();
        status.mark_connected();
        status.mark_authenticated();
        assert!(status.authenticated);

        status.mark_auth_failed(AuthError::rejected(Some("bad token")));
        assert!(!status.authenticated);
        assert!(status.connected);
        assert_eq!(status.state, ConnectionState::AuthFailed);
        assert_ne!(status.state, ConnectionState::Disconnected);
        assert!(status.auth_error.is_some());

        status.mark_reconnecting(1, Some("socket closed".to_string()));
        assert!(status.auth_error.is_none());
        assert!(!status.connected);
    }

    #[test]
    fn test_reset_keeps_reachability() {
        let mut status = ConnectionStatus {
            server: ServerReachability::Unreachable,
            reconnect_attempt: 3,
            ..ConnectionStatus::default()
        };
        status.reset(ConnectionState::Closed);
        assert_eq!(status.server, ServerReachability::Unreachable);
        assert_eq!(status.reconnect_attempt, 0);
        assert_eq!(status.state, ConnectionState::Closed);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        let status = ConnectionStatus::default();
        let json = serde_json::to_string(&status).unwrap();
        assert!(json.contains(r#""state":"disconnected""#));
        assert!(json.contains(r#""server":"unknown""#));
    }
}
