//! Transport abstraction.
//!
//! A [`Connector`] opens one [`Transport`] per connection attempt. The
//! transport is disposable: when it closes, the client asks the connector
//! for a fresh one and replays its own state onto it.

pub mod message;
pub mod ws;

pub use message::{Frame, events};
pub use ws::WsConnector;

use async_trait::async_trait;
use pulse_core::error::NetworkError;
use std::sync::Arc;
use tokio::sync::mpsc;
use url::Url;

/// Why a transport stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseCause {
    /// The server closed the connection deliberately.
    Server {
        /// Close reason, if one was given.
        reason: Option<String>,
    },
    /// The connection dropped (I/O error, missed heartbeat).
    Network {
        /// Error description.
        reason: String,
    },
    /// The client closed it.
    Client,
}

impl CloseCause {
    /// Returns a human-readable reason.
    #[must_use]
    pub fn reason(&self) -> String {
        match self {
            Self::Server { reason } => reason
                .clone()
                .unwrap_or_else(|| "server closed connection".to_string()),
            Self::Network { reason } => reason.clone(),
            Self::Client => "client disconnect".to_string(),
        }
    }
}

/// Event delivered by an open transport.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A decoded inbound frame.
    Frame(Frame),
    /// The transport stopped; no further events follow.
    Closed(CloseCause),
}

/// One open, bidirectional connection.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Identifier unique among transports from the same connector.
    fn id(&self) -> u64;

    /// Sends one frame. Resolves once the frame was written.
    async fn send(&self, frame: Frame) -> Result<(), NetworkError>;

    /// Closes the transport. Idempotent.
    async fn close(&self);
}

/// An opened transport together with its inbound event stream.
pub struct TransportLink {
    /// Send half.
    pub transport: Arc<dyn Transport>,
    /// Inbound frames and the terminal close event.
    pub events: mpsc::Receiver<TransportEvent>,
}

impl std::fmt::Debug for TransportLink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransportLink")
            .field("transport_id", &self.transport.id())
            .finish_non_exhaustive()
    }
}

/// Opens transports.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Opens a new transport to `url`.
    async fn open(&self, url: &Url) -> Result<TransportLink, NetworkError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_close_cause_reason() {
        assert_eq!(
            CloseCause::Server { reason: None }.reason(),
            "server closed connection"
        );
        assert_eq!(
            CloseCause::Network {
                reason: "pong timeout".to_string()
            }
            .reason(),
            "pong timeout"
        );
        assert_eq!(CloseCause::Client.reason(), "client disconnect");
    }
}
