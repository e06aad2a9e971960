//! Error types and handling framework.
//!
//! The error system is organized hierarchically:
//! - `PulseError` - Top-level error type
//!   - `NetworkError` - Transport and connection errors
//!   - `AuthError` - Authentication handshake errors
//!   - `ProtocolError` - Wire format errors
//!   - `ConfigError` - Configuration errors
//!
//! Real-time operations never hand these to UI callers directly; they are
//! folded into connection status. The types still carry a severity so the
//! status surface can decide how loudly to report them.
//!
//! ```
//! use pulse_core::error::{NetworkError, PulseError};
//!
//! let error = PulseError::from(NetworkError::Timeout { timeout_ms: 5000 });
//! assert!(error.is_recoverable());
//! assert_eq!(error.category(), "network");
//! ```

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Error severity levels for categorizing errors.
///
/// - `Fatal`: the session cannot continue without user action
/// - `Recoverable`: retried automatically
/// - `Warning`: degraded but functional
/// - `Info`: expected condition worth noting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ErrorSeverity {
    /// Unrecoverable error requiring user action.
    Fatal,

    /// Error that is retried automatically.
    #[default]
    Recoverable,

    /// Non-critical issue; functionality is degraded.
    Warning,

    /// Informational, not a real failure.
    Info,
}

impl ErrorSeverity {
    /// Returns true if this error is recoverable (not fatal).
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        !matches!(self, Self::Fatal)
    }

    /// Returns true if this error is fatal (unrecoverable).
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(self, Self::Fatal)
    }

    /// Returns the severity as a static string.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Fatal => "FATAL",
            Self::Recoverable => "RECOVERABLE",
            Self::Warning => "WARNING",
            Self::Info => "INFO",
        }
    }
}

impl fmt::Display for ErrorSeverity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

mod auth;
mod config;
mod network;
mod protocol;

pub use auth::AuthError;
pub use config::ConfigError;
pub use network::NetworkError;
pub use protocol::ProtocolError;

/// Top-level error type for Pulse.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PulseError {
    /// Network-related error.
    #[error("{0}")]
    Network(#[from] NetworkError),

    /// Authentication error.
    #[error("{0}")]
    Auth(#[from] AuthError),

    /// Wire protocol error.
    #[error("{0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration error.
    #[error("{0}")]
    Config(#[from] ConfigError),
}

impl PulseError {
    /// Returns the severity level of this error.
    #[must_use]
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::Network(e) => e.severity(),
            Self::Auth(e) => e.severity(),
            Self::Protocol(e) => e.severity(),
            Self::Config(e) => e.severity(),
        }
    }

    /// Returns true if this error is recoverable.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        self.severity().is_recoverable()
    }

    /// Returns the error category as a string.
    #[must_use]
    pub fn category(&self) -> &'static str {
        match self {
            Self::Network(_) => "network",
            Self::Auth(_) => "auth",
            Self::Protocol(_) => "protocol",
            Self::Config(_) => "config",
        }
    }

    /// Returns the inner network error, if this is a network error.
    #[must_use]
    pub fn as_network_error(&self) -> Option<&NetworkError> {
        match self {
            Self::Network(e) => Some(e),
            _ => None,
        }
    }

    /// Returns the inner auth error, if this is an auth error.
    #[must_use]
    pub fn as_auth_error(&self) -> Option<&AuthError> {
        match self {
            Self::Auth(e) => Some(e),
            _ => None,
        }
    }
}

/// A specialized Result type for Pulse operations.
pub type Result<T> = std::result::Result<T, PulseError>;
