//! Transport and connection error types.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Network error type covering connection failures, timeouts and WebSocket errors.
///
/// ```
/// use pulse_core::error::NetworkError;
///
/// let error = NetworkError::ConnectionFailed {
///     reason: "Connection refused".to_string(),
/// };
/// assert!(error.to_string().contains("Connection refused"));
/// ```
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum NetworkError {
    /// Connection to remote host failed.
    #[error("[Network] Connection failed: {reason}")]
    ConnectionFailed {
        /// Reason for the connection failure.
        reason: String,
    },

    /// Connection timed out.
    #[error("[Network] Connection timeout after {timeout_ms}ms")]
    Timeout {
        /// Timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// The configured origin cannot be turned into a socket URL.
    #[error("[Network] Invalid URL '{url}': {reason}")]
    InvalidUrl {
        /// Offending URL.
        url: String,
        /// Reason the URL was rejected.
        reason: String,
    },

    /// WebSocket error occurred.
    #[error("[Network] WebSocket error: {reason}")]
    WebSocket {
        /// Reason for the WebSocket error.
        reason: String,
    },

    /// HTTP request failed (health checks).
    #[error("[Network] HTTP error: status {status_code} - {reason}")]
    Http {
        /// HTTP status code.
        status_code: u16,
        /// Reason for the HTTP error.
        reason: String,
    },

    /// Connection was closed.
    #[error("[Network] Connection closed: {reason}")]
    ConnectionClosed {
        /// Reason for the connection closure.
        reason: String,
    },
}

impl NetworkError {
    /// Returns true if this error can be retried.
    #[must_use]
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, Self::InvalidUrl { .. })
    }

    /// Returns the severity level of this error.
    #[must_use]
    pub fn severity(&self) -> super::ErrorSeverity {
        use super::ErrorSeverity;
        match self {
            Self::InvalidUrl { .. } => ErrorSeverity::Fatal,
            Self::Http { status_code, .. } if *status_code < 500 => ErrorSeverity::Warning,
            _ => ErrorSeverity::Recoverable,
        }
    }

    /// Shorthand for a closed-connection error.
    #[must_use]
    pub fn closed(reason: impl Into<String>) -> Self {
        Self::ConnectionClosed {
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorSeverity;

    #[test]
    fn test_timeout() {
        let error = NetworkError::Timeout { timeout_ms: 5000 };
        assert!(error.to_string().contains("5000ms"));
        assert!(error.is_recoverable());
    }

    #[test]
    fn test_invalid_url_is_fatal() {
        let error = NetworkError::InvalidUrl {
            url: "ftp://nowhere".to_string(),
            reason: "unsupported scheme".to_string(),
        };
        assert!(!error.is_recoverable());
        assert_eq!(error.severity(), ErrorSeverity::Fatal);
    }

    #[test]
    fn test_http_severity() {
        let server = NetworkError::Http {
            status_code: 503,
            reason: "unavailable".to_string(),
        };
        let client = NetworkError::Http {
            status_code: 404,
            reason: "not found".to_string(),
        };
        assert_eq!(server.severity(), ErrorSeverity::Recoverable);
        assert_eq!(client.severity(), ErrorSeverity::Warning);
    }
}
