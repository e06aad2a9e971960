//! Authentication handshake errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors raised by the `authenticate` handshake.
///
/// Retrying with the same credentials is expected to fail again, so none of
/// these are recoverable without the application re-authenticating.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AuthError {
    /// The server rejected the handshake.
    #[error("[Auth] Authentication rejected: {reason}")]
    Rejected {
        /// Reason reported by the server.
        reason: String,
    },

    /// No credentials were available to authenticate with.
    #[error("[Auth] No credentials available")]
    MissingCredentials,

    /// The handshake was rejected too many times in a row.
    #[error("[Auth] Gave up after {attempts} rejected handshakes")]
    TooManyFailures {
        /// Number of consecutive rejections.
        attempts: u32,
    },
}

impl AuthError {
    /// Returns the severity level of this error.
    #[must_use]
    pub fn severity(&self) -> super::ErrorSeverity {
        super::ErrorSeverity::Fatal
    }

    /// Builds a rejection from the optional server message.
    #[must_use]
    pub fn rejected(reason: Option<&str>) -> Self {
        Self::Rejected {
            reason: reason.unwrap_or("authentication failed").to_string(),
        }
    }
}
