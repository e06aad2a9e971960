//! Wire protocol errors.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors encoding or decoding real-time frames.
#[derive(Error, Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtocolError {
    /// An inbound frame could not be decoded.
    #[error("[Protocol] Malformed frame: {reason}")]
    MalformedFrame {
        /// Decoder message.
        reason: String,
    },

    /// An outbound payload could not be encoded.
    #[error("[Protocol] Failed to encode '{event}': {reason}")]
    Encode {
        /// Event being encoded.
        event: String,
        /// Encoder message.
        reason: String,
    },

    /// A control event carried a payload of the wrong shape.
    #[error("[Protocol] Unexpected payload for '{event}': {reason}")]
    UnexpectedPayload {
        /// Event name.
        event: String,
        /// What was wrong with it.
        reason: String,
    },
}

impl ProtocolError {
    /// Returns the severity level of this error.
    ///
    /// A bad frame is dropped and logged; the connection carries on.
    #[must_use]
    pub fn severity(&self) -> super::ErrorSeverity {
        super::ErrorSeverity::Warning
    }
}
