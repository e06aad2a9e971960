//! Wire envelope and control payloads.
//!
//! Every frame is a JSON text message `{"event": "<name>", "data": <json>}`.

use pulse_core::error::ProtocolError;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;

/// Well-known event names.
pub mod events {
    /// Outbound handshake.
    pub const AUTHENTICATE: &str = "authenticate";
    /// Inbound handshake result.
    pub const AUTHENTICATED: &str = "authenticated";
    /// Outbound entity subscription.
    pub const SUBSCRIBE_ENTITY: &str = "subscribe:entity";
    /// Outbound entity unsubscription.
    pub const UNSUBSCRIBE_ENTITY: &str = "unsubscribe:entity";
    /// Inbound server-initiated disconnect; also synthesized on transport loss.
    pub const DISCONNECT: &str = "disconnect";
    /// Inbound server error.
    pub const ERROR: &str = "error";
    /// Generic inbound change notification.
    pub const DATA_UPDATED: &str = "data:updated";
    /// Synthesized when the first transport of a session opens.
    pub const CONNECT: &str = "connect";
    /// Synthesized when a later transport of the same session opens.
    pub const RECONNECT: &str = "reconnect";
    /// Synthesized before each reconnection attempt.
    pub const RECONNECT_ATTEMPT: &str = "reconnect_attempt";
}

/// One wire frame.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    /// Event name.
    pub event: String,
    /// Payload; `null` when the event carries none.
    #[serde(default)]
    pub data: Value,
}

impl Frame {
    /// Creates a frame from a name and a JSON payload.
    #[must_use]
    pub fn new(event: impl Into<String>, data: Value) -> Self {
        Self {
            event: event.into(),
            data,
        }
    }

    /// Creates a frame from a serializable payload.
    pub fn with_payload<T: Serialize>(
        event: impl Into<String>,
        payload: &T,
    ) -> Result<Self, ProtocolError> {
        let event = event.into();
        let data = serde_json::to_value(payload).map_err(|e| ProtocolError::Encode {
            event: event.clone(),
            reason: e.to_string(),
        })?;
        Ok(Self { event, data })
    }

    /// Encodes the frame as JSON text.
    pub fn encode(&self) -> Result<String, ProtocolError> {
        serde_json::to_string(self).map_err(|e| ProtocolError::Encode {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }

    /// Decodes a frame from JSON text.
    ///
    /// ```
    /// use pulse_realtime::transport::Frame;
    ///
    /// let frame = Frame::decode(r#"{"event":"lead:created","data":{"id":7}}"#).unwrap();
    /// assert_eq!(frame.event, "lead:created");
    /// ```
    pub fn decode(text: &str) -> Result<Self, ProtocolError> {
        let frame: Self =
            serde_json::from_str(text).map_err(|e| ProtocolError::MalformedFrame {
                reason: e.to_string(),
            })?;
        if frame.event.is_empty() {
            return Err(ProtocolError::MalformedFrame {
                reason: "empty event name".to_string(),
            });
        }
        Ok(frame)
    }

    /// Parses the payload as `T`.
    pub fn payload<T: DeserializeOwned>(&self) -> Result<T, ProtocolError> {
        serde_json::from_value(self.data.clone()).map_err(|e| ProtocolError::UnexpectedPayload {
            event: self.event.clone(),
            reason: e.to_string(),
        })
    }
}

/// `authenticate` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticatePayload {
    /// User identifier.
    pub user_id: String,
    /// Organisation identifier.
    pub org_id: String,
    /// Session token, when the provider issues one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub token: Option<String>,
}

/// `authenticated` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthenticatedPayload {
    /// Whether the handshake was accepted.
    pub success: bool,
    /// Rejection reason.
    #[serde(default)]
    pub error: Option<String>,
}

/// `subscribe:entity` / `unsubscribe:entity` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityPayload {
    /// Entity type, e.g. `lead`.
    pub entity_type: String,
    /// Entity identifier.
    pub entity_id: crate::registry::EntityId,
}

/// `disconnect` payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DisconnectPayload {
    /// Why the connection ended.
    #[serde(default)]
    pub reason: Option<String>,
}

/// `error` payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorPayload {
    /// Server message.
    pub message: String,
}

/// `reconnect_attempt` payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconnectAttemptPayload {
    /// 1-based attempt number.
    pub attempt_number: u32,
}
