//! The three sync protocol messages.
//!
//! Each message travels as a [`Message`] envelope whose `content` is a JSON
//! object carrying the target `object_id`, a `timestamp`, and for state and
//! operation messages the CRDT bytes as standard base64.

use base64::{Engine as _, engine::general_purpose::STANDARD};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::json;

use crate::error::{Result, TelepathyError};
use crate::network::{Message, deserialize_wire_timestamp};

/// Ask a peer for its full document state.
pub const STATE_REQUEST: &str = "crdt_state_request";
/// A full document state, sent in reply to a request.
pub const STATE_RESPONSE: &str = "crdt_state_response";
/// An incremental update.
pub const OPERATION: &str = "crdt_operation";

/// A decoded sync protocol message.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncMessage {
    StateRequest {
        object_id: String,
        timestamp: DateTime<Utc>,
    },
    StateResponse {
        object_id: String,
        state_data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
    Operation {
        object_id: String,
        operation_data: Vec<u8>,
        timestamp: DateTime<Utc>,
    },
}

#[derive(Deserialize)]
struct Content {
    object_id: String,
    #[serde(default)]
    state_data: Option<String>,
    #[serde(default)]
    operation_data: Option<String>,
    #[serde(default = "Utc::now", deserialize_with = "deserialize_wire_timestamp")]
    timestamp: DateTime<Utc>,
}

impl SyncMessage {
    pub fn state_request(object_id: impl Into<String>) -> Self {
        SyncMessage::StateRequest {
            object_id: object_id.into(),
            timestamp: Utc::now(),
        }
    }

    pub fn state_response(object_id: impl Into<String>, state_data: Vec<u8>) -> Self {
        SyncMessage::StateResponse {
            object_id: object_id.into(),
            state_data,
            timestamp: Utc::now(),
        }
    }

    pub fn operation(object_id: impl Into<String>, operation_data: Vec<u8>) -> Self {
        SyncMessage::Operation {
            object_id: object_id.into(),
            operation_data,
            timestamp: Utc::now(),
        }
    }

    /// Wire type name.
    pub fn message_type(&self) -> &'static str {
        match self {
            SyncMessage::StateRequest { .. } => STATE_REQUEST,
            SyncMessage::StateResponse { .. } => STATE_RESPONSE,
            SyncMessage::Operation { .. } => OPERATION,
        }
    }

    pub fn object_id(&self) -> &str {
        match self {
            SyncMessage::StateRequest { object_id, .. }
            | SyncMessage::StateResponse { object_id, .. }
            | SyncMessage::Operation { object_id, .. } => object_id,
        }
    }

    /// Wrap in a network envelope.
    pub fn into_message(self) -> Message {
        let message_type = self.message_type();
        let content = match self {
            SyncMessage::StateRequest {
                object_id,
                timestamp,
            } => json!({
                "object_id": object_id,
                "timestamp": timestamp.to_rfc3339(),
            }),
            SyncMessage::StateResponse {
                object_id,
                state_data,
                timestamp,
            } => json!({
                "object_id": object_id,
                "state_data": STANDARD.encode(state_data),
                "timestamp": timestamp.to_rfc3339(),
            }),
            SyncMessage::Operation {
                object_id,
                operation_data,
                timestamp,
            } => json!({
                "object_id": object_id,
                "operation_data": STANDARD.encode(operation_data),
                "timestamp": timestamp.to_rfc3339(),
            }),
        };
        Message::new(message_type, content)
    }

    /// Decode a network envelope.
    pub fn from_message(message: &Message) -> Result<Self> {
        let content: Content = serde_json::from_value(message.content.clone()).map_err(|e| {
            TelepathyError::InvalidMessage(format!("{}: {}", message.message_type, e))
        })?;

        match message.message_type.as_str() {
            STATE_REQUEST => Ok(SyncMessage::StateRequest {
                object_id: content.object_id,
                timestamp: content.timestamp,
            }),
            STATE_RESPONSE => Ok(SyncMessage::StateResponse {
                state_data: decode_bytes(content.state_data, "state_data")?,
                object_id: content.object_id,
                timestamp: content.timestamp,
            }),
            OPERATION => Ok(SyncMessage::Operation {
                operation_data: decode_bytes(content.operation_data, "operation_data")?,
                object_id: content.object_id,
                timestamp: content.timestamp,
            }),
            other => Err(TelepathyError::InvalidMessage(format!(
                "'{}' is not a sync message",
                other
            ))),
        }
    }
}

fn decode_bytes(field: Option<String>, name: &str) -> Result<Vec<u8>> {
    let encoded =
        field.ok_or_else(|| TelepathyError::InvalidMessage(format!("missing '{}'", name)))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| TelepathyError::InvalidMessage(format!("'{}' is not base64: {}", name, e)))
}
