//! Wire message definitions
//!
//! Every frame in either direction is a JSON envelope:
//! `{ "type": ..., "sessionId"?: ..., "timestamp": ..., "data": ... }`.
//! Inbound `data` is decoded into a typed payload for the message types the client
//! understands and kept as raw JSON for everything else.

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

/// Message type routed to the internal system handler instead of subscribers
pub const SYSTEM_MESSAGE_TYPE: &str = "system";

/// Keepalive message type
pub const HEARTBEAT_MESSAGE_TYPE: &str = "heartbeat";

// ============================================================================
// Error Types
// ============================================================================

/// Protocol-related errors
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("JSON serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Invalid message: {0}")]
    InvalidMessage(String),
}

/// Result type for protocol operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;

/// Current time as an ISO-8601 UTC timestamp with millisecond precision
pub fn now_timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Millis, true)
}

// ============================================================================
// Inbound Messages
// ============================================================================

/// Envelope exactly as it arrives on the wire
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RawEnvelope {
    #[serde(rename = "type")]
    event_type: String,
    #[serde(default)]
    session_id: Option<String>,
    #[serde(default)]
    timestamp: String,
    #[serde(default)]
    data: Value,
}

/// Notifications the server sends under the `system` message type
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "subtype", rename_all = "snake_case")]
pub enum SystemEvent {
    /// A server-side analysis run was started
    AnalysisStarted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },

    /// A server-side analysis run finished
    AnalysisCompleted {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },

    /// A server-side analysis run failed
    AnalysisError {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        topic: Option<String>,
    },

    /// The server announced maintenance
    ServerMaintenance {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// A subtype this client does not know yet
    #[serde(other)]
    Unknown,
}

/// Typed payload of an inbound message, keyed by the message type
#[derive(Debug, Clone, PartialEq)]
pub enum InboundPayload {
    /// `type == "system"`
    System(SystemEvent),
    /// Any other type, `data` left as raw JSON
    Json(Value),
}

/// A message received from the server
#[derive(Debug, Clone, PartialEq)]
pub struct InboundMessage {
    /// Value of the wire `type` field, used for subscriber routing
    pub event_type: String,
    pub session_id: Option<String>,
    pub timestamp: String,
    pub payload: InboundPayload,
}

impl InboundMessage {
    /// Parse a text frame into a message
    pub fn from_json(json: &str) -> ProtocolResult<Self> {
        let raw: RawEnvelope = serde_json::from_str(json)?;

        if raw.event_type.is_empty() {
            return Err(ProtocolError::InvalidMessage(
                "message type cannot be empty".to_string(),
            ));
        }

        let payload = if raw.event_type == SYSTEM_MESSAGE_TYPE {
            InboundPayload::System(serde_json::from_value(raw.data)?)
        } else {
            InboundPayload::Json(raw.data)
        };

        Ok(Self {
            event_type: raw.event_type,
            session_id: raw.session_id,
            timestamp: raw.timestamp,
            payload,
        })
    }

    /// Whether this message goes to the system handler
    pub fn is_system(&self) -> bool {
        matches!(self.payload, InboundPayload::System(_))
    }

    /// Raw JSON data for non-system messages
    pub fn data(&self) -> Option<&Value> {
        match &self.payload {
            InboundPayload::Json(value) => Some(value),
            InboundPayload::System(_) => None,
        }
    }
}

// ============================================================================
// Outbound Messages
// ============================================================================

/// A message built by the client before serialization
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OutboundEnvelope {
    #[serde(rename = "type")]
    pub event_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    pub timestamp: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl OutboundEnvelope {
    /// Create an envelope stamped with the current time
    pub fn new(event_type: impl Into<String>, data: Value) -> Self {
        Self {
            event_type: event_type.into(),
            session_id: None,
            timestamp: now_timestamp(),
            data: Some(data),
        }
    }

    /// Keepalive envelope, carries no `data` field
    pub fn heartbeat() -> Self {
        Self {
            event_type: HEARTBEAT_MESSAGE_TYPE.to_string(),
            session_id: None,
            timestamp: now_timestamp(),
            data: None,
        }
    }

    /// Attach a session ID
    pub fn with_session(mut self, session_id: impl Into<String>) -> Self {
        self.session_id = Some(session_id.into());
        self
    }

    /// Serialize the envelope to JSON
    pub fn to_json(&self) -> ProtocolResult<String> {
        Ok(serde_json::to_string(self)?)
    }
}
