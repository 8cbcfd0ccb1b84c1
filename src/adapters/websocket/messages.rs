//! WebSocket message types for the realtime protocol.
//!
//! Defines the protocol between server and connected clients:
//! - Client → Server: subscribe, unsubscribe, ping
//! - Server → Client: connected, acks, pong, heartbeat, events, errors
//!
//! All frames are JSON text with a `type` discriminator.

use serde::Serialize;
use serde_json::Value as JsonValue;

use crate::domain::foundation::{ConnectionId, Timestamp};
use crate::domain::realtime::{ConnectionContext, RealtimeEvent, Topic};

// ============================================
// Client → Server Messages
// ============================================

/// All message types that can be received from a client.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientMessage {
    /// Start receiving events for a topic.
    Subscribe(Topic),

    /// Stop receiving events for a topic.
    Unsubscribe(Topic),

    /// Application-level heartbeat.
    Ping,
}

/// Reasons a client frame could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ProtocolError {
    #[error("Invalid JSON: {0}")]
    InvalidJson(String),

    #[error("Message must be a JSON object with a string 'type' field")]
    MissingType,

    #[error("Unknown message type: {0}")]
    UnknownType(String),

    #[error("Missing 'channel' field")]
    MissingChannel,

    #[error("Invalid channel: {0}")]
    InvalidChannel(String),

    #[error("Binary frames are not supported")]
    BinaryFrame,
}

impl ClientMessage {
    /// Decodes one text frame.
    pub fn parse(text: &str) -> Result<Self, ProtocolError> {
        let value: JsonValue =
            serde_json::from_str(text).map_err(|e| ProtocolError::InvalidJson(e.to_string()))?;

        let message_type = value
            .get("type")
            .and_then(JsonValue::as_str)
            .ok_or(ProtocolError::MissingType)?;

        match message_type {
            "subscribe" => Ok(ClientMessage::Subscribe(channel_of(&value)?)),
            "unsubscribe" => Ok(ClientMessage::Unsubscribe(channel_of(&value)?)),
            "ping" => Ok(ClientMessage::Ping),
            other => Err(ProtocolError::UnknownType(other.to_string())),
        }
    }
}

fn channel_of(value: &JsonValue) -> Result<Topic, ProtocolError> {
    let channel = match value.get("channel") {
        None | Some(JsonValue::Null) => return Err(ProtocolError::MissingChannel),
        Some(JsonValue::String(s)) => s,
        Some(_) => {
            return Err(ProtocolError::InvalidChannel(
                "channel must be a string".to_string(),
            ))
        }
    };
    Topic::new(channel.as_str()).map_err(|e| ProtocolError::InvalidChannel(e.to_string()))
}

// ============================================
// Server → Client Messages
// ============================================

/// All message types that can be sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// Handshake accepted and connection registered.
    Connected { data: ConnectedData },

    /// Subscription acknowledged.
    Subscribed { data: ChannelData },

    /// Unsubscription acknowledged.
    Unsubscribed { data: ChannelData },

    /// Reply to a client ping.
    Pong { data: TimestampData },

    /// Unsolicited keepalive.
    Heartbeat { data: TimestampData },

    /// A delivered domain event.
    Event { event: RealtimeEvent },

    /// The client's last frame was rejected.
    Error { data: ErrorData },
}

#[derive(Debug, Clone, Serialize)]
pub struct ConnectedData {
    pub client_id: ConnectionId,
    pub user_id: String,
    pub organization_id: Option<String>,
    pub workspace_id: Option<String>,
    pub connected_at: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChannelData {
    pub channel: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct TimestampData {
    pub timestamp: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct ErrorData {
    pub error: String,
}

impl ServerMessage {
    pub fn connected(id: ConnectionId, context: &ConnectionContext, connected_at: Timestamp) -> Self {
        ServerMessage::Connected {
            data: ConnectedData {
                client_id: id,
                user_id: context.user_id.to_string(),
                organization_id: context.organization_id.as_ref().map(|o| o.to_string()),
                workspace_id: context.workspace_id.as_ref().map(|w| w.to_string()),
                connected_at: connected_at.to_rfc3339(),
            },
        }
    }

    pub fn subscribed(topic: &Topic) -> Self {
        ServerMessage::Subscribed {
            data: ChannelData {
                channel: topic.to_string(),
            },
        }
    }

    pub fn unsubscribed(topic: &Topic) -> Self {
        ServerMessage::Unsubscribed {
            data: ChannelData {
                channel: topic.to_string(),
            },
        }
    }

    pub fn pong() -> Self {
        ServerMessage::Pong {
            data: TimestampData {
                timestamp: Timestamp::now().to_rfc3339(),
            },
        }
    }

    pub fn heartbeat() -> Self {
        ServerMessage::Heartbeat {
            data: TimestampData {
                timestamp: Timestamp::now().to_rfc3339(),
            },
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            data: ErrorData {
                error: message.into(),
            },
        }
    }

    /// Serializes to a JSON text frame.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Serializes an `event` frame without cloning the event.
    ///
    /// Produces the same JSON as `ServerMessage::Event { event }.to_json()`.
    pub fn encode_event(event: &RealtimeEvent) -> Result<String, serde_json::Error> {
        #[derive(Serialize)]
        struct EventFrame<'a> {
            #[serde(rename = "type")]
            kind: &'static str,
            event: &'a RealtimeEvent,
        }

        serde_json::to_string(&EventFrame {
            kind: "event",
            event,
        })
    }
}
