//! WebSocket message protocol definitions.
//!
//! All messages are JSON-encoded and use snake_case for field names.

use badger_engine::{Event, EventType};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Messages sent from client to server.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Keep-alive ping.
    Ping,
}

/// Messages sent from server to client.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMessage {
    /// A dispatched sync event.
    Event {
        event: EventType,
        source: String,
        payload: Value,
    },

    /// Response to ping.
    Pong,

    Error { message: String },
}

impl ServerMessage {
    pub fn error(message: impl Into<String>) -> Self {
        ServerMessage::Error {
            message: message.into(),
        }
    }
}

impl From<&Event> for ServerMessage {
    fn from(event: &Event) -> Self {
        ServerMessage::Event {
            event: event.event_type,
            source: event.source.clone(),
            payload: event.payload.clone(),
        }
    }
}
