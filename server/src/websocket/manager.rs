//! WebSocket connection manager.
//!
//! Tracks active event-stream connections and fans dispatched events out to
//! all of them.

use std::sync::Arc;

use badger_engine::EventDispatcher;
use dashmap::DashMap;
use tokio::sync::mpsc;

use super::ServerMessage;

/// Sender for WebSocket messages.
pub type MessageSender = mpsc::UnboundedSender<ServerMessage>;

/// A single WebSocket connection.
#[derive(Debug)]
pub struct Connection {
    pub id: String,
    /// Caller-supplied label, for logs
    pub client: String,
    pub sender: MessageSender,
}

/// Manages active WebSocket connections.
///
/// Thread-safe and can be shared across handlers via `Arc`.
#[derive(Debug, Default)]
pub struct ConnectionManager {
    connections: DashMap<String, Connection>,
}

impl ConnectionManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn new_shared() -> Arc<Self> {
        Arc::new(Self::new())
    }

    /// Forward every event the dispatcher delivers to the connected clients.
    pub fn attach(self: &Arc<Self>, events: &EventDispatcher) {
        let manager = Arc::clone(self);
        events.subscribe_all(move |event| {
            if manager.connection_count() > 0 {
                manager.broadcast_all(ServerMessage::from(event));
            }
        });
    }

    /// Register a new connection and return its id.
    pub fn register(&self, client: String, sender: MessageSender) -> String {
        let conn_id = uuid::Uuid::new_v4().to_string();

        self.connections.insert(
            conn_id.clone(),
            Connection {
                id: conn_id.clone(),
                client,
                sender,
            },
        );

        tracing::info!(conn_id = %conn_id, "WebSocket connection registered");

        conn_id
    }

    pub fn unregister(&self, conn_id: &str) {
        if let Some((_, conn)) = self.connections.remove(conn_id) {
            tracing::info!(conn_id = %conn_id, client = %conn.client, "WebSocket connection unregistered");
        }
    }

    /// Broadcast a message to all connections.
    ///
    /// Returns the number of connections that received the message.
    pub fn broadcast_all(&self, message: ServerMessage) -> usize {
        let mut sent_count = 0;
        let mut closed = Vec::new();

        for entry in self.connections.iter() {
            if entry.value().sender.send(message.clone()).is_ok() {
                sent_count += 1;
            } else {
                closed.push(entry.key().clone());
            }
        }

        for conn_id in closed {
            self.unregister(&conn_id);
        }

        sent_count
    }

    /// Send a message to a specific connection.
    pub fn send_to(&self, conn_id: &str, message: ServerMessage) -> bool {
        self.connections
            .get(conn_id)
            .is_some_and(|conn| conn.sender.send(message).is_ok())
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
