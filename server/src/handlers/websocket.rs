//! WebSocket handler for the live event stream.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;

use crate::websocket::{ClientMessage, ConnectionManager, ServerMessage};

/// Handle an established WebSocket connection.
///
/// Registers the connection so dispatched events reach it, answers pings,
/// and unregisters once the client goes away.
pub async fn handle_websocket_connection(
    socket: WebSocket,
    conn_manager: Arc<ConnectionManager>,
    client: String,
) {
    let (mut ws_sender, mut ws_receiver) = socket.split();
    let (tx, mut rx) = mpsc::unbounded_channel::<ServerMessage>();

    let conn_id = conn_manager.register(client.clone(), tx);

    tracing::info!(conn_id = %conn_id, client = %client, "WebSocket client connected");

    // Forward messages from the channel to the socket
    let send_task = tokio::spawn(async move {
        while let Some(msg) = rx.recv().await {
            match serde_json::to_string(&msg) {
                Ok(text) => {
                    if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                        tracing::warn!("Failed to send WebSocket message: {}", e);
                        break;
                    }
                }
                Err(e) => {
                    tracing::error!("Failed to serialize WebSocket message: {}", e);
                }
            }
        }
    });

    while let Some(result) = ws_receiver.next().await {
        match result {
            Ok(Message::Text(text)) => {
                conn_manager.send_to(&conn_id, process_message(&text));
            }
            Ok(Message::Binary(_)) => {
                conn_manager.send_to(&conn_id, ServerMessage::error("Binary messages not supported"));
            }
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Ok(Message::Close(_)) => {
                tracing::info!(conn_id = %conn_id, "WebSocket close frame received");
                break;
            }
            Err(e) => {
                tracing::warn!(conn_id = %conn_id, "WebSocket error: {}", e);
                break;
            }
        }
    }

    conn_manager.unregister(&conn_id);
    send_task.abort();

    tracing::info!(
        conn_id = %conn_id,
        active_connections = conn_manager.connection_count(),
        "WebSocket client disconnected"
    );
}

/// Process a client message and return the reply.
fn process_message(text: &str) -> ServerMessage {
    match serde_json::from_str::<ClientMessage>(text) {
        Ok(ClientMessage::Ping) => ServerMessage::Pong,
        Err(e) => ServerMessage::error(format!("Invalid message format: {}", e)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_to_client_frames() {
        assert!(matches!(process_message(r#"{"type":"ping"}"#), ServerMessage::Pong));
        match process_message("not json") {
            ServerMessage::Error { message } => assert!(message.starts_with("Invalid message format")),
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
