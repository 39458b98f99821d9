//! Live event stream route.

use axum::{
    extract::{Query, State, WebSocketUpgrade},
    response::Response,
    routing::get,
    Router,
};
use serde::Deserialize;

use crate::auth::AuthUser;
use crate::handlers::handle_websocket_connection;
use crate::AppState;

#[derive(Debug, Deserialize)]
struct EventsQuery {
    /// Label for the connecting client, used in logs
    client: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/events", get(events_handler))
}

/// GET /events - Upgrade to a WebSocket streaming every sync event.
async fn events_handler(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<EventsQuery>,
) -> Response {
    let client = query.client.unwrap_or_else(|| "anonymous".to_string());
    let conn_manager = state.conn_manager.clone();
    ws.on_upgrade(move |socket| handle_websocket_connection(socket, conn_manager, client))
}
