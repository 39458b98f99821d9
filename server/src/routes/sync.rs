//! Sync endpoint routes.

use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use badger_engine::SyncHistoryEntry;

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers::{self, HistoryQuery, PullQuery, RunStarted};
use crate::AppState;

/// Create sync routes.
pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/sync/pull", post(pull_handler))
        .route("/sync/push", post(push_handler))
        .route("/sync/history", get(history_handler))
}

/// POST /sync/pull - Start a pull of every collection.
async fn pull_handler(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PullQuery>,
) -> Result<(StatusCode, Json<RunStarted>)> {
    let started = handlers::start_pull(&state, query, auth.initiator())?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// POST /sync/push - Start replaying pending changes.
async fn push_handler(
    State(state): State<AppState>,
    auth: AuthUser,
) -> Result<(StatusCode, Json<RunStarted>)> {
    let started = handlers::start_push(&state, auth.initiator())?;
    Ok((StatusCode::ACCEPTED, Json(started)))
}

/// GET /sync/history - Recent runs, newest first.
async fn history_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(query): Query<HistoryQuery>,
) -> Result<Json<Vec<SyncHistoryEntry>>> {
    Ok(Json(handlers::history(&state, query).await?))
}
