//! Audit log routes.

use axum::{
    extract::{Query, State},
    routing::get,
    Json, Router,
};
use badger_engine::{AuditEntry, AuditFilters};

use crate::auth::AuthUser;
use crate::error::Result;
use crate::handlers;
use crate::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/audit", get(audit_handler))
}

/// GET /audit - Query the audit trail.
///
/// Accepts `start`, `end` (RFC 3339), `operation_type`, `level`, `success`,
/// `user`, `resource` and `limit`.
async fn audit_handler(
    State(state): State<AppState>,
    _auth: AuthUser,
    Query(filters): Query<AuditFilters>,
) -> Result<Json<Vec<AuditEntry>>> {
    Ok(Json(handlers::query_audit(&state, filters).await?))
}
