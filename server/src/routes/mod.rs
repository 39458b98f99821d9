//! HTTP route definitions.

mod audit;
mod events;
mod health;
mod sync;

pub use health::HealthResponse;

use crate::AppState;
use axum::Router;

/// Create all application routes.
pub fn create_routes() -> Router<AppState> {
    Router::new()
        .merge(health::routes())
        .merge(sync::routes())
        .merge(audit::routes())
        .merge(events::routes())
}
