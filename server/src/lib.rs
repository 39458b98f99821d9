//! # Badger Server
//!
//! Concrete collaborators for `badger-engine`: SQL stores for SQLite,
//! PostgreSQL and MySQL, the remote API client, and an HTTP/WebSocket surface
//! for triggering runs and watching them.

pub mod agent;
pub mod api;
pub mod auth;
pub mod config;
pub mod db;
pub mod error;
pub mod handlers;
pub mod progress;
pub mod routes;
pub mod websocket;

use std::sync::Arc;

use axum::Router;
use badger_engine::{AuditLogger, SyncCoordinator};
use tokio::sync::Mutex;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

pub use agent::Agent;
pub use config::Config;
pub use error::AppError;
use websocket::ConnectionManager;

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub coordinator: Arc<SyncCoordinator>,
    pub audit: AuditLogger,
    pub conn_manager: Arc<ConnectionManager>,
    /// Held for the duration of a background sync run
    pub run_lock: Arc<Mutex<()>>,
}

impl AppState {
    /// State for an agent, with its events streamed to WebSocket clients.
    pub fn new(agent: &Agent) -> Self {
        let conn_manager = ConnectionManager::new_shared();
        conn_manager.attach(agent.coordinator.events());
        Self {
            config: Arc::clone(&agent.config),
            coordinator: Arc::clone(&agent.coordinator),
            audit: agent.audit.clone(),
            conn_manager,
            run_lock: Arc::new(Mutex::new(())),
        }
    }
}

/// The full router with tracing and CORS layers.
pub fn app(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .merge(routes::create_routes())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}
