//! HTTP surface tests driving the router in-process.

mod common;

use std::path::Path;
use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{header, Request, StatusCode};
use axum::Router;
use badger_engine::{
    AuditConfig, AuditEntry, AuditLogger, Dialect, Direction, OperationType, RunStatus, Store,
    SyncHistoryEntry,
};
use badger_server::handlers::RunStarted;
use badger_server::routes::HealthResponse;
use badger_server::{app, Agent, AppState, Config};
use common::{eventually, memory_store, StubApi};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tempfile::TempDir;
use tower::ServiceExt;

fn config(dir: &Path, auth_secret: Option<&str>) -> Config {
    Config {
        db_type: Dialect::Sqlite,
        database_url: "sqlite::memory:".into(),
        api_url: "http://127.0.0.1:1/api".into(),
        api_key: "k".into(),
        host: "127.0.0.1".into(),
        port: 0,
        auth_secret: auth_secret.map(str::to_string),
        sync_config: dir.join("badger-sync.json"),
        audit_log: dir.join("audit.log"),
        audit_enabled: true,
    }
}

async fn router(dir: &TempDir, auth_secret: Option<&str>, api: StubApi) -> (Router, Agent) {
    let config = config(dir.path(), auth_secret);
    let audit = AuditLogger::open(AuditConfig::new(&config.audit_log)).unwrap();
    let agent = Agent::assemble(config, memory_store().await, Arc::new(api), audit).unwrap();
    (app(AppState::new(&agent)), agent)
}

async fn call(app: &Router, method: &str, uri: &str, token: Option<&str>) -> (StatusCode, Vec<u8>) {
    let mut request = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        request = request.header(header::AUTHORIZATION, format!("Bearer {token}"));
    }
    let response = app
        .clone()
        .oneshot(request.body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    (status, body.to_vec())
}

fn parse<T: DeserializeOwned>(body: &[u8]) -> T {
    serde_json::from_slice(body).unwrap()
}

async fn history(app: &Router) -> Vec<SyncHistoryEntry> {
    let (status, body) = call(app, "GET", "/sync/history?limit=10", None).await;
    assert_eq!(status, StatusCode::OK);
    parse(&body)
}

#[tokio::test]
async fn health_reports_dialect_and_clients() {
    let dir = TempDir::new().unwrap();
    let (app, _agent) = router(&dir, None, StubApi::default()).await;

    let (status, body) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    let health: HealthResponse = parse(&body);
    assert_eq!(health.status, "ok");
    assert_eq!(health.database, "sqlite");
    assert_eq!(health.event_clients, 0);

    let (status, body) = call(&app, "GET", "/", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, b"Badger Sync Agent");
}

#[tokio::test]
async fn protected_routes_need_the_secret() {
    let dir = TempDir::new().unwrap();
    let (app, _agent) = router(&dir, Some("s3cret"), StubApi::default()).await;

    let (status, _) = call(&app, "GET", "/sync/history", None).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/sync/history", Some("wrong")).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);

    let (status, _) = call(&app, "GET", "/sync/history", Some("s3cret")).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = call(&app, "GET", "/audit?token=s3cret", None).await;
    assert_eq!(status, StatusCode::OK);

    // Health stays open for probes.
    let (status, _) = call(&app, "GET", "/health", None).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn pull_runs_in_the_background_and_lands_in_history() {
    let dir = TempDir::new().unwrap();
    let mut api = StubApi::with_accounts(2);
    api.profile = serde_json::json!({ "id": 9, "email": "grace@example.com" });
    let (app, agent) = router(&dir, None, api).await;

    let (status, body) = call(&app, "POST", "/sync/pull?top=1", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let started: RunStarted = parse(&body);
    assert_eq!(started.direction, Direction::Pull);

    let finished = eventually(|| {
        let app = app.clone();
        let id = started.correlation_id.clone();
        async move {
            history(&app)
                .await
                .iter()
                .any(|h| h.correlation_id == id && h.status == RunStatus::Completed)
        }
    })
    .await;
    assert!(finished, "pull run never completed");

    let entries = history(&app).await;
    let run = entries
        .iter()
        .find(|h| h.correlation_id == started.correlation_id)
        .unwrap();
    assert_eq!(run.initiator, "http");
    // One account plus the profile.
    assert_eq!(run.items_processed, 2);

    let accounts = agent
        .store
        .fetch("SELECT Id FROM Accounts", &[])
        .await
        .unwrap();
    assert_eq!(accounts.len(), 1);
}

#[tokio::test]
async fn concurrent_runs_are_rejected() {
    let dir = TempDir::new().unwrap();
    let (app, _agent) = router(&dir, None, StubApi::default()).await;

    let (status, _) = call(&app, "POST", "/sync/push", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);

    // The first push may already be done. A refusal carries the error body.
    let (status, body) = call(&app, "POST", "/sync/push", None).await;
    if status == StatusCode::CONFLICT {
        let error: Value = parse(&body);
        assert_eq!(error["error"], "a sync run is already in progress");
    } else {
        assert_eq!(status, StatusCode::ACCEPTED);
    }
}

#[tokio::test]
async fn audit_lists_sync_runs_with_filters() {
    let dir = TempDir::new().unwrap();
    let (app, _agent) = router(&dir, None, StubApi::default()).await;

    let (status, body) = call(&app, "POST", "/sync/push", None).await;
    assert_eq!(status, StatusCode::ACCEPTED);
    let started: RunStarted = parse(&body);

    let logged = eventually(|| {
        let app = app.clone();
        async move {
            let (_, body) = call(&app, "GET", "/audit?operation_type=SYNC_PUSH", None).await;
            !parse::<Vec<AuditEntry>>(&body).is_empty()
        }
    })
    .await;
    assert!(logged, "push run was never audited");

    let (status, body) = call(&app, "GET", "/audit?operation_type=SYNC_PUSH&limit=1", None).await;
    assert_eq!(status, StatusCode::OK);
    let entries: Vec<AuditEntry> = parse(&body);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].operation_type, OperationType::SyncPush);
    assert_eq!(entries[0].resource_id.as_deref(), Some(started.correlation_id.as_str()));

    let (status, body) = call(&app, "GET", "/audit?operation_type=BACKUP", None).await;
    assert_eq!(status, StatusCode::OK);
    assert!(parse::<Vec<AuditEntry>>(&body).is_empty());
}

#[tokio::test]
async fn audit_rejects_an_inverted_window() {
    let dir = TempDir::new().unwrap();
    let (app, _agent) = router(&dir, None, StubApi::default()).await;

    let uri = "/audit?start=2026-02-01T00:00:00Z&end=2026-01-01T00:00:00Z";
    let (status, body) = call(&app, "GET", uri, None).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    let error: Value = parse(&body);
    assert_eq!(error["error"], "start must not be after end");
}
