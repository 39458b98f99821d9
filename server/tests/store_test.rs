//! SQL store tests against an in-memory SQLite database.

mod common;

use std::sync::Arc;

use badger_engine::store::{query_command, run_command, update_configuration};
use badger_engine::{
    Direction, Entity, EventDispatcher, NoProgress, RunRequest, RunStatus, SqlValue, Store,
    StoreError, SyncConfig, SyncCoordinator,
};
use common::{memory_store, StubApi};
use serde_json::json;

async fn one_text(store: &dyn Store, sql: &str, args: &[SqlValue]) -> String {
    let rows = store.fetch(sql, args).await.unwrap();
    assert_eq!(rows.len(), 1, "expected exactly one row for {sql}");
    let value = rows[0].get("v").cloned().unwrap_or(SqlValue::Null);
    value.as_text().unwrap_or_default()
}

async fn count(store: &dyn Store, table: &str) -> i64 {
    let rows = store
        .fetch(&format!("SELECT COUNT(*) AS n FROM {table}"), &[])
        .await
        .unwrap();
    rows[0].i64("n").unwrap()
}

fn coordinator(api: StubApi, store: Arc<dyn Store>) -> SyncCoordinator {
    SyncCoordinator::new(Arc::new(api), store, &SyncConfig::default(), EventDispatcher::new())
}

#[tokio::test]
async fn merge_inserts_then_updates() {
    let store = memory_store().await;
    let first = json!({ "id": 7, "full_name": "Ada Lovelace", "custom_text1": "vip" });
    let second = json!({ "id": 7, "full_name": "Ada King", "days_since_last_checkin": 3 });

    for record in [&first, &second] {
        let args = Entity::Accounts.merge_args(record);
        run_command(store.as_ref(), Entity::Accounts.merge_command(), &args)
            .await
            .unwrap();
    }

    assert_eq!(count(store.as_ref(), "Accounts").await, 1);
    let name = one_text(
        store.as_ref(),
        "SELECT FullName AS v FROM Accounts WHERE Id = ?",
        &[SqlValue::Int(7)],
    )
    .await;
    assert_eq!(name, "Ada King");
    let days = one_text(
        store.as_ref(),
        "SELECT DaysSinceLastCheckin AS v FROM Accounts WHERE Id = ?",
        &[SqlValue::Int(7)],
    )
    .await;
    assert_eq!(days, "3");
}

#[tokio::test]
async fn configuration_is_upserted() {
    let store = memory_store().await;
    update_configuration(store.as_ref(), "CompanyName", "Navy").await.unwrap();
    update_configuration(store.as_ref(), "CompanyName", "Army").await.unwrap();

    assert_eq!(count(store.as_ref(), "Configurations").await, 1);
    let value = one_text(
        store.as_ref(),
        "SELECT Value AS v FROM Configurations WHERE Name = ?",
        &["CompanyName".into()],
    )
    .await;
    assert_eq!(value, "Army");
}

#[tokio::test]
async fn unknown_command_is_reported() {
    let store = memory_store().await;
    let err = run_command(store.as_ref(), "DropEverything", &[]).await.unwrap_err();
    assert_eq!(err, StoreError::UnknownCommand("DropEverything".into()));

    let err = store.fetch("SELECT * FROM Nowhere", &[]).await.unwrap_err();
    assert!(matches!(err, StoreError::Backend(_)));
}

#[tokio::test]
async fn insert_returning_id_yields_generated_keys() {
    let store = memory_store().await;
    let sql = "INSERT INTO AccountsPendingChanges (AccountId, ChangeType, Changes) VALUES (?, ?, ?)";
    let first = store
        .insert_returning_id(sql, &[SqlValue::Int(1), "UPDATE".into(), "{}".into()])
        .await
        .unwrap();
    let second = store
        .insert_returning_id(sql, &[SqlValue::Int(2), "DELETE".into(), SqlValue::Null])
        .await
        .unwrap();
    assert!(second > first);

    let pending = query_command(store.as_ref(), "GetPendingAccountChanges", &[])
        .await
        .unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].i64("EntityId").unwrap(), 1);
    assert_eq!(pending[1].text("ChangeType").unwrap(), "DELETE");
}

#[tokio::test]
async fn full_pull_fills_every_table_and_records_history() {
    let store = memory_store().await;
    let mut api = StubApi::with_accounts(3);
    api.checkins.insert(
        1,
        vec![
            json!({ "id": 11, "customer": 1, "type": "visit", "comments": "first" }),
            json!({ "id": 12, "customer": 1, "type": "call" }),
        ],
    );
    api.routes = vec![
        json!({ "id": 21, "name": "North loop" }),
        json!({ "id": null, "name": "draft" }),
    ];
    api.profile = json!({
        "id": 9,
        "email": "grace@example.com",
        "first_name": "Grace",
        "last_name": "Hopper",
        "company": { "id": 3, "name": "Navy" },
        "datafields": [
            { "name": "tier", "position": 2, "values": [
                { "text": "Gold", "value": 1 },
                { "text": "Silver", "value": 2 }
            ]},
            { "name": "notes", "position": 5 }
        ]
    });

    let engine_store: Arc<dyn Store> = store.clone();
    let coordinator = coordinator(api, Arc::clone(&engine_store));
    let request = RunRequest::new("test");
    let entry = coordinator
        .run_pull_all(&request, 0, &NoProgress)
        .await
        .unwrap();

    assert_eq!(entry.status, RunStatus::Completed);
    assert_eq!(entry.direction, Direction::Pull);
    assert_eq!(entry.error_count, 0);
    assert_eq!(count(store.as_ref(), "Accounts").await, 3);
    assert_eq!(count(store.as_ref(), "AccountCheckins").await, 2);
    assert_eq!(count(store.as_ref(), "Routes").await, 1);
    assert_eq!(count(store.as_ref(), "UserProfiles").await, 1);
    assert_eq!(count(store.as_ref(), "DataSets").await, 2);
    assert_eq!(count(store.as_ref(), "DataSetValues").await, 2);

    let company = one_text(
        store.as_ref(),
        "SELECT Value AS v FROM Configurations WHERE Name = ?",
        &["CompanyName".into()],
    )
    .await;
    assert_eq!(company, "Navy");

    let history = coordinator.history(10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].correlation_id, request.correlation_id);
    assert_eq!(history[0].status, RunStatus::Completed);
    assert_eq!(history[0].initiator, "test");
    assert!(history[0].completed_at.is_some());
}

#[tokio::test]
async fn pulling_again_replaces_profile_datasets() {
    let store = memory_store().await;
    let engine_store: Arc<dyn Store> = store.clone();

    let mut api = StubApi::default();
    api.profile = json!({
        "id": 9,
        "datafields": [{ "name": "tier", "position": 1, "values": [{ "text": "Gold", "value": 1 }] }]
    });
    let first = coordinator(api, Arc::clone(&engine_store));
    first.pull().pull_profile(&NoProgress).await.unwrap();

    let mut api = StubApi::default();
    api.profile = json!({ "id": 9, "datafields": [] });
    let second = coordinator(api, Arc::clone(&engine_store));
    second.pull().pull_profile(&NoProgress).await.unwrap();

    assert_eq!(count(store.as_ref(), "UserProfiles").await, 1);
    assert_eq!(count(store.as_ref(), "DataSets").await, 0);
    assert_eq!(count(store.as_ref(), "DataSetValues").await, 0);
}

#[tokio::test]
async fn push_marks_every_change_terminal() {
    let store = memory_store().await;
    let insert = "INSERT INTO AccountsPendingChanges (AccountId, ChangeType, Changes) VALUES (?, ?, ?)";
    store
        .execute(insert, &[SqlValue::Int(1), "UPDATE".into(), r#"{"notes":"called"}"#.into()])
        .await
        .unwrap();
    store
        .execute(insert, &[SqlValue::Int(2), "DELETE".into(), SqlValue::Null])
        .await
        .unwrap();
    store
        .execute(
            "INSERT INTO AccountCheckinsPendingChanges (CheckinId, ChangeType, Changes) VALUES (?, ?, ?)",
            &[SqlValue::Null, "CREATE".into(), r#"{"customer":"1","type":"visit"}"#.into()],
        )
        .await
        .unwrap();

    let mut api = StubApi::default();
    api.fail_mutation_for = vec![2];
    let engine_store: Arc<dyn Store> = store.clone();
    let coordinator = coordinator(api, Arc::clone(&engine_store));
    let entry = coordinator
        .run_push_all(&RunRequest::new("test"), &NoProgress)
        .await
        .unwrap();

    assert_eq!(entry.status, RunStatus::Completed);
    assert_eq!(entry.items_processed, 2);
    assert_eq!(entry.error_count, 1);

    let rows = query_command(store.as_ref(), "ListAccountPendingChanges", &[])
        .await
        .unwrap();
    let statuses: Vec<String> = rows.iter().map(|r| r.text("Status").unwrap()).collect();
    assert_eq!(statuses, vec!["completed", "failed"]);
    assert!(rows.iter().all(|r| r.opt_text("ProcessedAt").is_some()));

    let checkins = query_command(store.as_ref(), "ListCheckinPendingChanges", &[])
        .await
        .unwrap();
    assert_eq!(checkins[0].text("Status").unwrap(), "completed");

    // Nothing is left for the next run.
    let pending = query_command(store.as_ref(), "GetPendingAccountChanges", &[])
        .await
        .unwrap();
    assert!(pending.is_empty());
}

#[tokio::test]
async fn history_is_newest_first_and_limited() {
    let store = memory_store().await;
    let engine_store: Arc<dyn Store> = store.clone();
    let coordinator = coordinator(StubApi::default(), engine_store);

    let mut ids = Vec::new();
    for _ in 0..3 {
        let request = RunRequest::new("test");
        coordinator.run_push_all(&request, &NoProgress).await.unwrap();
        ids.push(request.correlation_id);
    }

    let history = coordinator.history(2).await.unwrap();
    assert_eq!(history.len(), 2);
    assert_eq!(history[0].correlation_id, ids[2]);
    assert_eq!(history[1].correlation_id, ids[1]);
    assert!(history.iter().all(|h| h.direction == Direction::Push));
}
