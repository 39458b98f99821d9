//! In-memory collaborators for engine integration tests.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use badger_engine::error::{ApiResult, StoreResult};
use badger_engine::store::format_timestamp;
use badger_engine::{
    ApiError, Dialect, Entity, Event, EventDispatcher, FieldMap, Record, RemoteApi, Row, SqlValue,
    Store, StoreError,
};
use chrono::Utc;
use parking_lot::Mutex;
use serde_json::{json, Value};

// ============================================================================
// Store
// ============================================================================

const COMMANDS: &[&str] = &[
    "MergeAccountsDetailed",
    "MergeAccountCheckins",
    "MergeRoutes",
    "MergeUserProfiles",
    "UpdateConfiguration",
    "DeleteDataSetValues",
    "DeleteDataSets",
    "InsertDataSets",
    "InsertDataSetValues",
    "GetPendingAccountChanges",
    "GetPendingCheckinChanges",
    "ListAccountPendingChanges",
    "ListCheckinPendingChanges",
    "UpdateAccountPendingChangeStatus",
    "UpdateCheckinPendingChangeStatus",
    "InsertSyncHistory",
    "UpdateSyncHistoryMetrics",
    "CompleteSyncHistory",
    "GetRecentSyncHistory",
];

#[derive(Default)]
pub struct Tables {
    /// Merged rows per merge command, keyed by the record id.
    pub merged: HashMap<String, BTreeMap<i64, Vec<SqlValue>>>,
    pub merge_calls: usize,
    pub config: BTreeMap<String, String>,
    pub datasets: Vec<Vec<SqlValue>>,
    pub dataset_values: Vec<Vec<SqlValue>>,
    pub account_changes: Vec<Row>,
    pub checkin_changes: Vec<Row>,
    /// `(change_id, status)` in the order status updates were written.
    pub transitions: Vec<(i64, String)>,
    pub history: Vec<Row>,
    pub executed: Vec<String>,
}

/// A [`Store`] whose "SQL" for each command is the command name itself.
pub struct MemoryStore {
    catalog: HashMap<String, String>,
    pub tables: Mutex<Tables>,
    failing_ids: Mutex<HashSet<(String, i64)>>,
    failing_commands: Mutex<HashSet<String>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self {
            catalog: COMMANDS
                .iter()
                .map(|c| (c.to_string(), c.to_string()))
                .collect(),
            tables: Mutex::new(Tables::default()),
            failing_ids: Mutex::new(HashSet::new()),
            failing_commands: Mutex::new(HashSet::new()),
        }
    }

    /// Drop a command from the catalog so lookups report it as unsupported.
    pub fn without(mut self, command: &str) -> Self {
        self.catalog.remove(command);
        self
    }

    /// Make `command` fail whenever its first argument is `id`.
    pub fn fail_for(&self, command: &str, id: i64) {
        self.failing_ids.lock().insert((command.to_string(), id));
    }

    /// Make every call of `command` fail.
    pub fn fail_command(&self, command: &str) {
        self.failing_commands.lock().insert(command.to_string());
    }

    pub fn merged(&self, command: &str) -> BTreeMap<i64, Vec<SqlValue>> {
        self.tables
            .lock()
            .merged
            .get(command)
            .cloned()
            .unwrap_or_default()
    }

    pub fn config_value(&self, key: &str) -> Option<String> {
        self.tables.lock().config.get(key).cloned()
    }

    /// Queue a ledger row.
    pub fn add_change(&self, checkin: bool, change_id: i64, entity_id: i64, kind: &str, changes: Value) {
        self.add_change_with_status(checkin, change_id, entity_id, kind, &changes.to_string(), "pending");
    }

    pub fn add_change_with_status(
        &self,
        checkin: bool,
        change_id: i64,
        entity_id: i64,
        kind: &str,
        changes: &str,
        status: &str,
    ) {
        let row = Row::new()
            .with("ChangeId", change_id)
            .with("EntityId", entity_id)
            .with("ChangeType", kind)
            .with("Changes", changes)
            .with("Status", status)
            .with("CreatedAt", format_timestamp(Utc::now()))
            .with("ProcessedAt", SqlValue::Null);
        let mut tables = self.tables.lock();
        if checkin {
            tables.checkin_changes.push(row);
        } else {
            tables.account_changes.push(row);
        }
    }

    pub fn change_status(&self, checkin: bool, change_id: i64) -> Option<String> {
        let tables = self.tables.lock();
        let ledger = if checkin {
            &tables.checkin_changes
        } else {
            &tables.account_changes
        };
        ledger
            .iter()
            .find(|r| r.opt_i64("ChangeId") == Some(change_id))
            .and_then(|r| r.opt_text("Status"))
    }

    fn check(&self, command: &str, args: &[SqlValue]) -> StoreResult<()> {
        if self.failing_commands.lock().contains(command) {
            return Err(StoreError::Backend(format!("{command} failed")));
        }
        if let Some(id) = args.first().and_then(SqlValue::as_i64) {
            if self.failing_ids.lock().contains(&(command.to_string(), id)) {
                return Err(StoreError::Backend(format!("{command} failed for {id}")));
            }
        }
        Ok(())
    }
}

fn text(args: &[SqlValue], i: usize) -> String {
    args.get(i).and_then(SqlValue::as_text).unwrap_or_default()
}

fn int(args: &[SqlValue], i: usize) -> i64 {
    args.get(i).and_then(SqlValue::as_i64).unwrap_or_default()
}

#[async_trait]
impl Store for MemoryStore {
    fn dialect(&self) -> Dialect {
        Dialect::Sqlite
    }

    fn sql(&self, command: &str) -> Option<&str> {
        self.catalog.get(command).map(String::as_str)
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> StoreResult<u64> {
        self.check(sql, args)?;
        let mut tables = self.tables.lock();
        tables.executed.push(sql.to_string());
        match sql {
            "MergeAccountsDetailed" | "MergeAccountCheckins" | "MergeRoutes" | "MergeUserProfiles" => {
                let id = args
                    .first()
                    .and_then(SqlValue::as_i64)
                    .ok_or_else(|| StoreError::Backend("merge without id".into()))?;
                tables.merge_calls += 1;
                tables
                    .merged
                    .entry(sql.to_string())
                    .or_default()
                    .insert(id, args.to_vec());
            }
            "UpdateConfiguration" => {
                tables.config.insert(text(args, 0), text(args, 1));
            }
            "DeleteDataSetValues" => {
                let profile = args.first().cloned();
                tables.dataset_values.retain(|r| r.get(1).cloned() != profile);
            }
            "DeleteDataSets" => {
                let profile = args.first().cloned();
                tables.datasets.retain(|r| r.get(1).cloned() != profile);
            }
            "InsertDataSets" => tables.datasets.push(args.to_vec()),
            "InsertDataSetValues" => tables.dataset_values.push(args.to_vec()),
            "UpdateAccountPendingChangeStatus" | "UpdateCheckinPendingChangeStatus" => {
                let change_id = int(args, 2);
                let status = text(args, 0);
                let processed_at = args.get(1).cloned().unwrap_or(SqlValue::Null);
                let ledger = if sql.starts_with("UpdateAccount") {
                    &mut tables.account_changes
                } else {
                    &mut tables.checkin_changes
                };
                let row = ledger
                    .iter_mut()
                    .find(|r| r.opt_i64("ChangeId") == Some(change_id))
                    .ok_or_else(|| StoreError::Backend(format!("no change {change_id}")))?;
                row.insert("Status", status.as_str());
                row.insert("ProcessedAt", processed_at);
                tables.transitions.push((change_id, status));
            }
            "UpdateSyncHistoryMetrics" => {
                let correlation = text(args, 2);
                if let Some(row) = tables
                    .history
                    .iter_mut()
                    .find(|r| r.opt_text("CorrelationId").as_deref() == Some(correlation.as_str()))
                {
                    row.insert("ItemsProcessed", int(args, 0));
                    row.insert("Summary", text(args, 1));
                }
            }
            "CompleteSyncHistory" => {
                let correlation = text(args, 7);
                if let Some(row) = tables
                    .history
                    .iter_mut()
                    .find(|r| r.opt_text("CorrelationId").as_deref() == Some(correlation.as_str()))
                {
                    row.insert("Status", text(args, 0));
                    row.insert("ItemsProcessed", int(args, 1));
                    row.insert("ErrorCount", int(args, 2));
                    row.insert("CompletedAt", text(args, 3));
                    row.insert("DurationSeconds", int(args, 4));
                    row.insert("Summary", text(args, 5));
                    row.insert("Details", text(args, 6));
                }
            }
            other => return Err(StoreError::Backend(format!("unsupported statement: {other}"))),
        }
        Ok(1)
    }

    async fn fetch(&self, sql: &str, args: &[SqlValue]) -> StoreResult<Vec<Row>> {
        self.check(sql, args)?;
        let tables = self.tables.lock();
        let open = |rows: &[Row]| {
            rows.iter()
                .filter(|r| {
                    matches!(r.opt_text("Status").as_deref(), Some("pending") | Some("processing"))
                })
                .cloned()
                .collect::<Vec<_>>()
        };
        match sql {
            "GetPendingAccountChanges" => Ok(open(&tables.account_changes)),
            "GetPendingCheckinChanges" => Ok(open(&tables.checkin_changes)),
            "ListAccountPendingChanges" => Ok(tables.account_changes.clone()),
            "ListCheckinPendingChanges" => Ok(tables.checkin_changes.clone()),
            "GetRecentSyncHistory" => {
                let limit = int(args, 0).max(0) as usize;
                let mut rows = tables.history.clone();
                rows.sort_by_key(|r| std::cmp::Reverse(r.opt_i64("HistoryId")));
                rows.truncate(limit);
                Ok(rows)
            }
            other => Err(StoreError::Backend(format!("unsupported query: {other}"))),
        }
    }

    async fn insert_returning_id(&self, sql: &str, args: &[SqlValue]) -> StoreResult<i64> {
        self.check(sql, args)?;
        if sql != "InsertSyncHistory" {
            return Err(StoreError::Backend(format!("unsupported insert: {sql}")));
        }
        let mut tables = self.tables.lock();
        let id = tables.history.len() as i64 + 1;
        let row = Row::new()
            .with("HistoryId", id)
            .with("CorrelationId", text(args, 0))
            .with("RunType", text(args, 1))
            .with("Direction", text(args, 2))
            .with("Source", text(args, 3))
            .with("Initiator", text(args, 4))
            .with("Status", text(args, 5))
            .with("ItemsProcessed", int(args, 6))
            .with("ErrorCount", int(args, 7))
            .with("StartedAt", text(args, 8))
            .with("CompletedAt", SqlValue::Null)
            .with("DurationSeconds", SqlValue::Null)
            .with("Summary", text(args, 9))
            .with("Details", text(args, 10));
        tables.history.push(row);
        Ok(id)
    }

    fn username(&self) -> Option<String> {
        Some("badger".into())
    }
}

// ============================================================================
// Remote API
// ============================================================================

#[derive(Default)]
pub struct MockApi {
    pub accounts: BTreeMap<i64, Record>,
    pub checkins: BTreeMap<i64, Vec<Record>>,
    pub routes: Vec<Record>,
    pub profile: Record,
    pub fail_list: bool,
    pub fail_detail: HashSet<i64>,
    pub fail_checkins: HashSet<i64>,
    /// Entity ids whose update or delete fails; creates fail when the
    /// field map carries a `fail` key.
    pub fail_mutation: HashSet<i64>,
    pub delay: Duration,
    in_flight: AtomicUsize,
    pub max_in_flight: AtomicUsize,
    pub calls: Mutex<Vec<String>>,
}

impl MockApi {
    /// `count` accounts with ids `1..=count`.
    pub fn with_accounts(count: i64) -> Self {
        Self {
            accounts: (1..=count)
                .map(|id| (id, json!({"id": id, "full_name": format!("Account {id}")})))
                .collect(),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    fn call(&self, name: String) {
        self.calls.lock().push(name);
    }

    async fn track<T>(&self, fut: impl std::future::Future<Output = T>) -> T {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }
        let out = fut.await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        out
    }

    fn failing(what: &str, id: i64) -> ApiError {
        ApiError::status(500, format!("{what} {id} request failed"), "internal error")
    }
}

#[async_trait]
impl RemoteApi for MockApi {
    async fn list_ids(&self, entity: Entity) -> ApiResult<Vec<i64>> {
        self.call(format!("list {entity}"));
        if self.fail_list {
            return Err(ApiError::transport("connection refused"));
        }
        Ok(self.accounts.keys().copied().collect())
    }

    async fn get_detail(&self, entity: Entity, id: i64) -> ApiResult<Record> {
        self.call(format!("get {entity} {id}"));
        self.track(async {
            if self.fail_detail.contains(&id) {
                return Err(Self::failing("customer", id));
            }
            match entity {
                Entity::Accounts => self.accounts.get(&id).cloned(),
                Entity::Checkins => self.checkins.values().flatten().find(|c| c["id"] == id).cloned(),
                Entity::Routes => self.routes.iter().find(|r| r["id"] == id).cloned(),
                Entity::Profile => Some(self.profile.clone()),
            }
            .ok_or_else(|| ApiError::status(404, format!("{entity} {id} not found"), ""))
        })
        .await
    }

    async fn list_checkins_for_account(&self, account_id: i64) -> ApiResult<Vec<Record>> {
        self.call(format!("checkins {account_id}"));
        self.track(async {
            if self.fail_checkins.contains(&account_id) {
                return Err(Self::failing("checkins for customer", account_id));
            }
            Ok(self.checkins.get(&account_id).cloned().unwrap_or_default())
        })
        .await
    }

    async fn list_routes(&self) -> ApiResult<Vec<Record>> {
        self.call("routes".into());
        Ok(self.routes.clone())
    }

    async fn get_profile(&self) -> ApiResult<Record> {
        self.call("profile".into());
        Ok(self.profile.clone())
    }

    async fn create(&self, entity: Entity, fields: &FieldMap) -> ApiResult<Record> {
        self.call(format!("create {entity}"));
        if fields.contains_key("fail") {
            return Err(ApiError::status(400, "create rejected", "{\"detail\":\"bad\"}"));
        }
        Ok(json!({"id": 999}))
    }

    async fn update(&self, entity: Entity, id: i64, _fields: &FieldMap) -> ApiResult<Record> {
        self.call(format!("update {entity} {id}"));
        if self.fail_mutation.contains(&id) {
            return Err(Self::failing("update", id));
        }
        Ok(json!({"id": id}))
    }

    async fn delete(&self, entity: Entity, id: i64) -> ApiResult<()> {
        self.call(format!("delete {entity} {id}"));
        if self.fail_mutation.contains(&id) {
            return Err(Self::failing("delete", id));
        }
        Ok(())
    }

    async fn get_raw(&self, endpoint: &str) -> ApiResult<String> {
        self.call(format!("raw {endpoint}"));
        Ok("{}".into())
    }
}

// ============================================================================
// Events
// ============================================================================

/// Records every dispatched event.
pub fn record_events(dispatcher: &EventDispatcher) -> Arc<Mutex<Vec<Event>>> {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    dispatcher.subscribe_all(move |event| sink.lock().push(event.clone()));
    seen
}

/// Dotted names of the recorded events, in order.
pub fn names(events: &Mutex<Vec<Event>>) -> Vec<String> {
    events
        .lock()
        .iter()
        .map(|e| format!("{}:{}", e.event_type, e.source))
        .collect()
}

/// Poll `check` until it holds or a second passes.
pub async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    check()
}
