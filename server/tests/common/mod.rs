//! Shared fixtures for the server integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use badger_engine::error::ApiResult;
use badger_engine::record::record_id;
use badger_engine::{ApiError, Dialect, Entity, FieldMap, Record, RemoteApi};
use badger_server::db::{run_migrations, SqlStore};
use serde_json::{json, Value};

/// A migrated SQLite database that lives as long as the store.
pub async fn memory_store() -> Arc<SqlStore> {
    let store = SqlStore::connect(Dialect::Sqlite, "sqlite::memory:")
        .await
        .unwrap();
    run_migrations(store.pool()).await.unwrap();
    Arc::new(store)
}

/// In-process remote API serving canned records.
#[derive(Default)]
pub struct StubApi {
    pub accounts: Vec<Record>,
    pub checkins: HashMap<i64, Vec<Record>>,
    pub routes: Vec<Record>,
    pub profile: Record,
    pub fail_mutation_for: Vec<i64>,
    calls: Mutex<Vec<String>>,
    next_id: Mutex<i64>,
}

impl StubApi {
    pub fn with_accounts(n: i64) -> Self {
        let accounts = (1..=n)
            .map(|id| {
                json!({
                    "id": id,
                    "first_name": "Ada",
                    "last_name": format!("Lovelace {id}"),
                    "full_name": format!("Ada Lovelace {id}"),
                    "days_since_last_checkin": id * 2,
                    "custom_text1": "vip"
                })
            })
            .collect();
        Self {
            accounts,
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    fn call(&self, name: String) {
        self.calls.lock().unwrap().push(name);
    }
}

fn not_found(what: &str) -> ApiError {
    ApiError::status(404, "unexpected status", &format!("{what} not found"))
}

#[async_trait]
impl RemoteApi for StubApi {
    async fn list_ids(&self, entity: Entity) -> ApiResult<Vec<i64>> {
        self.call(format!("list {entity}"));
        let items = match entity {
            Entity::Accounts => &self.accounts,
            Entity::Routes => &self.routes,
            _ => return Ok(Vec::new()),
        };
        Ok(items.iter().filter_map(record_id).collect())
    }

    async fn get_detail(&self, entity: Entity, id: i64) -> ApiResult<Record> {
        self.call(format!("get {entity} {id}"));
        let found = match entity {
            Entity::Accounts => self.accounts.iter().find(|r| record_id(r) == Some(id)),
            Entity::Routes => self.routes.iter().find(|r| record_id(r) == Some(id)),
            Entity::Checkins => self
                .checkins
                .values()
                .flatten()
                .find(|r| record_id(r) == Some(id)),
            Entity::Profile => None,
        };
        found.cloned().ok_or_else(|| not_found(entity.source()))
    }

    async fn list_checkins_for_account(&self, account_id: i64) -> ApiResult<Vec<Record>> {
        self.call(format!("checkins {account_id}"));
        Ok(self.checkins.get(&account_id).cloned().unwrap_or_default())
    }

    async fn list_routes(&self) -> ApiResult<Vec<Record>> {
        self.call("routes".to_string());
        Ok(self.routes.clone())
    }

    async fn get_profile(&self) -> ApiResult<Record> {
        self.call("profile".to_string());
        if self.profile.is_null() {
            return Err(not_found("profile"));
        }
        Ok(self.profile.clone())
    }

    async fn create(&self, entity: Entity, fields: &FieldMap) -> ApiResult<Record> {
        self.call(format!("create {entity}"));
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let mut record = json!({ "id": 1000 + *next });
        for (k, v) in fields {
            record[k] = Value::String(v.clone());
        }
        Ok(record)
    }

    async fn update(&self, entity: Entity, id: i64, fields: &FieldMap) -> ApiResult<Record> {
        self.call(format!("update {entity} {id}"));
        if self.fail_mutation_for.contains(&id) {
            return Err(ApiError::status(400, "unexpected status", r#"{"detail":"rejected"}"#));
        }
        Ok(json!({ "id": id, "fields": fields }))
    }

    async fn delete(&self, entity: Entity, id: i64) -> ApiResult<()> {
        self.call(format!("delete {entity} {id}"));
        if self.fail_mutation_for.contains(&id) {
            return Err(ApiError::status(409, "unexpected status", "locked"));
        }
        Ok(())
    }

    async fn get_raw(&self, endpoint: &str) -> ApiResult<String> {
        self.call(format!("raw {endpoint}"));
        Ok("{}".to_string())
    }
}

/// Poll `check` until it holds or a second has passed.
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    false
}
