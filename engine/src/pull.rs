//! Pull orchestrator: fetch remote records and merge them locally.
//!
//! Accounts and check-ins fan out over a semaphore of `concurrency` permits;
//! a permit is acquired before each worker is spawned, so at most that many
//! fetch+store operations are in flight. Per-item failures are collected
//! and reported together once every worker has finished. Check-ins also
//! cancel the remaining work on the first failure. Routes are merged one by
//! one and the profile is a single call.

use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};
use tokio::sync::{mpsc, Semaphore};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::config::clamp_concurrency;
use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result, StoreResult};
use crate::event::{Event, EventType};
use crate::progress::ProgressSink;
use crate::record::{self, Entity, Record};
use crate::store::{self, Store};

/// Counts from one collection pull.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchReport {
    /// Records stored.
    pub items: usize,
    /// Records that failed.
    pub errors: usize,
}

impl BatchReport {
    pub fn merge(&mut self, other: BatchReport) {
        self.items += other.items;
        self.errors += other.errors;
    }

    /// Counts carried by a result, including a batch error's successes.
    pub fn of(result: &Result<BatchReport>) -> BatchReport {
        match result {
            Ok(report) => *report,
            Err(err) => BatchReport {
                items: err.succeeded().unwrap_or(0),
                errors: batch_failures(err).max(1),
            },
        }
    }
}

fn batch_failures(err: &Error) -> usize {
    match err {
        Error::Batch { failures, .. } => failures.len(),
        Error::Context { source, .. } => batch_failures(source),
        _ => 0,
    }
}

/// Told about each collection as `pull_all` finishes it.
#[async_trait]
pub trait PullObserver: Send + Sync {
    async fn group_finished(&self, entity: Entity, report: BatchReport);
}

/// Observer that ignores everything.
pub struct NoObserver;

#[async_trait]
impl PullObserver for NoObserver {
    async fn group_finished(&self, _entity: Entity, _report: BatchReport) {}
}

/// The collaborators each worker needs.
#[derive(Clone)]
struct Worker {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn Store>,
    events: EventDispatcher,
}

impl Worker {
    fn emit(&self, event_type: EventType, source: &str, payload: impl Into<Value>) {
        self.events
            .dispatch(Event::new(event_type, source).with_payload(payload));
    }

    async fn merge(&self, entity: Entity, record: &Record) -> StoreResult<u64> {
        store::run_command(
            self.store.as_ref(),
            entity.merge_command(),
            &entity.merge_args(record),
        )
        .await
    }

    /// Fetch one account's detail and merge it.
    async fn account(self, id: i64) -> std::result::Result<usize, String> {
        let source = Entity::Accounts.source();
        self.emit(EventType::FetchDetailStart, source, id);
        let account = match self.api.get_detail(Entity::Accounts, id).await {
            Ok(account) => account,
            Err(e) => {
                let msg = format!("error getting detailed account info for ID {id}: {e}");
                self.emit(EventType::PullError, source, msg.clone());
                return Err(msg);
            }
        };
        self.emit(EventType::FetchDetailSuccess, source, account.clone());

        if let Err(e) = self.merge(Entity::Accounts, &account).await {
            let msg = format!("error storing account {id}: {e}");
            self.emit(EventType::PullError, source, msg.clone());
            return Err(msg);
        }
        self.emit(EventType::StoreSuccess, source, account);
        Ok(1)
    }

    /// Fetch one account's check-ins and merge them until cancelled.
    async fn checkins(self, account_id: i64, cancel: CancellationToken) -> std::result::Result<usize, String> {
        let source = Entity::Checkins.source();
        if cancel.is_cancelled() {
            return Ok(0);
        }
        self.emit(EventType::FetchDetailStart, source, account_id);
        let checkins = match self.api.list_checkins_for_account(account_id).await {
            Ok(list) => list,
            Err(e) => {
                let msg = format!("error getting checkins for account ID {account_id}: {e}");
                self.emit(EventType::PullError, source, msg.clone());
                cancel.cancel();
                return Err(msg);
            }
        };
        self.emit(EventType::FetchDetailSuccess, source, Value::Array(checkins.clone()));

        let mut stored = 0;
        for checkin in checkins {
            if cancel.is_cancelled() {
                debug!(account_id, "checkin pull cancelled, skipping remaining checkins");
                break;
            }
            if let Err(e) = self.merge(Entity::Checkins, &checkin).await {
                let id = record::record_id(&checkin).unwrap_or_default();
                let msg = format!("error storing checkin {id}: {e}");
                self.emit(EventType::PullError, source, msg.clone());
                cancel.cancel();
                return Err(msg);
            }
            self.emit(EventType::StoreSuccess, source, checkin);
            stored += 1;
        }
        Ok(stored)
    }
}

/// Outcome of a fan-out: stored item count plus failure messages.
#[derive(Default)]
struct Tally {
    items: usize,
    failures: Vec<String>,
    done: usize,
}

impl Tally {
    fn record(&mut self, outcome: std::result::Result<usize, String>, total: usize, progress: &dyn ProgressSink) {
        self.done += 1;
        match outcome {
            Ok(n) => self.items += n,
            Err(msg) => self.failures.push(msg),
        }
        progress.advance(self.done, total);
    }
}

/// Pulls remote collections into the local store.
pub struct PullOrchestrator {
    worker: Worker,
    concurrency: usize,
}

impl PullOrchestrator {
    /// `concurrency` outside `1..=10` falls back to the default of 5.
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn Store>,
        events: EventDispatcher,
        concurrency: usize,
    ) -> Self {
        Self {
            worker: Worker { api, store, events },
            concurrency: clamp_concurrency(concurrency as i64),
        }
    }

    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    fn emit(&self, event_type: EventType, source: &str, payload: impl Into<Value>) {
        self.worker.emit(event_type, source, payload);
    }

    /// Run `work` for every id with at most `concurrency` in flight.
    ///
    /// When `cancel` fires no further workers are spawned.
    async fn fan_out<F, Fut>(
        &self,
        ids: Vec<i64>,
        cancel: Option<&CancellationToken>,
        progress: &dyn ProgressSink,
        work: F,
    ) -> Result<Tally>
    where
        F: Fn(Worker, i64) -> Fut,
        Fut: Future<Output = std::result::Result<usize, String>> + Send + 'static,
    {
        let total = ids.len();
        let semaphore = Arc::new(Semaphore::new(self.concurrency));
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut tasks = JoinSet::new();
        let mut tally = Tally::default();

        for id in ids {
            let permit = Arc::clone(&semaphore)
                .acquire_owned()
                .await
                .map_err(|e| Error::Internal(e.to_string()))?;
            while let Ok(outcome) = rx.try_recv() {
                tally.record(outcome, total, progress);
            }
            if cancel.is_some_and(|c| c.is_cancelled()) {
                debug!(id, "pull cancelled, not starting remaining workers");
                break;
            }

            let job = work(self.worker.clone(), id);
            let tx = tx.clone();
            tasks.spawn(async move {
                let outcome = job.await;
                let _ = tx.send(outcome);
                drop(permit);
            });
        }
        drop(tx);

        while let Some(outcome) = rx.recv().await {
            tally.record(outcome, total, progress);
        }
        while let Some(joined) = tasks.join_next().await {
            if let Err(e) = joined {
                tally.failures.push(format!("pull worker failed: {e}"));
            }
        }
        Ok(tally)
    }

    /// Wrap a collection pull in group start/complete/error events.
///
/// `pull.group.complete` is sent for every outcome; a failure adds
/// `pull.group.error` after it.
    async fn group<Fut>(&self, source: &str, pull: Fut) -> Result<BatchReport>
    where
        Fut: Future<Output = Result<BatchReport>>,
    {
        self.emit(EventType::PullGroupStart, source, Value::Null);
        let result = pull.await;
        match &result {
            Ok(report) => self.emit(
                EventType::PullGroupComplete,
                source,
                json!({ "success": true, "count": report.items, "error_count": report.errors }),
            ),
            Err(e) => {
                let payload =
                    json!({ "success": false, "error": e.to_string(), "count": e.succeeded().unwrap_or(0) });
                self.emit(EventType::PullGroupComplete, source, payload.clone());
                self.emit(EventType::PullGroupError, source, payload);
            }
        }
        result
    }

    /// List identifiers, failing the whole pull if the listing fails.
    async fn list_ids(&self, source: &str) -> Result<Vec<i64>> {
        match self.worker.api.list_ids(Entity::Accounts).await {
            Ok(ids) => Ok(ids),
            Err(e) => {
                let err = Error::from(e).context("error getting account IDs");
                self.emit(EventType::PullError, source, err.to_string());
                Err(err)
            }
        }
    }

    /// Pull every account (or the first `top`, when non-zero).
    pub async fn pull_accounts(&self, top: usize, progress: &dyn ProgressSink) -> Result<BatchReport> {
        let source = Entity::Accounts.source();
        self.group(source, async {
            progress.log("Pulling accounts...");
            let mut ids = self.list_ids(source).await?;
            if top > 0 && top < ids.len() {
                ids.truncate(top);
            }
            self.emit(EventType::ResourceIdsFetched, source, json!({ "count": ids.len() }));
            info!(count = ids.len(), concurrency = self.concurrency, "pulling accounts");

            let tally = self
                .fan_out(ids, None, progress, |worker, id| worker.account(id))
                .await?;
            progress.log("Finished pulling accounts");
            finish("account", tally)
        })
        .await
    }

    /// Pull the check-ins of every account, stopping early on the first failure.
    pub async fn pull_checkins(&self, progress: &dyn ProgressSink) -> Result<BatchReport> {
        let source = Entity::Checkins.source();
        self.group(source, async {
            progress.log("Pulling checkins...");
            let ids = self.list_ids(source).await?;
            self.emit(EventType::ResourceIdsFetched, source, json!({ "count": ids.len() }));

            let cancel = CancellationToken::new();
            let tally = self
                .fan_out(ids, Some(&cancel), progress, |worker, id| {
                    worker.checkins(id, cancel.clone())
                })
                .await?;
            progress.log("Finished pulling checkins");
            finish("check-in", tally)
        })
        .await
    }

    /// Pull every route. Routes without an id are skipped; store failures
    /// are counted, not raised.
    pub async fn pull_routes(&self, progress: &dyn ProgressSink) -> Result<BatchReport> {
        let source = Entity::Routes.source();
        self.group(source, async {
            progress.log("Pulling routes...");
            let routes = match self.worker.api.list_routes().await {
                Ok(routes) => routes,
                Err(e) => {
                    let err = Error::from(e).context("error getting routes");
                    self.emit(EventType::PullError, source, err.to_string());
                    return Err(err);
                }
            };
            let total = routes.len();
            self.emit(EventType::ResourceIdsFetched, source, json!({ "count": total }));

            let mut report = BatchReport::default();
            for (i, route) in routes.into_iter().enumerate() {
                progress.advance(i + 1, total);
                if record::record_id(&route).is_none() {
                    warn!(position = i + 1, total, "skipping route with null ID");
                    continue;
                }
                self.emit(EventType::FetchDetailSuccess, source, route.clone());
                match self.worker.merge(Entity::Routes, &route).await {
                    Ok(_) => {
                        self.emit(EventType::StoreSuccess, source, route);
                        report.items += 1;
                    }
                    Err(e) => {
                        self.emit(EventType::PullError, source, format!("error storing route: {e}"));
                        report.errors += 1;
                    }
                }
            }
            self.emit(EventType::PullComplete, source, json!({ "error_count": report.errors }));
            progress.log("Finished pulling routes");
            Ok(report)
        })
        .await
    }

    /// Pull the user profile and replace its datasets.
    pub async fn pull_profile(&self, progress: &dyn ProgressSink) -> Result<BatchReport> {
        let source = Entity::Profile.source();
        self.emit(EventType::PullStart, source, Value::Null);
        progress.log("Pulling user profile...");

        let result: Result<BatchReport> = async {
            let profile = self
                .worker
                .api
                .get_profile()
                .await
                .map_err(|e| Error::from(e).context("error pulling user profile"))?;
            self.store_profile(&profile)
                .await
                .map_err(|e| e.context("error storing profile"))?;
            let email = profile.get("email").and_then(Value::as_str).unwrap_or_default();
            progress.log(&format!("Successfully pulled user profile for: {email}"));
            Ok(BatchReport { items: 1, errors: 0 })
        }
        .await;

        match &result {
            Ok(_) => self.emit(EventType::PullComplete, source, Value::Null),
            Err(e) => self.emit(EventType::PullError, source, e.to_string()),
        }
        result
    }

    async fn store_profile(&self, profile: &Record) -> Result<()> {
        let store = self.worker.store.as_ref();
        self.worker.merge(Entity::Profile, profile).await?;

        for (name, value) in record::profile_settings(profile) {
            store::update_configuration(store, name, &value).await?;
        }
        store::update_configuration(store, "SqlDbUserName", &store.username().unwrap_or_default())
            .await?;

        let profile_id = profile.get("id").map(store::SqlValue::from_json).unwrap_or(store::SqlValue::Null);
        store::run_command(store, "DeleteDataSetValues", &[profile_id.clone()]).await?;
        store::run_command(store, "DeleteDataSets", &[profile_id]).await?;

        for set in record::profile_datasets(profile) {
            store::run_command(store, "InsertDataSets", &set.dataset).await?;
            for value in &set.values {
                store::run_command(store, "InsertDataSetValues", value).await?;
            }
        }
        Ok(())
    }

    /// Pull a single record by id, wrapped in start/complete/error events.
    async fn pull_one(&self, entity: Entity, id: i64, progress: &dyn ProgressSink) -> Result<()> {
        let source = entity.item_source();
        self.emit(EventType::PullStart, source, id);
        progress.log(&format!("Pulling {source} with ID: {id}"));

        let result: Result<()> = async {
            let record = self
                .worker
                .api
                .get_detail(entity, id)
                .await
                .map_err(|e| Error::from(e).context(format!("error pulling {source}")))?;
            self.worker
                .merge(entity, &record)
                .await
                .map_err(|e| Error::from(e).context(format!("error storing {source}")))?;
            Ok(())
        }
        .await;

        match &result {
            Ok(()) => {
                progress.log(&format!("Successfully pulled {source} with ID: {id}"));
                self.emit(EventType::PullComplete, source, id);
            }
            Err(e) => self.emit(EventType::PullError, source, e.to_string()),
        }
        result
    }

    pub async fn pull_account(&self, id: i64, progress: &dyn ProgressSink) -> Result<()> {
        self.pull_one(Entity::Accounts, id, progress).await
    }

    pub async fn pull_checkin(&self, id: i64, progress: &dyn ProgressSink) -> Result<()> {
        self.pull_one(Entity::Checkins, id, progress).await
    }

    pub async fn pull_route(&self, id: i64, progress: &dyn ProgressSink) -> Result<()> {
        self.pull_one(Entity::Routes, id, progress).await
    }

    /// Pull accounts, check-ins, routes and the profile in that order,
    /// stopping at the first collection that fails.
    pub async fn pull_all(
        &self,
        top: usize,
        progress: &dyn ProgressSink,
        observer: &dyn PullObserver,
    ) -> Result<BatchReport> {
        let source = "all";
        self.emit(EventType::PullAllStart, source, Value::Null);
        progress.log("Pulling all data...");

        let mut total = BatchReport::default();
        let steps = [Entity::Accounts, Entity::Checkins, Entity::Routes, Entity::Profile];
        for entity in steps {
            let result = match entity {
                Entity::Accounts => self.pull_accounts(top, progress).await,
                Entity::Checkins => self.pull_checkins(progress).await,
                Entity::Routes => self.pull_routes(progress).await,
                Entity::Profile => self.pull_profile(progress).await,
            };
            let report = BatchReport::of(&result);
            total.merge(report);
            observer.group_finished(entity, report).await;

            if let Err(e) = result {
                progress.log(&format!("Error pulling {entity}: {e}"));
                self.emit(EventType::PullAllError, source, e.to_string());
                return Err(e);
            }
        }

        progress.log("Finished pulling all data.");
        self.emit(
            EventType::PullAllComplete,
            source,
            json!({ "count": total.items, "error_count": total.errors }),
        );
        Ok(total)
    }
}

fn finish(scope: &str, tally: Tally) -> Result<BatchReport> {
    if tally.failures.is_empty() {
        Ok(BatchReport {
            items: tally.items,
            errors: 0,
        })
    } else {
        Err(Error::Batch {
            scope: scope.to_string(),
            succeeded: tally.items,
            failures: tally.failures,
        })
    }
}
