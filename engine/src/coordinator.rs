//! Top-level sync runs with history and audit bookkeeping.
//!
//! History and audit writes sit beside the run: if the history row cannot
//! be inserted the run still happens, it just goes unrecorded.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::{info, warn};
use uuid::Uuid;

use crate::api::RemoteApi;
use crate::audit::{AuditLogger, OperationType};
use crate::change::ChangeScope;
use crate::config::SyncConfig;
use crate::dispatcher::EventDispatcher;
use crate::error::Result;
use crate::event::{Event, EventType};
use crate::history::{self, Direction, HistoryRun, RunStatus, SyncHistoryEntry};
use crate::progress::ProgressSink;
use crate::pull::{BatchReport, PullObserver, PullOrchestrator};
use crate::push::{OutboxProcessor, PushReport};
use crate::record::Entity;
use crate::store::Store;

/// Who asked for a run and under which correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunRequest {
    pub correlation_id: String,
    pub initiator: String,
}

impl RunRequest {
    /// A request with a freshly generated correlation id.
    pub fn new(initiator: impl Into<String>) -> Self {
        Self {
            correlation_id: Uuid::new_v4().to_string(),
            initiator: initiator.into(),
        }
    }
}

/// Keeps the history row current as `pull_all` finishes each collection.
struct HistoryObserver {
    run: tokio::sync::Mutex<Option<HistoryRun>>,
    totals: Mutex<BatchReport>,
}

#[async_trait]
impl PullObserver for HistoryObserver {
    async fn group_finished(&self, entity: Entity, report: BatchReport) {
        let items = {
            let mut totals = self.totals.lock();
            totals.merge(report);
            totals.items as u64
        };
        if let Some(run) = self.run.lock().await.as_mut() {
            let summary = format!("Pulled {} {entity}, {items} items so far", report.items);
            if let Err(e) = run.progress(items, summary).await {
                warn!(correlation_id = run.correlation_id(), error = %e, "failed to update sync history");
            }
        }
    }
}

/// Entry points for "pull everything" and "push everything".
pub struct SyncCoordinator {
    store: Arc<dyn Store>,
    pull: PullOrchestrator,
    push: OutboxProcessor,
    events: EventDispatcher,
    audit: AuditLogger,
}

impl SyncCoordinator {
    pub fn new(
        api: Arc<dyn RemoteApi>,
        store: Arc<dyn Store>,
        config: &SyncConfig,
        events: EventDispatcher,
    ) -> Self {
        let audit = events.audit().clone();
        Self {
            pull: PullOrchestrator::new(
                Arc::clone(&api),
                Arc::clone(&store),
                events.clone(),
                config.concurrency(),
            ),
            push: OutboxProcessor::new(api, Arc::clone(&store), events.clone()),
            store,
            events,
            audit,
        }
    }

    pub fn pull(&self) -> &PullOrchestrator {
        &self.pull
    }

    pub fn push(&self) -> &OutboxProcessor {
        &self.push
    }

    pub fn events(&self) -> &EventDispatcher {
        &self.events
    }

    /// Most recent history entries, newest first.
    pub async fn history(&self, limit: i64) -> Result<Vec<SyncHistoryEntry>> {
        history::recent_history(self.store.as_ref(), limit).await
    }

    async fn begin(&self, entry: SyncHistoryEntry) -> Option<HistoryRun> {
        match HistoryRun::start(Arc::clone(&self.store), entry).await {
            Ok(run) => Some(run),
            Err(e) => {
                warn!(error = %e, "failed to record sync start");
                None
            }
        }
    }

    /// Complete the history row (or the unrecorded stand-in), announce it
    /// and write the audit entry.
    #[allow(clippy::too_many_arguments)]
    async fn conclude(
        &self,
        run: Option<HistoryRun>,
        mut fallback: SyncHistoryEntry,
        started: Instant,
        status: RunStatus,
        items: u64,
        errors: u64,
        summary: String,
        details: String,
    ) -> SyncHistoryEntry {
        let entry = match run {
            Some(run) => {
                let (entry, written) = run.finish(status, items, errors, summary, details).await;
                if let Err(e) = written {
                    warn!(correlation_id = %entry.correlation_id, error = %e, "failed to complete sync history");
                }
                entry
            }
            None => {
                fallback.status = status;
                fallback.items_processed = items;
                fallback.error_count = errors;
                fallback.completed_at = Some(chrono::Utc::now());
                fallback.duration_seconds = started.elapsed().as_secs();
                fallback.summary = summary;
                fallback.details = details;
                fallback
            }
        };

        self.events.dispatch(
            Event::new(EventType::SyncHistoryUpdated, entry.direction.as_str()).with_data(&entry),
        );
        let operation = match entry.direction {
            Direction::Pull => OperationType::SyncPull,
            Direction::Push => OperationType::SyncPush,
        };
        let error = (status == RunStatus::Failed).then_some(entry.details.as_str());
        self.audit.log_sync(
            operation,
            &entry.source,
            &entry.correlation_id,
            items,
            errors,
            started.elapsed(),
            error,
        );
        info!(
            correlation_id = %entry.correlation_id,
            direction = %entry.direction,
            status = %entry.status,
            items,
            errors,
            "sync run finished"
        );
        entry
    }

    /// Pull every collection and record the run.
    pub async fn run_pull_all(
        &self,
        request: &RunRequest,
        top: usize,
        progress: &dyn ProgressSink,
    ) -> Result<SyncHistoryEntry> {
        let started = Instant::now();
        let mut entry = SyncHistoryEntry::start(
            &request.correlation_id,
            "pull_all",
            Direction::Pull,
            "all",
            &request.initiator,
        );
        entry.summary = "Pull started for all data".into();
        info!(correlation_id = %request.correlation_id, top, "starting full pull");

        let observer = HistoryObserver {
            run: tokio::sync::Mutex::new(self.begin(entry.clone()).await),
            totals: Mutex::new(BatchReport::default()),
        };
        let result = self.pull.pull_all(top, progress, &observer).await;

        let totals = *observer.totals.lock();
        let run = observer.run.into_inner();
        let (status, summary, details) = match &result {
            Ok(_) if totals.errors > 0 => (
                RunStatus::Completed,
                format!("Pulled {} items with {} errors", totals.items, totals.errors),
                String::new(),
            ),
            Ok(_) => (
                RunStatus::Completed,
                format!("Pulled {} items", totals.items),
                String::new(),
            ),
            Err(e) => (RunStatus::Failed, "Pull failed".to_string(), e.to_string()),
        };
        let entry = self
            .conclude(
                run,
                entry,
                started,
                status,
                totals.items as u64,
                totals.errors as u64,
                summary,
                details,
            )
            .await;
        result.map(|_| entry)
    }

    /// Push both ledgers and record the run.
    ///
    /// Individual change failures leave the run `completed` with a non-zero
    /// error count. Only a ledger read failure fails the run.
    pub async fn run_push_all(
        &self,
        request: &RunRequest,
        progress: &dyn ProgressSink,
    ) -> Result<SyncHistoryEntry> {
        let started = Instant::now();
        let mut entry = SyncHistoryEntry::start(
            &request.correlation_id,
            "push_all",
            Direction::Push,
            "all",
            &request.initiator,
        );
        entry.summary = "Scanning pending changes".into();
        info!(correlation_id = %request.correlation_id, "starting full push");
        let mut run = self.begin(entry.clone()).await;

        let mut report = PushReport::default();
        let mut failure = None;
        for scope in [ChangeScope::Account, ChangeScope::Checkin] {
            match self.push.push(scope, progress).await {
                Ok(part) => {
                    report.merge(part);
                    if let Some(run) = run.as_mut() {
                        let summary = format!("Pushed {}, {} changes so far", scope.source(), report.total);
                        if let Err(e) = run.progress(report.completed as u64, summary).await {
                            warn!(error = %e, "failed to update sync history");
                        }
                    }
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            }
        }

        let (status, summary, details) = match &failure {
            Some(e) => (RunStatus::Failed, "Push failed".to_string(), e.to_string()),
            None if report.failed > 0 => (
                RunStatus::Completed,
                format!("Push finished with {} errors", report.failed),
                String::new(),
            ),
            None => (RunStatus::Completed, "Push completed".to_string(), String::new()),
        };
        let entry = self
            .conclude(
                run,
                entry,
                started,
                status,
                report.completed as u64,
                report.failed as u64,
                summary,
                details,
            )
            .await;
        match failure {
            Some(e) => Err(e),
            None => Ok(entry),
        }
    }
}
