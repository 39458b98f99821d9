//! Outbox processor: replay pending changes to the remote API.
//!
//! Changes are replayed one at a time in ledger order. Each one is marked
//! `processing` before the remote call and `completed` or `failed` after it,
//! so a crash mid-run leaves at most one row in `processing`. Such a row is
//! picked up again on the next run without being re-marked.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};

use crate::api::RemoteApi;
use crate::change::{self, ChangeScope, ChangeStatus, ChangeType, PendingChange};
use crate::dispatcher::EventDispatcher;
use crate::error::{Error, Result};
use crate::event::{Event, EventType};
use crate::progress::ProgressSink;
use crate::store::Store;

/// Outcome of one push run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PushReport {
    pub total: usize,
    pub completed: usize,
    pub failed: usize,
}

impl PushReport {
    pub fn merge(&mut self, other: PushReport) {
        self.total += other.total;
        self.completed += other.completed;
        self.failed += other.failed;
    }
}

/// Replays the pending-change ledgers.
pub struct OutboxProcessor {
    api: Arc<dyn RemoteApi>,
    store: Arc<dyn Store>,
    events: EventDispatcher,
}

impl OutboxProcessor {
    pub fn new(api: Arc<dyn RemoteApi>, store: Arc<dyn Store>, events: EventDispatcher) -> Self {
        Self { api, store, events }
    }

    fn emit(&self, event_type: EventType, scope: ChangeScope, payload: impl Into<Value>) {
        self.events
            .dispatch(Event::new(event_type, scope.source()).with_payload(payload));
    }

    pub async fn push_accounts(&self, progress: &dyn ProgressSink) -> Result<PushReport> {
        self.push(ChangeScope::Account, progress).await
    }

    pub async fn push_checkins(&self, progress: &dyn ProgressSink) -> Result<PushReport> {
        self.push(ChangeScope::Checkin, progress).await
    }

    /// Replay every non-terminal change of one ledger.
    ///
    /// Only a failure to read the ledger is returned as an error; per-change
    /// failures are counted in the report and the `push.complete` payload.
    pub async fn push(&self, scope: ChangeScope, progress: &dyn ProgressSink) -> Result<PushReport> {
        let label = match scope {
            ChangeScope::Account => "account",
            ChangeScope::Checkin => "check-in",
        };
        self.emit(EventType::PushScanStart, scope, Value::Null);

        let changes = match change::pending_changes(self.store.as_ref(), scope).await {
            Ok(changes) => changes,
            Err(e) => {
                let err = e.context(format!("error getting pending {label} changes"));
                self.emit(EventType::PushError, scope, err.to_string());
                return Err(err);
            }
        };
        self.emit(
            EventType::PushScanComplete,
            scope,
            json!({ "changes": serde_json::to_value(&changes)? }),
        );

        let mut report = PushReport {
            total: changes.len(),
            ..PushReport::default()
        };
        if changes.is_empty() {
            progress.log(&format!("No pending {label} changes to push."));
            self.emit(EventType::PushComplete, scope, json!({ "error_count": 0 }));
            return Ok(report);
        }

        info!(source = scope.source(), count = changes.len(), "pushing pending changes");
        for (i, mut change) in changes.into_iter().enumerate() {
            let change_id = change.change_id;
            self.emit(EventType::PushItemStart, scope, json!({ "change": &change }));

            match self.replay(scope, &mut change).await {
                Ok(()) => {
                    report.completed += 1;
                    self.emit(EventType::PushItemSuccess, scope, json!({ "change": &change }));
                    self.finish(scope, &mut change, ChangeStatus::Completed).await;
                }
                Err(e) => {
                    report.failed += 1;
                    warn!(source = scope.source(), change_id, error = %e, "pending change failed");
                    self.emit(
                        EventType::PushItemError,
                        scope,
                        json!({ "change_id": change_id, "error": e.to_string() }),
                    );
                    self.finish(scope, &mut change, ChangeStatus::Failed).await;
                }
            }
            progress.advance(i + 1, report.total);
        }

        self.emit(EventType::PushComplete, scope, json!({ "error_count": report.failed }));
        progress.log(&format!("Finished pushing {label} changes."));
        Ok(report)
    }

    /// Mark one change as processing and send it to the remote API.
    async fn replay(&self, scope: ChangeScope, change: &mut PendingChange) -> Result<()> {
        if change.status == ChangeStatus::Processing {
            debug!(change_id = change.change_id, "resuming change left in processing");
        } else {
            let now = Utc::now();
            change.advance(ChangeStatus::Processing, now)?;
            change::update_status(
                self.store.as_ref(),
                scope,
                change.change_id,
                ChangeStatus::Processing,
                now,
            )
            .await?;
        }

        let fields = change.fields()?;
        let entity = scope.entity();
        match &change.change_type {
            ChangeType::Create => {
                self.api.create(entity, &fields).await?;
            }
            ChangeType::Update => {
                self.api.update(entity, change.entity_id, &fields).await?;
            }
            ChangeType::Delete => {
                self.api.delete(entity, change.entity_id).await?;
            }
            ChangeType::Other(kind) => {
                debug!(change_id = change.change_id, kind = %kind, "ignoring unknown change type");
            }
        }
        Ok(())
    }

    /// Record the terminal status. A change that never reached `processing`
    /// is stepped through it first so the ledger only moves forward.
    async fn finish(&self, scope: ChangeScope, change: &mut PendingChange, status: ChangeStatus) {
        let now = Utc::now();
        if change.status == ChangeStatus::Pending {
            let _ = change.advance(ChangeStatus::Processing, now);
        }
        if let Err(e) = change.advance(status, now) {
            warn!(change_id = change.change_id, error = %e, "skipping status update");
            return;
        }
        let written =
            change::update_status(self.store.as_ref(), scope, change.change_id, status, now).await;
        self.events.audit().log_database_change(
            "UPDATE",
            scope.table(),
            Some(change.change_id.to_string()),
            written.as_ref().err().map(ToString::to_string).as_deref(),
        );
        if let Err(e) = written {
            let err = Error::from(e);
            warn!(
                source = scope.source(),
                change_id = change.change_id,
                status = %status,
                error = %err,
                "failed to record pending change status"
            );
        }
    }
}
