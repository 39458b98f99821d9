//! Sync history: one row per pull or push run.
//!
//! A row is inserted as `running` when the run starts, its item count is
//! updated as work proceeds, and it is completed exactly once. [`HistoryRun`]
//! enforces the last part by consuming itself on [`HistoryRun::finish`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{Result, StoreError, StoreResult};
use crate::store::{self, Row, SqlValue, Store};

/// Number of entries returned by [`recent_history`] for a non-positive limit.
pub const DEFAULT_HISTORY_LIMIT: i64 = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    Pull,
    Push,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Pull => "pull",
            Direction::Push => "push",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Direction {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "pull" => Ok(Direction::Pull),
            "push" => Ok(Direction::Push),
            other => Err(format!("unknown sync direction: {other}")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => Err(format!("unknown sync status: {other}")),
        }
    }
}

/// A row of the sync history table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncHistoryEntry {
    pub history_id: i64,
    pub correlation_id: String,
    pub run_type: String,
    pub direction: Direction,
    pub source: String,
    pub initiator: String,
    pub status: RunStatus,
    pub items_processed: u64,
    pub error_count: u64,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub duration_seconds: u64,
    pub summary: String,
    pub details: String,
}

impl SyncHistoryEntry {
    /// A fresh `running` entry.
    pub fn start(
        correlation_id: impl Into<String>,
        run_type: impl Into<String>,
        direction: Direction,
        source: impl Into<String>,
        initiator: impl Into<String>,
    ) -> Self {
        Self {
            history_id: 0,
            correlation_id: correlation_id.into(),
            run_type: run_type.into(),
            direction,
            source: source.into(),
            initiator: initiator.into(),
            status: RunStatus::Running,
            items_processed: 0,
            error_count: 0,
            started_at: Utc::now(),
            completed_at: None,
            duration_seconds: 0,
            summary: String::new(),
            details: String::new(),
        }
    }

    pub fn from_row(row: &Row) -> StoreResult<Self> {
        let decode = |column: &str, detail: String| StoreError::Decode {
            column: column.to_string(),
            detail,
        };
        let direction = row.text("Direction")?;
        let status = row.text("Status")?;
        Ok(Self {
            history_id: row.i64("HistoryId")?,
            correlation_id: row.text("CorrelationId")?,
            run_type: row.opt_text("RunType").unwrap_or_default(),
            direction: direction.parse().map_err(|e| decode("Direction", e))?,
            source: row.opt_text("Source").unwrap_or_default(),
            initiator: row.opt_text("Initiator").unwrap_or_default(),
            status: status.parse().map_err(|e| decode("Status", e))?,
            items_processed: row.opt_i64("ItemsProcessed").unwrap_or_default().max(0) as u64,
            error_count: row.opt_i64("ErrorCount").unwrap_or_default().max(0) as u64,
            started_at: row.timestamp("StartedAt")?,
            completed_at: row.opt_timestamp("CompletedAt"),
            duration_seconds: row.opt_i64("DurationSeconds").unwrap_or_default().max(0) as u64,
            summary: row.opt_text("Summary").unwrap_or_default(),
            details: row.opt_text("Details").unwrap_or_default(),
        })
    }
}

/// Insert a new entry and record its generated id on it.
pub async fn insert_history(store: &dyn Store, entry: &mut SyncHistoryEntry) -> Result<i64> {
    let sql = store::command_sql(store, "InsertSyncHistory")?;
    let args: Vec<SqlValue> = vec![
        entry.correlation_id.as_str().into(),
        entry.run_type.as_str().into(),
        entry.direction.as_str().into(),
        entry.source.as_str().into(),
        entry.initiator.as_str().into(),
        entry.status.as_str().into(),
        (entry.items_processed as i64).into(),
        (entry.error_count as i64).into(),
        store::format_timestamp(entry.started_at).into(),
        entry.summary.as_str().into(),
        entry.details.as_str().into(),
    ];
    let id = store.insert_returning_id(sql, &args).await?;
    entry.history_id = id;
    Ok(id)
}

/// Update a running entry's item count and summary.
pub async fn update_history_metrics(
    store: &dyn Store,
    correlation_id: &str,
    items_processed: u64,
    summary: &str,
) -> Result<()> {
    store::run_command(
        store,
        "UpdateSyncHistoryMetrics",
        &[
            (items_processed as i64).into(),
            summary.into(),
            correlation_id.into(),
        ],
    )
    .await?;
    Ok(())
}

/// Write the final state of an entry.
pub async fn complete_history(store: &dyn Store, entry: &SyncHistoryEntry) -> Result<()> {
    let completed_at = entry.completed_at.unwrap_or_else(Utc::now);
    store::run_command(
        store,
        "CompleteSyncHistory",
        &[
            entry.status.as_str().into(),
            (entry.items_processed as i64).into(),
            (entry.error_count as i64).into(),
            store::format_timestamp(completed_at).into(),
            (entry.duration_seconds as i64).into(),
            entry.summary.as_str().into(),
            entry.details.as_str().into(),
            entry.correlation_id.as_str().into(),
        ],
    )
    .await?;
    Ok(())
}

/// Most recent entries, newest first.
pub async fn recent_history(store: &dyn Store, limit: i64) -> Result<Vec<SyncHistoryEntry>> {
    let limit = if limit <= 0 { DEFAULT_HISTORY_LIMIT } else { limit };
    let rows = store::query_command(store, "GetRecentSyncHistory", &[limit.into()]).await?;
    let entries = rows
        .iter()
        .map(SyncHistoryEntry::from_row)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(entries)
}

/// A history entry for a run in progress.
pub struct HistoryRun {
    store: Arc<dyn Store>,
    entry: SyncHistoryEntry,
    started: Instant,
}

impl HistoryRun {
    /// Insert the `running` row.
    pub async fn start(store: Arc<dyn Store>, mut entry: SyncHistoryEntry) -> Result<Self> {
        insert_history(store.as_ref(), &mut entry).await?;
        debug!(correlation_id = %entry.correlation_id, history_id = entry.history_id, "sync history started");
        Ok(Self {
            store,
            entry,
            started: Instant::now(),
        })
    }

    pub fn correlation_id(&self) -> &str {
        &self.entry.correlation_id
    }

    /// Record progress on the running row.
    pub async fn progress(&mut self, items_processed: u64, summary: impl Into<String>) -> Result<()> {
        self.entry.items_processed = items_processed;
        self.entry.summary = summary.into();
        update_history_metrics(
            self.store.as_ref(),
            &self.entry.correlation_id,
            items_processed,
            &self.entry.summary,
        )
        .await
    }

    /// Complete the row. Returns the final entry even when the write fails,
    /// together with the write's outcome.
    pub async fn finish(
        mut self,
        status: RunStatus,
        items_processed: u64,
        error_count: u64,
        summary: impl Into<String>,
        details: impl Into<String>,
    ) -> (SyncHistoryEntry, Result<()>) {
        self.entry.status = status;
        self.entry.items_processed = items_processed;
        self.entry.error_count = error_count;
        self.entry.completed_at = Some(Utc::now());
        self.entry.duration_seconds = self.started.elapsed().as_secs();
        self.entry.summary = summary.into();
        self.entry.details = details.into();
        let written = complete_history(self.store.as_ref(), &self.entry).await;
        (self.entry, written)
    }
}
