//! Sync run handlers - start runs in the background and report on them.

use badger_engine::{Direction, RunRequest, SyncHistoryEntry};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, Result};
use crate::progress::LogProgress;
use crate::AppState;

/// Query parameters for a pull run.
#[derive(Debug, Default, Deserialize)]
pub struct PullQuery {
    /// Only pull the first N accounts (0 = all)
    #[serde(default)]
    pub top: usize,
}

/// Query parameters for the history listing.
#[derive(Debug, Default, Deserialize)]
pub struct HistoryQuery {
    #[serde(default)]
    pub limit: i64,
}

/// Response for a run that was started in the background.
#[derive(Debug, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunStarted {
    pub correlation_id: String,
    pub direction: Direction,
}

/// Start a pull of every collection.
pub fn start_pull(state: &AppState, query: PullQuery, initiator: &str) -> Result<RunStarted> {
    let guard = state
        .run_lock
        .clone()
        .try_lock_owned()
        .map_err(|_| AppError::Conflict("a sync run is already in progress".into()))?;

    let request = RunRequest::new(initiator);
    let started = RunStarted {
        correlation_id: request.correlation_id.clone(),
        direction: Direction::Pull,
    };
    let coordinator = state.coordinator.clone();

    tokio::spawn(async move {
        let _guard = guard;
        let progress = LogProgress {
            correlation_id: request.correlation_id.clone(),
        };
        match coordinator.run_pull_all(&request, query.top, &progress).await {
            Ok(entry) => tracing::info!(
                correlation_id = %request.correlation_id,
                items = entry.items_processed,
                "pull run finished"
            ),
            Err(e) => tracing::warn!(
                correlation_id = %request.correlation_id,
                error = %e,
                "pull run failed"
            ),
        }
    });

    Ok(started)
}

/// Start a push of both pending-change ledgers.
pub fn start_push(state: &AppState, initiator: &str) -> Result<RunStarted> {
    let guard = state
        .run_lock
        .clone()
        .try_lock_owned()
        .map_err(|_| AppError::Conflict("a sync run is already in progress".into()))?;

    let request = RunRequest::new(initiator);
    let started = RunStarted {
        correlation_id: request.correlation_id.clone(),
        direction: Direction::Push,
    };
    let coordinator = state.coordinator.clone();

    tokio::spawn(async move {
        let _guard = guard;
        let progress = LogProgress {
            correlation_id: request.correlation_id.clone(),
        };
        match coordinator.run_push_all(&request, &progress).await {
            Ok(entry) => tracing::info!(
                correlation_id = %request.correlation_id,
                items = entry.items_processed,
                errors = entry.error_count,
                "push run finished"
            ),
            Err(e) => tracing::warn!(
                correlation_id = %request.correlation_id,
                error = %e,
                "push run failed"
            ),
        }
    });

    Ok(started)
}

/// Most recent runs, newest first.
pub async fn history(state: &AppState, query: HistoryQuery) -> Result<Vec<SyncHistoryEntry>> {
    Ok(state.coordinator.history(query.limit).await?)
}
