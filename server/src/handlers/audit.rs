//! Audit log queries.

use badger_engine::{AuditEntry, AuditFilters};

use crate::error::{AppError, Result};
use crate::AppState;

/// Entries returned when the caller sets no limit.
pub const DEFAULT_AUDIT_LIMIT: usize = 100;

/// Matching audit entries, newest first.
pub async fn query_audit(state: &AppState, mut filters: AuditFilters) -> Result<Vec<AuditEntry>> {
    if let (Some(start), Some(end)) = (filters.start, filters.end) {
        if start > end {
            return Err(AppError::BadRequest("start must not be after end".into()));
        }
    }
    if filters.limit == 0 {
        filters.limit = DEFAULT_AUDIT_LIMIT;
    }

    let audit = state.audit.clone();
    let entries = tokio::task::spawn_blocking(move || audit.query(&filters))
        .await
        .map_err(|e| AppError::Internal(format!("audit query task failed: {e}")))??;
    Ok(entries)
}
