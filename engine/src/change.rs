//! Pending-change ledger types.
//!
//! A pending change is a locally captured mutation waiting to be replayed to
//! the remote API. Its status is an append-only state machine:
//! `pending -> processing -> {completed | failed}`.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result, StoreResult};
use crate::record::Entity;
use crate::store::{self, Row, Store};

/// Field map carried by a pending change and sent to the remote API.
pub type FieldMap = BTreeMap<String, String>;

/// Kind of mutation captured in the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum ChangeType {
    Create,
    Update,
    Delete,
    /// Anything else found in the ledger. Replayed as a no-op.
    Other(String),
}

impl ChangeType {
    pub fn as_str(&self) -> &str {
        match self {
            ChangeType::Create => "CREATE",
            ChangeType::Update => "UPDATE",
            ChangeType::Delete => "DELETE",
            ChangeType::Other(s) => s,
        }
    }
}

impl From<String> for ChangeType {
    fn from(s: String) -> Self {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATE" => ChangeType::Create,
            "UPDATE" => ChangeType::Update,
            "DELETE" => ChangeType::Delete,
            _ => ChangeType::Other(s),
        }
    }
}

impl From<ChangeType> for String {
    fn from(t: ChangeType) -> Self {
        t.as_str().to_string()
    }
}

impl fmt::Display for ChangeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a pending change.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl ChangeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeStatus::Pending => "pending",
            ChangeStatus::Processing => "processing",
            ChangeStatus::Completed => "completed",
            ChangeStatus::Failed => "failed",
        }
    }

    /// Whether no further transition is allowed.
    pub fn is_terminal(&self) -> bool {
        matches!(self, ChangeStatus::Completed | ChangeStatus::Failed)
    }

    /// Whether `self -> next` is a legal forward step.
    pub fn can_advance_to(&self, next: ChangeStatus) -> bool {
        matches!(
            (self, next),
            (ChangeStatus::Pending, ChangeStatus::Processing)
                | (ChangeStatus::Processing, ChangeStatus::Completed)
                | (ChangeStatus::Processing, ChangeStatus::Failed)
        )
    }
}

impl fmt::Display for ChangeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChangeStatus {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Ok(ChangeStatus::Pending),
            "processing" => Ok(ChangeStatus::Processing),
            "completed" => Ok(ChangeStatus::Completed),
            "failed" => Ok(ChangeStatus::Failed),
            other => Err(format!("unknown change status: {other}")),
        }
    }
}

/// Which ledger a change lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChangeScope {
    Account,
    Checkin,
}

impl ChangeScope {
    pub fn table(&self) -> &'static str {
        match self {
            ChangeScope::Account => "AccountsPendingChanges",
            ChangeScope::Checkin => "AccountCheckinsPendingChanges",
        }
    }

    /// Command returning the non-terminal rows in ledger order.
    pub fn pending_command(&self) -> &'static str {
        match self {
            ChangeScope::Account => "GetPendingAccountChanges",
            ChangeScope::Checkin => "GetPendingCheckinChanges",
        }
    }

    /// Command returning every row regardless of status.
    pub fn list_command(&self) -> &'static str {
        match self {
            ChangeScope::Account => "ListAccountPendingChanges",
            ChangeScope::Checkin => "ListCheckinPendingChanges",
        }
    }

    pub fn status_command(&self) -> &'static str {
        match self {
            ChangeScope::Account => "UpdateAccountPendingChangeStatus",
            ChangeScope::Checkin => "UpdateCheckinPendingChangeStatus",
        }
    }

    pub fn entity(&self) -> Entity {
        match self {
            ChangeScope::Account => Entity::Accounts,
            ChangeScope::Checkin => Entity::Checkins,
        }
    }

    /// Event source name for this ledger.
    pub fn source(&self) -> &'static str {
        match self {
            ChangeScope::Account => "accounts",
            ChangeScope::Checkin => "checkins",
        }
    }
}

/// One row of a pending-change ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingChange {
    pub change_id: i64,
    pub entity_id: i64,
    pub change_type: ChangeType,
    /// Serialized field map, decoded lazily by [`PendingChange::fields`].
    pub changes: String,
    pub status: ChangeStatus,
    pub created_at: DateTime<Utc>,
    pub processed_at: Option<DateTime<Utc>>,
}

impl PendingChange {
    /// Decode a scanned ledger row.
    pub fn from_row(row: &Row) -> StoreResult<Self> {
        let status_text = row.text("Status")?;
        let status = status_text
            .parse()
            .map_err(|detail| crate::error::StoreError::Decode {
                column: "Status".into(),
                detail,
            })?;
        Ok(Self {
            change_id: row.i64("ChangeId")?,
            entity_id: row.opt_i64("EntityId").unwrap_or_default(),
            change_type: ChangeType::from(row.text("ChangeType")?),
            changes: row.opt_text("Changes").unwrap_or_default(),
            status,
            created_at: row.timestamp("CreatedAt")?,
            processed_at: row.opt_timestamp("ProcessedAt"),
        })
    }

    /// Decode the field map. Non-string JSON values are rendered as text.
    pub fn fields(&self) -> Result<FieldMap> {
        let invalid = |detail: String| Error::InvalidPayload {
            change_id: self.change_id,
            detail,
        };
        if self.changes.trim().is_empty() {
            return Ok(FieldMap::new());
        }
        let value: serde_json::Value =
            serde_json::from_str(&self.changes).map_err(|e| invalid(e.to_string()))?;
        let object = value
            .as_object()
            .ok_or_else(|| invalid("changes must be a JSON object".into()))?;
        Ok(object
            .iter()
            .map(|(k, v)| {
                let text = match v {
                    serde_json::Value::String(s) => s.clone(),
                    serde_json::Value::Null => String::new(),
                    other => other.to_string(),
                };
                (k.clone(), text)
            })
            .collect())
    }

    /// Move to `next`, rejecting anything but a forward step.
    pub fn advance(&mut self, next: ChangeStatus, at: DateTime<Utc>) -> Result<()> {
        if !self.status.can_advance_to(next) {
            return Err(Error::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        if next.is_terminal() {
            self.processed_at = Some(at);
        }
        Ok(())
    }
}

/// Fetch the non-terminal changes of a ledger in ledger order.
pub async fn pending_changes(store: &dyn Store, scope: ChangeScope) -> Result<Vec<PendingChange>> {
    let rows = store::query_command(store, scope.pending_command(), &[]).await?;
    let changes = rows
        .iter()
        .map(PendingChange::from_row)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(changes)
}

/// Persist a status change for one ledger row.
pub async fn update_status(
    store: &dyn Store,
    scope: ChangeScope,
    change_id: i64,
    status: ChangeStatus,
    at: DateTime<Utc>,
) -> StoreResult<()> {
    let processed_at = status
        .is_terminal()
        .then(|| store::format_timestamp(at));
    store::run_command(
        store,
        scope.status_command(),
        &[status.as_str().into(), processed_at.into(), change_id.into()],
    )
    .await?;
    Ok(())
}

/// Column a listing can be ordered by.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeOrderBy {
    Status,
    ChangeType,
    #[default]
    CreatedAt,
    EntityId,
}

/// Filter and ordering for [`list_pending_changes`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChangeFilter {
    pub status: Option<ChangeStatus>,
    pub change_type: Option<ChangeType>,
    pub entity_id: Option<i64>,
    pub created_after: Option<DateTime<Utc>>,
    pub created_before: Option<DateTime<Utc>>,
    #[serde(default)]
    pub order_by: ChangeOrderBy,
    #[serde(default)]
    pub descending: bool,
}

impl ChangeFilter {
    pub fn matches(&self, change: &PendingChange) -> bool {
        self.status.map_or(true, |s| s == change.status)
            && self
                .change_type
                .as_ref()
                .map_or(true, |t| *t == change.change_type)
            && self.entity_id.map_or(true, |id| id == change.entity_id)
            && self.created_after.map_or(true, |t| change.created_at >= t)
            && self.created_before.map_or(true, |t| change.created_at <= t)
    }

    fn compare(&self, a: &PendingChange, b: &PendingChange) -> Ordering {
        let ord = match self.order_by {
            ChangeOrderBy::Status => a.status.cmp(&b.status),
            ChangeOrderBy::ChangeType => a.change_type.as_str().cmp(b.change_type.as_str()),
            ChangeOrderBy::CreatedAt => a.created_at.cmp(&b.created_at),
            ChangeOrderBy::EntityId => a.entity_id.cmp(&b.entity_id),
        }
        .then(a.change_id.cmp(&b.change_id));
        if self.descending {
            ord.reverse()
        } else {
            ord
        }
    }

    /// Filter then sort a set of changes.
    pub fn apply(&self, changes: Vec<PendingChange>) -> Vec<PendingChange> {
        let mut out: Vec<_> = changes.into_iter().filter(|c| self.matches(c)).collect();
        out.sort_by(|a, b| self.compare(a, b));
        out
    }
}

/// List ledger rows of any status, filtered and ordered.
pub async fn list_pending_changes(
    store: &dyn Store,
    scope: ChangeScope,
    filter: &ChangeFilter,
) -> Result<Vec<PendingChange>> {
    let rows = store::query_command(store, scope.list_command(), &[]).await?;
    let changes = rows
        .iter()
        .map(PendingChange::from_row)
        .collect::<StoreResult<Vec<_>>>()?;
    Ok(filter.apply(changes))
}
