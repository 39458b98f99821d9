//! Store - the relational collaborator contract.
//!
//! The engine never builds SQL itself. Every statement is looked up by command
//! name through [`Store::sql`], which returns the text for the store's dialect.
//! A missing lookup means the command is unsupported on that dialect and is
//! surfaced as [`StoreError::UnknownCommand`], never as a silent success.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{StoreError, StoreResult};

/// The supported relational backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    /// Embedded file-based store.
    Sqlite,
    Postgres,
    #[serde(rename = "mysql")]
    MySql,
}

impl Dialect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Dialect::Sqlite => "sqlite",
            Dialect::Postgres => "postgres",
            Dialect::MySql => "mysql",
        }
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Dialect {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "sqlite" | "sqlite3" => Ok(Dialect::Sqlite),
            "postgres" | "postgresql" => Ok(Dialect::Postgres),
            "mysql" => Ok(Dialect::MySql),
            other => Err(format!("unsupported database type: {other}")),
        }
    }
}

/// A positional statement argument or a scanned column value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum SqlValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl SqlValue {
    /// Convert a JSON value. Objects and arrays are stored as JSON text.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => SqlValue::Null,
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => SqlValue::Int(i),
                None => n.as_f64().map(SqlValue::Float).unwrap_or(SqlValue::Null),
            },
            Value::String(s) => SqlValue::Text(s.clone()),
            other => SqlValue::Text(other.to_string()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, SqlValue::Null)
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            SqlValue::Int(i) => Some(*i),
            SqlValue::Bool(b) => Some(i64::from(*b)),
            SqlValue::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            SqlValue::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_text(&self) -> Option<String> {
        match self {
            SqlValue::Null => None,
            SqlValue::Bool(b) => Some(b.to_string()),
            SqlValue::Int(i) => Some(i.to_string()),
            SqlValue::Float(f) => Some(f.to_string()),
            SqlValue::Text(s) => Some(s.clone()),
        }
    }
}

impl From<i64> for SqlValue {
    fn from(v: i64) -> Self {
        SqlValue::Int(v)
    }
}

impl From<usize> for SqlValue {
    fn from(v: usize) -> Self {
        SqlValue::Int(v as i64)
    }
}

impl From<bool> for SqlValue {
    fn from(v: bool) -> Self {
        SqlValue::Bool(v)
    }
}

impl From<&str> for SqlValue {
    fn from(v: &str) -> Self {
        SqlValue::Text(v.to_string())
    }
}

impl From<String> for SqlValue {
    fn from(v: String) -> Self {
        SqlValue::Text(v)
    }
}

impl<T: Into<SqlValue>> From<Option<T>> for SqlValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(SqlValue::Null)
    }
}

/// One scanned result row. Column lookups are case-insensitive because
/// PostgreSQL folds unquoted identifiers to lower case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Row {
    columns: BTreeMap<String, SqlValue>,
}

impl Row {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, column: &str, value: impl Into<SqlValue>) -> Self {
        self.insert(column, value);
        self
    }

    pub fn insert(&mut self, column: &str, value: impl Into<SqlValue>) {
        self.columns
            .insert(column.to_ascii_lowercase(), value.into());
    }

    pub fn get(&self, column: &str) -> Option<&SqlValue> {
        self.columns.get(&column.to_ascii_lowercase())
    }

    fn required(&self, column: &str) -> StoreResult<&SqlValue> {
        self.get(column)
            .ok_or_else(|| StoreError::MissingColumn(column.to_string()))
    }

    pub fn i64(&self, column: &str) -> StoreResult<i64> {
        let value = self.required(column)?;
        value.as_i64().ok_or_else(|| StoreError::Decode {
            column: column.to_string(),
            detail: format!("expected integer, got {value:?}"),
        })
    }

    pub fn opt_i64(&self, column: &str) -> Option<i64> {
        self.get(column).and_then(SqlValue::as_i64)
    }

    pub fn text(&self, column: &str) -> StoreResult<String> {
        Ok(self.required(column)?.as_text().unwrap_or_default())
    }

    pub fn opt_text(&self, column: &str) -> Option<String> {
        self.get(column).and_then(SqlValue::as_text)
    }

    pub fn timestamp(&self, column: &str) -> StoreResult<DateTime<Utc>> {
        let raw = self.text(column)?;
        parse_timestamp(&raw).ok_or_else(|| StoreError::Decode {
            column: column.to_string(),
            detail: format!("unsupported time format: {raw}"),
        })
    }

    pub fn opt_timestamp(&self, column: &str) -> Option<DateTime<Utc>> {
        self.opt_text(column).as_deref().and_then(parse_timestamp)
    }
}

/// Parse the timestamp shapes the three dialects hand back.
pub fn parse_timestamp(raw: &str) -> Option<DateTime<Utc>> {
    let raw = raw.trim();
    if raw.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Some(ts.with_timezone(&Utc));
    }
    for layout in ["%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(raw, layout) {
            return Some(naive.and_utc());
        }
    }
    raw.parse::<i64>()
        .ok()
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
}

/// Format a timestamp the way every dialect accepts it as a literal.
pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format("%Y-%m-%d %H:%M:%S").to_string()
}

/// The relational store consumed by the engine.
///
/// Implementations must be safe to share between concurrent pull workers;
/// every call is a self-contained statement.
#[async_trait]
pub trait Store: Send + Sync {
    /// Which dialect this store speaks.
    fn dialect(&self) -> Dialect;

    /// SQL text for a named command, or `None` if the dialect lacks it.
    fn sql(&self, command: &str) -> Option<&str>;

    /// Execute a statement, returning the number of affected rows.
    async fn execute(&self, sql: &str, args: &[SqlValue]) -> StoreResult<u64>;

    /// Run a query and scan every row.
    async fn fetch(&self, sql: &str, args: &[SqlValue]) -> StoreResult<Vec<Row>>;

    /// Execute an insert and return the generated key, using whatever the
    /// dialect offers (returning clause, output clause or last insert id).
    async fn insert_returning_id(&self, sql: &str, args: &[SqlValue]) -> StoreResult<i64>;

    /// The database user the store is connected as, if known.
    fn username(&self) -> Option<String> {
        None
    }
}

/// Look up a command's SQL, treating an empty or absent entry as unsupported.
pub fn command_sql<'a>(store: &'a dyn Store, command: &str) -> StoreResult<&'a str> {
    match store.sql(command) {
        Some(sql) if !sql.trim().is_empty() => Ok(sql),
        _ => Err(StoreError::UnknownCommand(command.to_string())),
    }
}

/// Execute a named command with positional arguments.
pub async fn run_command(store: &dyn Store, command: &str, args: &[SqlValue]) -> StoreResult<u64> {
    let sql = command_sql(store, command)?;
    store.execute(sql, args).await
}

/// Run a named query with positional arguments.
pub async fn query_command(
    store: &dyn Store,
    command: &str,
    args: &[SqlValue],
) -> StoreResult<Vec<Row>> {
    let sql = command_sql(store, command)?;
    store.fetch(sql, args).await
}

/// Upsert a key/value pair in the configuration table.
pub async fn update_configuration(store: &dyn Store, name: &str, value: &str) -> StoreResult<()> {
    run_command(store, "UpdateConfiguration", &[name.into(), value.into()]).await?;
    Ok(())
}
