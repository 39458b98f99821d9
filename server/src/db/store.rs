//! [`Store`] over a sqlx pool.

use async_trait::async_trait;
use badger_engine::error::StoreResult;
use badger_engine::{Dialect, Row, SqlValue, Store, StoreError};
use chrono::{DateTime, NaiveDateTime, Utc};
use sqlx::{Column, Row as _, TypeInfo};

use super::{create_pool, Catalog, Pool};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S%.f";

/// Bind positional arguments onto a sqlx query.
macro_rules! bind_args {
    ($query:expr, $args:expr) => {{
        let mut query = $query;
        for arg in $args {
            query = match arg {
                SqlValue::Null => query.bind(None::<String>),
                SqlValue::Bool(v) => query.bind(*v),
                SqlValue::Int(v) => query.bind(*v),
                SqlValue::Float(v) => query.bind(*v),
                SqlValue::Text(v) => query.bind(v.clone()),
            };
        }
        query
    }};
}

/// Scan a driver row into an engine [`Row`], probing the column types each
/// backend hands back.
macro_rules! decode_row {
    ($row:expr) => {{
        let row = $row;
        let mut out = Row::new();
        for (index, column) in row.columns().iter().enumerate() {
            let value = if let Ok(v) = row.try_get::<Option<i64>, _>(index) {
                v.map(SqlValue::Int)
            } else if let Ok(v) = row.try_get::<Option<i32>, _>(index) {
                v.map(|v| SqlValue::Int(v.into()))
            } else if let Ok(v) = row.try_get::<Option<f64>, _>(index) {
                v.map(SqlValue::Float)
            } else if let Ok(v) = row.try_get::<Option<bool>, _>(index) {
                v.map(SqlValue::Bool)
            } else if let Ok(v) = row.try_get::<Option<String>, _>(index) {
                v.map(SqlValue::Text)
            } else if let Ok(v) = row.try_get::<Option<NaiveDateTime>, _>(index) {
                v.map(|ts| SqlValue::Text(ts.format(TIMESTAMP_FORMAT).to_string()))
            } else if let Ok(v) = row.try_get::<Option<DateTime<Utc>>, _>(index) {
                v.map(|ts| SqlValue::Text(ts.to_rfc3339()))
            } else {
                return Err(StoreError::Decode {
                    column: column.name().to_string(),
                    detail: format!("unsupported column type {}", column.type_info().name()),
                });
            };
            out.insert(column.name(), value.unwrap_or(SqlValue::Null));
        }
        out
    }};
}

fn backend(e: sqlx::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// The engine's relational collaborator, backed by SQLite, PostgreSQL or MySQL.
#[derive(Debug, Clone)]
pub struct SqlStore {
    pool: Pool,
    catalog: Catalog,
    username: Option<String>,
}

impl SqlStore {
    pub fn new(pool: Pool) -> Self {
        Self {
            catalog: Catalog::for_dialect(pool.dialect()),
            pool,
            username: None,
        }
    }

    /// Connect and look up the database user the connection runs as.
    pub async fn connect(dialect: Dialect, database_url: &str) -> Result<Self, sqlx::Error> {
        let pool = create_pool(dialect, database_url).await?;
        let username = match pool.current_user().await {
            Ok(user) => user,
            Err(e) => {
                tracing::warn!(error = %e, "could not determine database user");
                None
            }
        };
        Ok(Self {
            username,
            ..Self::new(pool)
        })
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }
}

#[async_trait]
impl Store for SqlStore {
    fn dialect(&self) -> Dialect {
        self.pool.dialect()
    }

    fn sql(&self, command: &str) -> Option<&str> {
        self.catalog.get(command)
    }

    async fn execute(&self, sql: &str, args: &[SqlValue]) -> StoreResult<u64> {
        tracing::trace!(sql, args = args.len(), "execute");
        let affected = match &self.pool {
            Pool::Sqlite(pool) => bind_args!(sqlx::query(sql), args)
                .execute(pool)
                .await
                .map_err(backend)?
                .rows_affected(),
            Pool::Postgres(pool) => bind_args!(sqlx::query(sql), args)
                .execute(pool)
                .await
                .map_err(backend)?
                .rows_affected(),
            Pool::MySql(pool) => bind_args!(sqlx::query(sql), args)
                .execute(pool)
                .await
                .map_err(backend)?
                .rows_affected(),
        };
        Ok(affected)
    }

    async fn fetch(&self, sql: &str, args: &[SqlValue]) -> StoreResult<Vec<Row>> {
        tracing::trace!(sql, args = args.len(), "fetch");
        let mut rows = Vec::new();
        match &self.pool {
            Pool::Sqlite(pool) => {
                for row in bind_args!(sqlx::query(sql), args)
                    .fetch_all(pool)
                    .await
                    .map_err(backend)?
                {
                    rows.push(decode_row!(&row));
                }
            }
            Pool::Postgres(pool) => {
                for row in bind_args!(sqlx::query(sql), args)
                    .fetch_all(pool)
                    .await
                    .map_err(backend)?
                {
                    rows.push(decode_row!(&row));
                }
            }
            Pool::MySql(pool) => {
                for row in bind_args!(sqlx::query(sql), args)
                    .fetch_all(pool)
                    .await
                    .map_err(backend)?
                {
                    rows.push(decode_row!(&row));
                }
            }
        }
        Ok(rows)
    }

    async fn insert_returning_id(&self, sql: &str, args: &[SqlValue]) -> StoreResult<i64> {
        match &self.pool {
            Pool::Sqlite(pool) => Ok(bind_args!(sqlx::query(sql), args)
                .execute(pool)
                .await
                .map_err(backend)?
                .last_insert_rowid()),
            Pool::Postgres(pool) => {
                let row = bind_args!(sqlx::query(sql), args)
                    .fetch_one(pool)
                    .await
                    .map_err(backend)?;
                row.try_get::<i64, _>(0).map_err(backend)
            }
            Pool::MySql(pool) => {
                let id = bind_args!(sqlx::query(sql), args)
                    .execute(pool)
                    .await
                    .map_err(backend)?
                    .last_insert_id();
                i64::try_from(id).map_err(|e| StoreError::Backend(e.to_string()))
            }
        }
    }

    fn username(&self) -> Option<String> {
        self.username.clone()
    }
}
