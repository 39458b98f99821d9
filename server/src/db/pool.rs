//! Database connection pool management.

use std::str::FromStr;

use badger_engine::Dialect;
use sqlx::migrate::{MigrateError, Migrator};
use sqlx::mysql::{MySqlPool, MySqlPoolOptions};
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePool, SqlitePoolOptions};

static SQLITE_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/sqlite");
static POSTGRES_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/postgres");
static MYSQL_MIGRATIONS: Migrator = sqlx::migrate!("./migrations/mysql");

/// A connection pool for one of the supported dialects.
#[derive(Debug, Clone)]
pub enum Pool {
    Sqlite(SqlitePool),
    Postgres(PgPool),
    MySql(MySqlPool),
}

impl Pool {
    pub fn dialect(&self) -> Dialect {
        match self {
            Pool::Sqlite(_) => Dialect::Sqlite,
            Pool::Postgres(_) => Dialect::Postgres,
            Pool::MySql(_) => Dialect::MySql,
        }
    }

    /// The database user of the pool's connections, if the backend has one.
    pub async fn current_user(&self) -> Result<Option<String>, sqlx::Error> {
        match self {
            Pool::Sqlite(_) => Ok(None),
            Pool::Postgres(pool) => {
                let user: String = sqlx::query_scalar("SELECT CAST(current_user AS TEXT)")
                    .fetch_one(pool)
                    .await?;
                Ok(Some(user))
            }
            Pool::MySql(pool) => {
                let user: String = sqlx::query_scalar("SELECT CURRENT_USER()")
                    .fetch_one(pool)
                    .await?;
                // user@host
                Ok(user.split('@').next().map(str::to_string))
            }
        }
    }

    pub async fn close(&self) {
        match self {
            Pool::Sqlite(pool) => pool.close().await,
            Pool::Postgres(pool) => pool.close().await,
            Pool::MySql(pool) => pool.close().await,
        }
    }
}

/// Create a new database connection pool.
pub async fn create_pool(dialect: Dialect, database_url: &str) -> Result<Pool, sqlx::Error> {
    let pool = match dialect {
        Dialect::Sqlite => {
            let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
            let pool_options = if database_url.contains(":memory:") {
                // every connection to an in-memory database is a separate database
                SqlitePoolOptions::new()
                    .max_connections(1)
                    .idle_timeout(None)
                    .max_lifetime(None)
            } else {
                SqlitePoolOptions::new().max_connections(5)
            };
            Pool::Sqlite(pool_options.connect_with(options).await?)
        }
        Dialect::Postgres => Pool::Postgres(
            PgPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?,
        ),
        Dialect::MySql => Pool::MySql(
            MySqlPoolOptions::new()
                .max_connections(10)
                .connect(database_url)
                .await?,
        ),
    };
    Ok(pool)
}

/// Run database migrations.
pub async fn run_migrations(pool: &Pool) -> Result<(), MigrateError> {
    match pool {
        Pool::Sqlite(pool) => SQLITE_MIGRATIONS.run(pool).await,
        Pool::Postgres(pool) => POSTGRES_MIGRATIONS.run(pool).await,
        Pool::MySql(pool) => MYSQL_MIGRATIONS.run(pool).await,
    }
}
