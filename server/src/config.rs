//! Configuration management for the server.

use std::env;
use std::path::PathBuf;

use badger_engine::Dialect;

use crate::api::DEFAULT_API_URL;

/// Agent configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    pub db_type: Dialect,
    pub database_url: String,
    /// Base URL of the remote CRM API
    pub api_url: String,
    pub api_key: String,
    /// Server host address
    pub host: String,
    /// Server port
    pub port: u16,
    /// Bearer token required by the HTTP surface, when set
    pub auth_secret: Option<String>,
    /// JSON file holding the sync settings and event actions
    pub sync_config: PathBuf,
    pub audit_log: PathBuf,
    pub audit_enabled: bool,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load configuration through an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let db_type = match var("DB_TYPE") {
            Some(raw) => raw.parse().map_err(ConfigError::InvalidDbType)?,
            None => Dialect::Sqlite,
        };

        let database_url = var("DATABASE_URL").ok_or(ConfigError::MissingDatabaseUrl)?;

        let port = var("PORT")
            .unwrap_or_else(|| "3000".to_string())
            .parse()
            .map_err(|_| ConfigError::InvalidPort)?;

        let audit_enabled = match var("AUDIT_ENABLED") {
            Some(raw) => parse_bool(&raw).ok_or(ConfigError::InvalidFlag("AUDIT_ENABLED"))?,
            None => true,
        };

        Ok(Self {
            db_type,
            database_url,
            api_url: var("API_URL").unwrap_or_else(|| DEFAULT_API_URL.to_string()),
            api_key: var("API_KEY").unwrap_or_default(),
            host: var("HOST").unwrap_or_else(|| "0.0.0.0".to_string()),
            port,
            auth_secret: var("AUTH_SECRET"),
            sync_config: var("SYNC_CONFIG")
                .unwrap_or_else(|| "badger-sync.json".to_string())
                .into(),
            audit_log: var("AUDIT_LOG")
                .unwrap_or_else(|| "logs/audit.log".to_string())
                .into(),
            audit_enabled,
        })
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("DATABASE_URL environment variable is required")]
    MissingDatabaseUrl,

    #[error("Invalid DB_TYPE: {0}")]
    InvalidDbType(String),

    #[error("Invalid PORT value")]
    InvalidPort,

    #[error("Invalid boolean value for {0}")]
    InvalidFlag(&'static str),
}
