//! Wiring of the engine onto the concrete store, API client and audit log.

use std::sync::Arc;

use badger_engine::{
    ActionExecutor, AuditConfig, AuditLevel, AuditLogger, AuditedApi, EventDispatcher, RemoteApi,
    Store, SyncConfig, SyncCoordinator,
};

use crate::api::ApiClient;
use crate::config::Config;
use crate::db::{self, SqlStore};
use crate::error::Result;

/// A ready-to-run sync agent.
pub struct Agent {
    pub config: Arc<Config>,
    pub store: Arc<SqlStore>,
    pub coordinator: Arc<SyncCoordinator>,
    pub audit: AuditLogger,
}

impl Agent {
    /// Connect to the database, migrate it and build the coordinator.
    pub async fn start(config: Config) -> Result<Self> {
        let store = SqlStore::connect(config.db_type, &config.database_url).await?;
        db::run_migrations(store.pool()).await?;
        tracing::info!(dialect = %config.db_type, "database ready");

        let audit = if config.audit_enabled {
            AuditLogger::open(AuditConfig::new(&config.audit_log))?
        } else {
            AuditLogger::disabled()
        };
        let api = ApiClient::new(&config.api_url, &config.api_key)?;

        Self::assemble(config, Arc::new(store), Arc::new(api), audit)
    }

    /// Build an agent from already constructed collaborators.
    ///
    /// The sync settings are read from `config.sync_config`; anything the
    /// loader pruned is written to the audit log.
    pub fn assemble(
        config: Config,
        store: Arc<SqlStore>,
        api: Arc<dyn RemoteApi>,
        audit: AuditLogger,
    ) -> Result<Self> {
        let sync_config = SyncConfig::load(&config.sync_config)?;
        for message in sync_config.pruned() {
            audit.log_config("prune", message, AuditLevel::Warning);
        }

        let api: Arc<dyn RemoteApi> = Arc::new(AuditedApi::new(api, audit.clone()));
        let engine_store: Arc<dyn Store> = store.clone();
        let executor = ActionExecutor::new(Arc::clone(&engine_store), Arc::clone(&api));
        let events = EventDispatcher::with_actions(&sync_config, executor, audit.clone());
        let coordinator = SyncCoordinator::new(api, engine_store, &sync_config, events);

        tracing::info!(
            config = %config.sync_config.display(),
            actions = sync_config.events.len(),
            concurrency = sync_config.concurrency(),
            "sync agent assembled"
        );

        Ok(Self {
            config: Arc::new(config),
            store,
            coordinator: Arc::new(coordinator),
            audit,
        })
    }

    /// Flush the audit log and close the pool.
    pub async fn shutdown(&self) {
        self.audit.close().await;
        self.store.pool().close().await;
    }
}
