//! Audit trail: an append-only JSON-lines log of operations.
//!
//! Entries are handed to a bounded queue drained by a single blocking
//! consumer. When the queue is full, or no Tokio runtime was available at
//! [`AuditLogger::open`], the entry is written synchronously instead. The file
//! handle and its size counter live behind one mutex; when the size reaches
//! the rotation threshold the file is renamed to `<path>.<YYYYmmdd-HHMMSS>`
//! and a fresh one is opened before the next entry is written.

use std::ffi::OsString;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tokio::sync::mpsc::{self, error::TrySendError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use crate::api::RemoteApi;
use crate::change::FieldMap;
use crate::error::{ApiResult, Result};
use crate::record::{Entity, Record};

/// Rotate once the current file reaches this many bytes.
pub const DEFAULT_ROTATION_SIZE: u64 = 100 * 1024 * 1024;
/// Rotated files older than this many days are swept.
pub const DEFAULT_RETENTION_DAYS: u64 = 90;
/// Capacity of the asynchronous write queue.
pub const DEFAULT_QUEUE_SIZE: usize = 1000;
/// Period of the background retention sweep.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditLevel {
    Info,
    Warning,
    Error,
    Critical,
    Debug,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OperationType {
    ApiCall,
    DbChange,
    WebhookIn,
    WebhookOut,
    SyncPull,
    SyncPush,
    Backup,
    Restore,
    ScheduledJob,
    Auth,
    Config,
}

/// One immutable audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: String,
    pub timestamp: DateTime<Utc>,
    pub level: AuditLevel,
    pub operation_type: OperationType,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    pub source: String,
    pub action: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_id: Option<String>,
    pub success: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
}

fn new_id(now: DateTime<Utc>) -> String {
    let nanos = now.timestamp_nanos_opt().unwrap_or_else(|| now.timestamp_micros() * 1000);
    format!("audit_{}_{}", nanos, std::process::id())
}

impl AuditEntry {
    /// A successful `INFO` entry stamped now.
    pub fn new(operation_type: OperationType, source: impl Into<String>, action: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: new_id(now),
            timestamp: now,
            level: AuditLevel::Info,
            operation_type,
            user: None,
            source: source.into(),
            action: action.into(),
            resource: None,
            resource_id: None,
            success: true,
            error_message: None,
            duration_ms: 0,
            metadata: None,
        }
    }

    pub fn level(mut self, level: AuditLevel) -> Self {
        self.level = level;
        self
    }

    pub fn user(mut self, user: impl Into<String>) -> Self {
        self.user = Some(user.into());
        self
    }

    pub fn resource(mut self, resource: impl Into<String>, id: Option<String>) -> Self {
        self.resource = Some(resource.into());
        self.resource_id = id;
        self
    }

    pub fn duration(mut self, duration: Duration) -> Self {
        self.duration_ms = duration.as_millis() as u64;
        self
    }

    /// Mark as failed at `ERROR` level.
    pub fn failed(mut self, message: impl Into<String>) -> Self {
        self.success = false;
        self.level = AuditLevel::Error;
        self.error_message = Some(message.into());
        self
    }

    /// Set the outcome from an optional error message.
    pub fn outcome(self, error: Option<&str>) -> Self {
        match error {
            Some(message) => self.failed(message),
            None => self,
        }
    }

    pub fn meta(mut self, key: &str, value: impl Into<Value>) -> Self {
        self.metadata
            .get_or_insert_with(Map::new)
            .insert(key.to_string(), value.into());
        self
    }
}

#[derive(Debug, Clone)]
pub struct AuditConfig {
    pub path: PathBuf,
    pub rotation_size: u64,
    pub retention_days: u64,
    pub queue_size: usize,
    pub sweep_interval: Duration,
}

impl AuditConfig {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            rotation_size: DEFAULT_ROTATION_SIZE,
            retention_days: DEFAULT_RETENTION_DAYS,
            queue_size: DEFAULT_QUEUE_SIZE,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
        }
    }
}

/// Query filters. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AuditFilters {
    pub start: Option<DateTime<Utc>>,
    pub end: Option<DateTime<Utc>>,
    pub operation_type: Option<OperationType>,
    pub level: Option<AuditLevel>,
    pub success: Option<bool>,
    pub user: Option<String>,
    pub resource: Option<String>,
    /// Maximum number of entries returned; 0 means no limit.
    #[serde(default)]
    pub limit: usize,
}

impl AuditFilters {
    pub fn matches(&self, entry: &AuditEntry) -> bool {
        self.start.map_or(true, |t| entry.timestamp >= t)
            && self.end.map_or(true, |t| entry.timestamp <= t)
            && self.operation_type.map_or(true, |op| op == entry.operation_type)
            && self.level.map_or(true, |l| l == entry.level)
            && self.success.map_or(true, |s| s == entry.success)
            && self
                .user
                .as_ref()
                .map_or(true, |u| entry.user.as_ref() == Some(u))
            && self
                .resource
                .as_ref()
                .map_or(true, |r| entry.resource.as_ref() == Some(r))
    }
}

struct FileState {
    file: Option<File>,
    size: u64,
}

/// Owns the file. Shared by the logger handle, the queue consumer and the
/// sweeper.
struct Writer {
    config: AuditConfig,
    state: Mutex<FileState>,
}

fn open_append(path: &Path) -> std::io::Result<(File, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let size = file.metadata()?.len();
    Ok((file, size))
}

impl Writer {
    fn write(&self, entry: &AuditEntry) -> Result<()> {
        let mut line = serde_json::to_vec(entry)?;
        line.push(b'\n');

        let mut state = self.state.lock();
        if state.size >= self.config.rotation_size || state.file.is_none() {
            self.rotate(&mut state)?;
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(&line)?;
            file.flush()?;
        }
        state.size += line.len() as u64;
        Ok(())
    }

    fn rotate(&self, state: &mut FileState) -> Result<()> {
        let path = &self.config.path;
        if state.file.take().is_some() && path.exists() && state.size > 0 {
            let target = rotated_name(path, Utc::now());
            fs::rename(path, &target)?;
            debug!(target = %target.display(), "audit log rotated");
        }
        let (file, size) = open_append(path)?;
        state.file = Some(file);
        state.size = size;
        Ok(())
    }

    fn sync(&self) {
        if let Some(file) = self.state.lock().file.as_ref() {
            if let Err(e) = file.sync_all() {
                warn!(error = %e, "failed to sync audit log");
            }
        }
    }

    /// Files belonging to this log: the current one and every rotation.
    fn log_files(&self) -> Vec<PathBuf> {
        let path = &self.config.path;
        let mut files = rotated_files(path);
        files.sort();
        if path.exists() {
            files.push(path.clone());
        }
        files
    }

    fn sweep(&self) -> usize {
        let retention = Duration::from_secs(self.config.retention_days * 24 * 60 * 60);
        let now = SystemTime::now();
        let mut removed = 0;
        for file in rotated_files(&self.config.path) {
            let expired = fs::metadata(&file)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|modified| now.duration_since(modified).ok())
                .is_some_and(|age| age > retention);
            if !expired {
                continue;
            }
            match fs::remove_file(&file) {
                Ok(()) => {
                    debug!(file = %file.display(), "removed expired audit log");
                    removed += 1;
                }
                Err(e) => warn!(file = %file.display(), error = %e, "failed to remove audit log"),
            }
        }
        removed
    }
}

fn rotated_name(path: &Path, now: DateTime<Utc>) -> PathBuf {
    let stamp = now.format("%Y%m%d-%H%M%S").to_string();
    let mut attempt = 0;
    loop {
        let mut name: OsString = path.as_os_str().to_os_string();
        name.push(".");
        name.push(&stamp);
        if attempt > 0 {
            name.push(format!("-{attempt}"));
        }
        let candidate = PathBuf::from(name);
        if !candidate.exists() {
            return candidate;
        }
        attempt += 1;
    }
}

fn rotated_files(path: &Path) -> Vec<PathBuf> {
    let Some(base) = path.file_name().map(|n| n.to_string_lossy().into_owned()) else {
        return Vec::new();
    };
    let prefix = format!("{base}.");
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
        _ => PathBuf::from("."),
    };
    let Ok(entries) = fs::read_dir(&dir) else {
        return Vec::new();
    };
    entries
        .filter_map(|e| e.ok())
        .filter(|e| e.file_name().to_string_lossy().starts_with(&prefix))
        .map(|e| e.path())
        .collect()
}

struct Inner {
    writer: Arc<Writer>,
    queue: Mutex<Option<mpsc::Sender<AuditEntry>>>,
    consumer: Mutex<Option<JoinHandle<()>>>,
    cancel: CancellationToken,
}

impl Drop for Inner {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Handle to the audit trail. Cheap to clone; a disabled logger drops
/// every entry.
#[derive(Clone, Default)]
pub struct AuditLogger {
    inner: Option<Arc<Inner>>,
}

impl std::fmt::Debug for AuditLogger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditLogger")
            .field("path", &self.inner.as_ref().map(|i| &i.writer.config.path))
            .finish()
    }
}

impl AuditLogger {
    /// A logger that records nothing.
    pub fn disabled() -> Self {
        Self { inner: None }
    }

    /// Open (or create) the log file and start the background workers when a
    /// Tokio runtime is available.
    pub fn open(config: AuditConfig) -> Result<Self> {
        if let Some(parent) = config.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        let (file, size) = open_append(&config.path)?;
        let writer = Arc::new(Writer {
            config,
            state: Mutex::new(FileState {
                file: Some(file),
                size,
            }),
        });
        let cancel = CancellationToken::new();

        let (queue, consumer) = match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                let (tx, mut rx) = mpsc::channel::<AuditEntry>(writer.config.queue_size.max(1));
                let consumer_writer = Arc::clone(&writer);
                let consumer = handle.spawn_blocking(move || {
                    while let Some(entry) = rx.blocking_recv() {
                        if let Err(e) = consumer_writer.write(&entry) {
                            error!(error = %e, "failed to write audit entry");
                        }
                    }
                    consumer_writer.sync();
                });

                let sweeper = Arc::clone(&writer);
                let token = cancel.clone();
                let period = writer.config.sweep_interval;
                handle.spawn(async move {
                    let mut ticker = tokio::time::interval(period);
                    loop {
                        tokio::select! {
                            _ = token.cancelled() => break,
                            _ = ticker.tick() => {
                                let sweeper = Arc::clone(&sweeper);
                                let _ = tokio::task::spawn_blocking(move || sweeper.sweep()).await;
                            }
                        }
                    }
                });
                (Some(tx), Some(consumer))
            }
            Err(_) => (None, None),
        };

        Ok(Self {
            inner: Some(Arc::new(Inner {
                writer,
                queue: Mutex::new(queue),
                consumer: Mutex::new(consumer),
                cancel,
            })),
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.inner.is_some()
    }

    /// Record an entry. Never fails; write errors are reported via tracing.
    pub fn log(&self, entry: AuditEntry) {
        let Some(inner) = &self.inner else {
            return;
        };
        let fallback = {
            let queue = inner.queue.lock();
            match queue.as_ref() {
                Some(tx) => match tx.try_send(entry) {
                    Ok(()) => None,
                    Err(TrySendError::Full(entry)) => {
                        debug!("audit queue full, writing synchronously");
                        Some(entry)
                    }
                    Err(TrySendError::Closed(entry)) => Some(entry),
                },
                None => Some(entry),
            }
        };
        if let Some(entry) = fallback {
            if let Err(e) = inner.writer.write(&entry) {
                error!(error = %e, "failed to write audit entry");
            }
        }
    }

    pub fn log_api_call(
        &self,
        method: &str,
        endpoint: &str,
        resource_id: Option<String>,
        duration: Duration,
        error: Option<&str>,
    ) {
        self.log(
            AuditEntry::new(OperationType::ApiCall, "api", method)
                .resource(endpoint, resource_id)
                .duration(duration)
                .outcome(error),
        );
    }

    pub fn log_database_change(
        &self,
        action: &str,
        table: &str,
        record_id: Option<String>,
        error: Option<&str>,
    ) {
        self.log(
            AuditEntry::new(OperationType::DbChange, "database", action)
                .resource(table, record_id)
                .outcome(error),
        );
    }

    #[allow(clippy::too_many_arguments)]
    pub fn log_sync(
        &self,
        operation: OperationType,
        source: &str,
        correlation_id: &str,
        items: u64,
        errors: u64,
        duration: Duration,
        error: Option<&str>,
    ) {
        self.log(
            AuditEntry::new(operation, source, "sync")
                .resource("SyncHistory", Some(correlation_id.to_string()))
                .duration(duration)
                .meta("items_processed", items)
                .meta("error_count", errors)
                .outcome(error),
        );
    }

    pub fn log_action(&self, name: &str, kind: &str, duration: Duration, error: Option<&str>) {
        self.log(
            AuditEntry::new(OperationType::ScheduledJob, "actions", kind)
                .resource("action", Some(name.to_string()))
                .duration(duration)
                .outcome(error),
        );
    }

    pub fn log_config(&self, action: &str, detail: &str, level: AuditLevel) {
        self.log(
            AuditEntry::new(OperationType::Config, "config", action)
                .level(level)
                .meta("detail", detail),
        );
    }

    /// Read matching entries from the current and rotated files, newest first.
    pub fn query(&self, filters: &AuditFilters) -> Result<Vec<AuditEntry>> {
        let Some(inner) = &self.inner else {
            return Ok(Vec::new());
        };
        let mut out = Vec::new();
        for path in inner.writer.log_files() {
            let file = match File::open(&path) {
                Ok(f) => f,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            for line in BufReader::new(file).lines() {
                let line = line?;
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AuditEntry>(&line) {
                    Ok(entry) if filters.matches(&entry) => out.push(entry),
                    Ok(_) => {}
                    Err(e) => debug!(file = %path.display(), error = %e, "skipping malformed audit line"),
                }
            }
        }
        out.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        if filters.limit > 0 {
            out.truncate(filters.limit);
        }
        Ok(out)
    }

    /// Delete rotated files past the retention window. Returns how many.
    pub fn sweep(&self) -> usize {
        self.inner.as_ref().map_or(0, |i| i.writer.sweep())
    }

    /// Stop accepting queued entries and wait for the queue to drain.
    /// Later entries are written synchronously.
    pub async fn close(&self) {
        let Some(inner) = &self.inner else {
            return;
        };
        inner.cancel.cancel();
        drop(inner.queue.lock().take());
        let consumer = inner.consumer.lock().take();
        if let Some(handle) = consumer {
            if let Err(e) = handle.await {
                error!(error = %e, "audit consumer stopped abnormally");
            }
        }
        inner.writer.sync();
    }
}

/// A [`RemoteApi`] wrapper that records an `API_CALL` entry per call.
pub struct AuditedApi {
    inner: Arc<dyn RemoteApi>,
    audit: AuditLogger,
}

impl AuditedApi {
    pub fn new(inner: Arc<dyn RemoteApi>, audit: AuditLogger) -> Self {
        Self { inner, audit }
    }

    fn record<T>(
        &self,
        method: &str,
        endpoint: &str,
        id: Option<i64>,
        started: Instant,
        result: &ApiResult<T>,
    ) {
        let error = result.as_ref().err().map(|e| e.to_string());
        self.audit.log_api_call(
            method,
            endpoint,
            id.map(|i| i.to_string()),
            started.elapsed(),
            error.as_deref(),
        );
    }
}

#[async_trait]
impl RemoteApi for AuditedApi {
    async fn list_ids(&self, entity: Entity) -> ApiResult<Vec<i64>> {
        let started = Instant::now();
        let result = self.inner.list_ids(entity).await;
        self.record("GET", entity.source(), None, started, &result);
        result
    }

    async fn get_detail(&self, entity: Entity, id: i64) -> ApiResult<Record> {
        let started = Instant::now();
        let result = self.inner.get_detail(entity, id).await;
        self.record("GET", entity.source(), Some(id), started, &result);
        result
    }

    async fn list_checkins_for_account(&self, account_id: i64) -> ApiResult<Vec<Record>> {
        let started = Instant::now();
        let result = self.inner.list_checkins_for_account(account_id).await;
        self.record("GET", "checkins", Some(account_id), started, &result);
        result
    }

    async fn list_routes(&self) -> ApiResult<Vec<Record>> {
        let started = Instant::now();
        let result = self.inner.list_routes().await;
        self.record("GET", "routes", None, started, &result);
        result
    }

    async fn get_profile(&self) -> ApiResult<Record> {
        let started = Instant::now();
        let result = self.inner.get_profile().await;
        self.record("GET", "profiles", None, started, &result);
        result
    }

    async fn create(&self, entity: Entity, fields: &FieldMap) -> ApiResult<Record> {
        let started = Instant::now();
        let result = self.inner.create(entity, fields).await;
        self.record("POST", entity.source(), None, started, &result);
        result
    }

    async fn update(&self, entity: Entity, id: i64, fields: &FieldMap) -> ApiResult<Record> {
        let started = Instant::now();
        let result = self.inner.update(entity, id, fields).await;
        self.record("PATCH", entity.source(), Some(id), started, &result);
        result
    }

    async fn delete(&self, entity: Entity, id: i64) -> ApiResult<()> {
        let started = Instant::now();
        let result = self.inner.delete(entity, id).await;
        self.record("DELETE", entity.source(), Some(id), started, &result);
        result
    }

    async fn get_raw(&self, endpoint: &str) -> ApiResult<String> {
        let started = Instant::now();
        let result = self.inner.get_raw(endpoint).await;
        self.record("GET", endpoint, None, started, &result);
        result
    }
}
