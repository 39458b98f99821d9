//! # Badger Engine
//!
//! Bidirectional sync between a remote CRM API and a local relational store.
//!
//! The engine owns sequencing, concurrency bounding and the consistency of
//! the pending-change ledger. It talks to the outside world only through two
//! collaborator traits, [`RemoteApi`] and [`Store`], so concrete HTTP clients
//! and SQL backends live elsewhere.
//!
//! ## Components
//!
//! - [`PullOrchestrator`] fetches remote collections and merges them into the
//!   store, fanning out over at most `max_concurrent_requests` workers.
//! - [`OutboxProcessor`] replays pending changes one by one and walks each
//!   through `pending -> processing -> completed | failed`.
//! - [`EventDispatcher`] delivers lifecycle [`Event`]s to in-process listeners
//!   and launches the configured [`EventAction`]s without waiting for them.
//! - [`ActionExecutor`] runs a single `db`, `api` or `exec` action, with
//!   `$EVENT_PAYLOAD[path]` style tokens resolved from the triggering event.
//! - [`SyncCoordinator`] wraps full pull and push runs in a
//!   [`SyncHistoryEntry`] and an audit record.
//! - [`AuditLogger`] appends JSON lines to a size-rotated file.
//!
//! ## Events
//!
//! ```rust
//! use std::sync::{Arc, Mutex};
//! use badger_engine::{Event, EventDispatcher, EventType};
//!
//! let dispatcher = EventDispatcher::new();
//! let seen = Arc::new(Mutex::new(Vec::new()));
//!
//! let sink = Arc::clone(&seen);
//! dispatcher.subscribe(EventType::PullComplete, move |event| {
//!     sink.lock().unwrap().push(event.source.clone());
//! });
//!
//! dispatcher.dispatch(Event::new(EventType::PullComplete, "routes"));
//! assert_eq!(*seen.lock().unwrap(), vec!["routes".to_string()]);
//! ```

pub mod action;
pub mod api;
pub mod audit;
pub mod change;
pub mod config;
pub mod coordinator;
pub mod dispatcher;
pub mod error;
pub mod event;
pub mod history;
pub mod progress;
pub mod pull;
pub mod push;
pub mod record;
pub mod store;
pub mod token;

// Re-export main types at crate root
pub use action::{parse_action_shorthand, Action, ActionConfig, ActionExecutor, EventAction, Execute};
pub use api::RemoteApi;
pub use audit::{
    AuditConfig, AuditEntry, AuditFilters, AuditLevel, AuditLogger, AuditedApi, OperationType,
};
pub use change::{
    ChangeFilter, ChangeOrderBy, ChangeScope, ChangeStatus, ChangeType, FieldMap, PendingChange,
};
pub use config::SyncConfig;
pub use coordinator::{RunRequest, SyncCoordinator};
pub use dispatcher::EventDispatcher;
pub use error::{ApiError, Error, Result, StoreError};
pub use event::{Event, EventType};
pub use history::{Direction, RunStatus, SyncHistoryEntry};
pub use progress::{NoProgress, ProgressSink};
pub use pull::{BatchReport, NoObserver, PullObserver, PullOrchestrator};
pub use push::{OutboxProcessor, PushReport};
pub use record::{Entity, Record};
pub use store::{Dialect, Row, SqlValue, Store};
pub use token::ExecutionContext;
