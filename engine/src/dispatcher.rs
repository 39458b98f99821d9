//! Event dispatcher: in-process listeners plus configured actions.
//!
//! `dispatch` takes a lock that serializes dispatch calls, launches every
//! matching configured action as its own task without waiting for it, then
//! runs the listeners for the event type synchronously in subscription order.
//! The lock is re-entrant so a listener may dispatch follow-up events.

use std::collections::HashMap;
use std::sync::{Arc, Weak};
use std::time::Instant;

use parking_lot::{ReentrantMutex, RwLock};
use serde_json::json;
use tracing::{debug, warn};

use crate::action::{ActionConfig, ActionExecutor, EventAction};
use crate::audit::AuditLogger;
use crate::config::SyncConfig;
use crate::event::{Event, EventType};
use crate::token::ExecutionContext;

/// An in-process event listener.
pub type Listener = Arc<dyn Fn(&Event) + Send + Sync>;

struct Inner {
    dispatch_lock: ReentrantMutex<()>,
    listeners: RwLock<HashMap<EventType, Vec<Listener>>>,
    any_listeners: RwLock<Vec<Listener>>,
    actions: Vec<EventAction>,
    executor: Option<ActionExecutor>,
    audit: AuditLogger,
}

/// Central pub/sub bus. Cloning shares the same listeners and actions.
#[derive(Clone)]
pub struct EventDispatcher {
    inner: Arc<Inner>,
}

impl Default for EventDispatcher {
    fn default() -> Self {
        Self::new()
    }
}

impl EventDispatcher {
    /// A dispatcher with listeners only and no configured actions.
    pub fn new() -> Self {
        Self::build(Vec::new(), None, AuditLogger::disabled())
    }

    /// A dispatcher that also runs the config's event actions.
    pub fn with_actions(config: &SyncConfig, executor: ActionExecutor, audit: AuditLogger) -> Self {
        Self::build(config.events.clone(), Some(executor), audit)
    }

    fn build(actions: Vec<EventAction>, executor: Option<ActionExecutor>, audit: AuditLogger) -> Self {
        Self {
            inner: Arc::new(Inner {
                dispatch_lock: ReentrantMutex::new(()),
                listeners: RwLock::new(HashMap::new()),
                any_listeners: RwLock::new(Vec::new()),
                actions,
                executor,
                audit,
            }),
        }
    }

    /// Register a listener for one event type.
    pub fn subscribe<F>(&self, event_type: EventType, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let _guard = self.inner.dispatch_lock.lock();
        self.inner
            .listeners
            .write()
            .entry(event_type)
            .or_default()
            .push(Arc::new(listener));
    }

    /// Register a listener for every event type. These run after the
    /// type-specific listeners.
    pub fn subscribe_all<F>(&self, listener: F)
    where
        F: Fn(&Event) + Send + Sync + 'static,
    {
        let _guard = self.inner.dispatch_lock.lock();
        self.inner.any_listeners.write().push(Arc::new(listener));
    }

    /// The configured event actions this dispatcher was built with.
    pub fn event_actions(&self) -> &[EventAction] {
        &self.inner.actions
    }

    pub fn audit(&self) -> &AuditLogger {
        &self.inner.audit
    }

    /// Deliver an event.
    pub fn dispatch(&self, event: Event) {
        let _guard = self.inner.dispatch_lock.lock();
        debug!(event = %event.event_type, source = %event.source, "dispatching event");

        self.launch_actions(&event);

        let mut listeners = self
            .inner
            .listeners
            .read()
            .get(&event.event_type)
            .cloned()
            .unwrap_or_default();
        listeners.extend(self.inner.any_listeners.read().iter().cloned());
        for listener in listeners {
            listener(&event);
        }
    }

    fn launch_actions(&self, event: &Event) {
        let Some(executor) = &self.inner.executor else {
            return;
        };
        let matching: Vec<(&str, &ActionConfig)> = self
            .inner
            .actions
            .iter()
            .filter(|entry| entry.matches(event))
            .flat_map(|entry| entry.run.iter().map(move |a| (entry.name.as_str(), a)))
            .collect();
        if matching.is_empty() {
            return;
        }
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(event = %event.event_type, "no async runtime, skipping triggered actions");
            return;
        };

        // Lifecycle events for actions triggered by lifecycle events would loop.
        let report = !matches!(
            event.event_type,
            EventType::ActionStart | EventType::ActionSuccess | EventType::ActionError
        );
        let ctx = ExecutionContext::from(event);
        for (name, config) in matching {
            let weak = Arc::downgrade(&self.inner);
            let executor = executor.clone();
            let config = config.clone();
            let name = name.to_string();
            let ctx = ctx.clone();
            runtime.spawn(async move {
                run_action(weak, executor, name, config, ctx, report).await;
            });
        }
    }

    /// Validate and launch a single action outside of event dispatch,
    /// reporting it through the action lifecycle events.
    pub fn run_action(&self, name: &str, config: ActionConfig, ctx: Option<ExecutionContext>) -> crate::Result<()> {
        config.validate()?;
        let executor = self
            .inner
            .executor
            .clone()
            .ok_or_else(|| crate::Error::ActionFailed("no action executor configured".into()))?;
        let runtime = tokio::runtime::Handle::try_current()
            .map_err(|e| crate::Error::ActionFailed(e.to_string()))?;
        let weak = Arc::downgrade(&self.inner);
        let name = name.to_string();
        let ctx = ctx.unwrap_or_default();
        runtime.spawn(async move {
            run_action(weak, executor, name, config, ctx, true).await;
        });
        Ok(())
    }
}

async fn run_action(
    dispatcher: Weak<Inner>,
    executor: ActionExecutor,
    name: String,
    config: ActionConfig,
    ctx: ExecutionContext,
    report: bool,
) {
    let emit = |event_type: EventType, extra: serde_json::Value| {
        if !report {
            return;
        }
        if let Some(inner) = dispatcher.upgrade() {
            let mut payload = json!({
                "name": name,
                "type": config.kind,
                "trigger": ctx.event_type,
            });
            if let (Some(obj), serde_json::Value::Object(extra)) = (payload.as_object_mut(), extra) {
                obj.extend(extra);
            }
            EventDispatcher { inner }.dispatch(Event::new(event_type, "actions").with_payload(payload));
        }
    };

    emit(EventType::ActionStart, json!({}));
    let started = Instant::now();
    let result = executor.execute(&config, Some(&ctx)).await;
    let elapsed = started.elapsed();

    let error = result.as_ref().err().map(|e| e.to_string());
    match &error {
        Some(message) => {
            warn!(action = %name, kind = %config.kind, error = %message, "action failed");
            emit(EventType::ActionError, json!({ "error": message }));
        }
        None => {
            debug!(action = %name, kind = %config.kind, "action succeeded");
            emit(EventType::ActionSuccess, json!({}));
        }
    }

    if let Some(inner) = dispatcher.upgrade() {
        inner
            .audit
            .log_action(&name, &config.kind, elapsed, error.as_deref());
    }
}
