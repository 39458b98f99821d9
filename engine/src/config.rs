//! Engine configuration: concurrency and event action bindings.
//!
//! A `SyncConfig` is a plain value handed to the dispatcher and coordinator at
//! construction. Reloading means building new ones from a freshly loaded
//! value. Mutations of the event action list re-save the whole file when the
//! config was loaded from disk.

use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::warn;

use crate::action::{ActionConfig, EventAction};
use crate::error::{Error, Result};
use crate::event::{Event, EventType};

/// Concurrency used when the configured value is out of range.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 5;

/// Upper bound for concurrent pull requests.
pub const MAX_CONCURRENT_REQUESTS_LIMIT: usize = 10;

fn default_concurrency() -> i64 {
    DEFAULT_MAX_CONCURRENT_REQUESTS as i64
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncConfig {
    #[serde(default = "default_concurrency")]
    pub max_concurrent_requests: i64,
    #[serde(default)]
    pub events: Vec<EventAction>,
    #[serde(skip)]
    path: Option<PathBuf>,
    #[serde(skip)]
    pruned: Vec<String>,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: default_concurrency(),
            events: Vec::new(),
            path: None,
            pruned: Vec::new(),
        }
    }
}

impl SyncConfig {
    /// Effective pull concurrency: `1..=10` is kept, anything else becomes 5.
    pub fn concurrency(&self) -> usize {
        clamp_concurrency(self.max_concurrent_requests)
    }

    /// Load from a JSON file, pruning invalid actions.
    ///
    /// A missing file yields the defaults. If anything was pruned the cleaned
    /// set is written back and the removals are available from [`Self::pruned`].
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut config = if path.exists() {
            let raw = fs::read_to_string(path)
                .map_err(|e| Error::from(e).context(format!("reading {}", path.display())))?;
            serde_json::from_str::<SyncConfig>(&raw)
                .map_err(|e| Error::from(e).context(format!("parsing {}", path.display())))?
        } else {
            SyncConfig::default()
        };
        config.path = Some(path.to_path_buf());

        for entry in &mut config.events {
            if entry.name.is_empty() {
                entry.name = EventAction::default_name(&entry.event, entry.source.as_deref());
            }
        }

        let removed = config.validate_and_prune();
        if !removed.is_empty() {
            for message in &removed {
                warn!(config = %path.display(), "{message}");
            }
            config.persist()?;
        }
        config.pruned = removed;
        Ok(config)
    }

    /// Write the whole config as pretty JSON.
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// File this config was loaded from, if any.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    /// Attach a file so later mutations are saved there.
    pub fn with_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.path = Some(path.into());
        self
    }

    /// Messages describing what [`Self::load`] pruned.
    pub fn pruned(&self) -> &[String] {
        &self.pruned
    }

    fn persist(&self) -> Result<()> {
        match &self.path {
            Some(path) => self.save(path),
            None => Ok(()),
        }
    }

    /// Drop invalid actions and entries left without actions.
    ///
    /// Returns one message per removal.
    pub fn validate_and_prune(&mut self) -> Vec<String> {
        let mut removed = Vec::new();
        self.events.retain_mut(|entry| {
            if let Err(e) = entry.event.parse::<EventType>() {
                removed.push(format!("removed event action '{}': {e}", entry.name));
                return false;
            }
            let mut index = 0;
            entry.run.retain(|action| {
                let keep = match action.validate() {
                    Ok(()) => true,
                    Err(e) => {
                        removed.push(format!(
                            "removed invalid action #{index} ('{}') from '{}': {e}",
                            action.kind, entry.name
                        ));
                        false
                    }
                };
                index += 1;
                keep
            });
            if entry.run.is_empty() {
                removed.push(format!("removed event action '{}': no valid actions left", entry.name));
                return false;
            }
            true
        });
        removed
    }

    fn entry_mut(&mut self, name: &str) -> Result<&mut EventAction> {
        self.events
            .iter_mut()
            .find(|e| e.name == name)
            .ok_or_else(|| Error::EventActionNotFound(name.to_string()))
    }

    /// Append an action to the entry for `event`/`source`, creating it if needed.
    ///
    /// Returns the `action.config.*` event describing the change.
    pub fn add_event_action(
        &mut self,
        event: &str,
        source: Option<&str>,
        action: ActionConfig,
    ) -> Result<Event> {
        event
            .parse::<EventType>()
            .map_err(Error::InvalidAction)?;
        action.validate()?;
        let source = source.map(str::trim).filter(|s| !s.is_empty());

        let existing = self
            .events
            .iter_mut()
            .find(|e| e.event == event && e.source.as_deref() == source);
        let (kind, name, index) = match existing {
            Some(entry) => {
                entry.run.push(action);
                (EventType::ActionConfigUpdated, entry.name.clone(), entry.run.len() - 1)
            }
            None => {
                let name = EventAction::default_name(event, source);
                self.events.push(EventAction {
                    name: name.clone(),
                    event: event.to_string(),
                    source: source.map(str::to_string),
                    run: vec![action],
                });
                (EventType::ActionConfigCreated, name, 0)
            }
        };
        self.persist()?;
        Ok(config_event(kind, &name, index))
    }

    /// Replace the action at `index` of entry `name`.
    pub fn update_event_action(
        &mut self,
        name: &str,
        index: usize,
        action: ActionConfig,
    ) -> Result<Event> {
        action.validate()?;
        let entry = self.entry_mut(name)?;
        let slot = entry
            .run
            .get_mut(index)
            .ok_or_else(|| Error::InvalidActionIndex {
                name: name.to_string(),
                index,
            })?;
        *slot = action;
        self.persist()?;
        Ok(config_event(EventType::ActionConfigUpdated, name, index))
    }

    /// Remove the action at `index` of entry `name`; an entry left empty is
    /// removed entirely.
    pub fn remove_event_action(&mut self, name: &str, index: usize) -> Result<Event> {
        let entry = self.entry_mut(name)?;
        if index >= entry.run.len() {
            return Err(Error::InvalidActionIndex {
                name: name.to_string(),
                index,
            });
        }
        entry.run.remove(index);
        if entry.run.is_empty() {
            self.events.retain(|e| e.name != name);
        }
        self.persist()?;
        Ok(config_event(EventType::ActionConfigDeleted, name, index))
    }
}

fn config_event(kind: EventType, name: &str, index: usize) -> Event {
    Event::new(kind, "events").with_payload(json!({ "name": name, "index": index }))
}

/// Clamp a configured concurrency to the supported range.
pub fn clamp_concurrency(value: i64) -> usize {
    if (1..=MAX_CONCURRENT_REQUESTS_LIMIT as i64).contains(&value) {
        value as usize
    } else {
        DEFAULT_MAX_CONCURRENT_REQUESTS
    }
}
