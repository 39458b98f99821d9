//! Sync lifecycle events.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Lifecycle tag of an [`Event`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventType {
    PullStart,
    ResourceIdsFetched,
    FetchDetailStart,
    FetchDetailSuccess,
    StoreSuccess,
    PullError,
    PullComplete,
    PullGroupStart,
    PullGroupComplete,
    PullGroupError,
    PullAllStart,
    PullAllComplete,
    PullAllError,
    PushScanStart,
    PushScanComplete,
    PushItemStart,
    PushItemSuccess,
    PushItemError,
    PushError,
    PushComplete,
    ActionStart,
    ActionSuccess,
    ActionError,
    ActionConfigCreated,
    ActionConfigUpdated,
    ActionConfigDeleted,
    SyncHistoryUpdated,
}

impl EventType {
    /// Every event type, in declaration order.
    pub const ALL: [EventType; 27] = [
        EventType::PullStart,
        EventType::ResourceIdsFetched,
        EventType::FetchDetailStart,
        EventType::FetchDetailSuccess,
        EventType::StoreSuccess,
        EventType::PullError,
        EventType::PullComplete,
        EventType::PullGroupStart,
        EventType::PullGroupComplete,
        EventType::PullGroupError,
        EventType::PullAllStart,
        EventType::PullAllComplete,
        EventType::PullAllError,
        EventType::PushScanStart,
        EventType::PushScanComplete,
        EventType::PushItemStart,
        EventType::PushItemSuccess,
        EventType::PushItemError,
        EventType::PushError,
        EventType::PushComplete,
        EventType::ActionStart,
        EventType::ActionSuccess,
        EventType::ActionError,
        EventType::ActionConfigCreated,
        EventType::ActionConfigUpdated,
        EventType::ActionConfigDeleted,
        EventType::SyncHistoryUpdated,
    ];

    /// The dotted name used in configuration and on the wire.
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::PullStart => "pull.start",
            EventType::ResourceIdsFetched => "pull.ids_fetched",
            EventType::FetchDetailStart => "pull.fetch_detail.start",
            EventType::FetchDetailSuccess => "pull.fetch_detail.success",
            EventType::StoreSuccess => "pull.store.success",
            EventType::PullError => "pull.error",
            EventType::PullComplete => "pull.complete",
            EventType::PullGroupStart => "pull.group.start",
            EventType::PullGroupComplete => "pull.group.complete",
            EventType::PullGroupError => "pull.group.error",
            EventType::PullAllStart => "pull.all.start",
            EventType::PullAllComplete => "pull.all.complete",
            EventType::PullAllError => "pull.all.error",
            EventType::PushScanStart => "push.scan.start",
            EventType::PushScanComplete => "push.scan.complete",
            EventType::PushItemStart => "push.item.start",
            EventType::PushItemSuccess => "push.item.success",
            EventType::PushItemError => "push.item.error",
            EventType::PushError => "push.error",
            EventType::PushComplete => "push.complete",
            EventType::ActionStart => "action.start",
            EventType::ActionSuccess => "action.success",
            EventType::ActionError => "action.error",
            EventType::ActionConfigCreated => "action.config.created",
            EventType::ActionConfigUpdated => "action.config.updated",
            EventType::ActionConfigDeleted => "action.config.deleted",
            EventType::SyncHistoryUpdated => "sync.history.updated",
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        EventType::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| format!("unknown event type: {s}"))
    }
}

impl Serialize for EventType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for EventType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// A dispatched event. Never persisted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    #[serde(rename = "type")]
    pub event_type: EventType,
    /// Logical subsystem, e.g. `"accounts"`.
    pub source: String,
    pub payload: Value,
}

impl Event {
    pub fn new(event_type: EventType, source: impl Into<String>) -> Self {
        Self {
            event_type,
            source: source.into(),
            payload: Value::Null,
        }
    }

    pub fn with_payload(mut self, payload: impl Into<Value>) -> Self {
        self.payload = payload.into();
        self
    }

    /// Attach any serializable payload. Serialization failures leave it null.
    pub fn with_data<T: Serialize>(mut self, data: &T) -> Self {
        self.payload = serde_json::to_value(data).unwrap_or(Value::Null);
        self
    }
}
