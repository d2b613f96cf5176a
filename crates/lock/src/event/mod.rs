//! Hierarchical, action-tagged events emitted throughout the lock protocol.
//!
//! Every public operation opens a root [`Event`] tagged with the lock id,
//! the storage name and (when known) the owner. Sub-operations [`fork`] a
//! child event that inherits that context; each event collects ordered
//! [`Action`]s and is published to the registered listeners when its logical
//! step completes. Listeners see the full tree via `parent_id` links.
//!
//! [`fork`]: Event::fork

pub mod actions;
mod listener;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use latch_storage::info::LockInformation;

pub use listener::{CollectingEventListener, EventListener, TracingEventListener};

/// Which public operation an event tree belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Lock,
    Unlock,
    CreateLock,
    VersionMiss,
    #[default]
    Unknown,
}

/// One step within an event: a name from [`actions`], a timestamp, and
/// optionally a payload and an error.
#[derive(Debug, Clone, Serialize)]
pub struct Action {
    pub name: String,
    pub time: DateTime<Utc>,
    #[serde(skip_serializing_if = "serde_json::Map::is_empty")]
    pub payload: serde_json::Map<String, serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl Action {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            time: Utc::now(),
            payload: serde_json::Map::new(),
            error: None,
        }
    }

    /// Attach a payload entry. Values that fail to serialize are recorded as
    /// `null` rather than dropping the action.
    #[must_use]
    pub fn with_payload(mut self, key: &str, value: impl Serialize) -> Self {
        let value = serde_json::to_value(value).unwrap_or(serde_json::Value::Null);
        self.payload.insert(key.to_owned(), value);
        self
    }

    #[must_use]
    pub fn with_error(mut self, error: &impl std::fmt::Display) -> Self {
        self.error = Some(error.to_string());
        self
    }
}

/// A node in the event tree.
#[derive(Clone, Serialize)]
pub struct Event {
    pub id: String,
    pub parent_id: Option<String>,
    pub event_type: EventType,
    pub lock_id: String,
    pub storage_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub owner_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub watch_dog_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub lock_information: Option<LockInformation>,
    pub start_time: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub end_time: Option<DateTime<Utc>>,
    pub actions: Vec<Action>,
    #[serde(skip)]
    listeners: Arc<[Arc<dyn EventListener>]>,
}

impl std::fmt::Debug for Event {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Event")
            .field("id", &self.id)
            .field("parent_id", &self.parent_id)
            .field("event_type", &self.event_type)
            .field("lock_id", &self.lock_id)
            .field("storage_name", &self.storage_name)
            .field("owner_id", &self.owner_id)
            .field("watch_dog_id", &self.watch_dog_id)
            .field("actions", &self.actions)
            .finish_non_exhaustive()
    }
}

fn event_id() -> String {
    format!("event-{}", Uuid::new_v4().simple())
}

impl Event {
    #[must_use]
    pub fn new(lock_id: impl Into<String>) -> Self {
        Self {
            id: event_id(),
            parent_id: None,
            event_type: EventType::Unknown,
            lock_id: lock_id.into(),
            storage_name: String::new(),
            owner_id: None,
            watch_dog_id: None,
            lock_information: None,
            start_time: Utc::now(),
            end_time: None,
            actions: Vec::new(),
            listeners: Vec::new().into(),
        }
    }

    /// A child event inheriting this event's context. The child gets its own
    /// id and timestamps; `parent_id` links it back.
    #[must_use]
    pub fn fork(&self) -> Self {
        Self {
            id: event_id(),
            parent_id: Some(self.id.clone()),
            event_type: self.event_type,
            lock_id: self.lock_id.clone(),
            storage_name: self.storage_name.clone(),
            owner_id: self.owner_id.clone(),
            watch_dog_id: self.watch_dog_id.clone(),
            lock_information: self.lock_information.clone(),
            start_time: Utc::now(),
            end_time: None,
            actions: Vec::new(),
            listeners: Arc::clone(&self.listeners),
        }
    }

    #[must_use]
    pub fn with_type(mut self, event_type: EventType) -> Self {
        self.event_type = event_type;
        self
    }

    #[must_use]
    pub fn with_storage_name(mut self, storage_name: impl Into<String>) -> Self {
        self.storage_name = storage_name.into();
        self
    }

    #[must_use]
    pub fn with_owner_id(mut self, owner_id: impl Into<String>) -> Self {
        self.owner_id = Some(owner_id.into());
        self
    }

    #[must_use]
    pub fn with_watch_dog_id(mut self, watch_dog_id: impl Into<String>) -> Self {
        self.watch_dog_id = Some(watch_dog_id.into());
        self
    }

    #[must_use]
    pub fn with_lock_information(mut self, info: LockInformation) -> Self {
        self.lock_information = Some(info);
        self
    }

    #[must_use]
    pub fn with_listeners(mut self, listeners: Vec<Arc<dyn EventListener>>) -> Self {
        self.listeners = listeners.into();
        self
    }

    #[must_use]
    pub fn action(mut self, action: Action) -> Self {
        self.actions.push(action);
        self
    }

    /// Publish this event to every registered listener. The end time is
    /// stamped if not already set. Listeners run in registration order but
    /// must not rely on any ordering across listeners.
    pub async fn publish(mut self) {
        if self.end_time.is_none() {
            self.end_time = Some(Utc::now());
        }
        let listeners = Arc::clone(&self.listeners);
        for listener in listeners.iter() {
            listener.on_event(&self).await;
        }
    }

    /// Fork, tag with a single action, and publish. The workhorse for
    /// leaf-level protocol steps.
    pub async fn emit(&self, action: Action) {
        self.fork().action(action).publish().await;
    }
}
