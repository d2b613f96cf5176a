use async_trait::async_trait;
use tokio::sync::Mutex;
use tracing::debug;

use super::Event;

/// Observer of published protocol events.
///
/// Listeners must tolerate side effects from other listeners; no ordering is
/// guaranteed across them. A slow listener slows the protocol down, so
/// anything expensive should hand the event off to its own task.
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &Event);
}

/// Forwards every published event to [`tracing`] at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingEventListener;

#[async_trait]
impl EventListener for TracingEventListener {
    async fn on_event(&self, event: &Event) {
        let actions: Vec<&str> = event.actions.iter().map(|a| a.name.as_str()).collect();
        debug!(
            event_id = %event.id,
            lock_id = %event.lock_id,
            storage = %event.storage_name,
            owner_id = event.owner_id.as_deref().unwrap_or(""),
            event_type = ?event.event_type,
            actions = ?actions,
            "lock event"
        );
    }
}

/// Buffers every published event; lets tests assert on the stream.
#[derive(Debug, Default)]
pub struct CollectingEventListener {
    events: Mutex<Vec<Event>>,
}

impl CollectingEventListener {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// A snapshot of the events published so far.
    pub async fn events(&self) -> Vec<Event> {
        self.events.lock().await.clone()
    }

    /// Names of all actions published so far, in publish order.
    pub async fn action_names(&self) -> Vec<String> {
        self.events
            .lock()
            .await
            .iter()
            .flat_map(|e| e.actions.iter().map(|a| a.name.clone()))
            .collect()
    }
}

#[async_trait]
impl EventListener for CollectingEventListener {
    async fn on_event(&self, event: &Event) {
        self.events.lock().await.push(event.clone());
    }
}
