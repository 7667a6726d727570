//! Notifications produced by the state core.

use parley_shared::{PeerId, UserAuth};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::broadcast;

pub const EVENT_SAVE: &str = "save";
pub const EVENT_PEER_NEEDED: &str = "peer_needed";
pub const EVENT_PEER_UNNEEDED: &str = "peer_unneeded";
pub const EVENT_SETTINGS_UPDATED: &str = "settings_updated";
pub const EVENT_USER_AUTH: &str = "user_auth";

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SettingsUpdatedPayload {
    /// Full dot-separated path that changed.
    pub key: String,
    pub value: Value,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum StateEvent {
    /// A batch of top-level keys reached the store.
    Save { keys: Vec<String> },
    PeerNeeded(PeerId),
    PeerUnneeded(PeerId),
    SettingsUpdated(SettingsUpdatedPayload),
    UserAuth(UserAuth),
}

impl StateEvent {
    pub fn name(&self) -> &'static str {
        match self {
            StateEvent::Save { .. } => EVENT_SAVE,
            StateEvent::PeerNeeded(_) => EVENT_PEER_NEEDED,
            StateEvent::PeerUnneeded(_) => EVENT_PEER_UNNEEDED,
            StateEvent::SettingsUpdated(_) => EVENT_SETTINGS_UPDATED,
            StateEvent::UserAuth(_) => EVENT_USER_AUTH,
        }
    }
}

/// Fan-out of [`StateEvent`]s to every subscriber.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<StateEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StateEvent> {
        self.tx.subscribe()
    }

    /// Nobody listening is fine; the event is dropped.
    pub fn emit(&self, event: StateEvent) {
        let name = event.name();
        if self.tx.send(event).is_err() {
            tracing::trace!(event = name, "no subscribers for event");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
