//! Configuration lifecycle events
//!
//! Every profile creation and destruction is broadcast to all current
//! subscribers. Events are never stored; a subscriber that connects later
//! only sees what happens from then on.

use crate::credentials::Uid;
use crate::profile::ProfileId;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the event channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Lifecycle event kind
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Created,
    Destroyed,
}

impl EventType {
    /// Technical name, e.g. `CFG_CREATED`
    pub fn code(&self) -> &'static str {
        match self {
            EventType::Created => "CFG_CREATED",
            EventType::Destroyed => "CFG_DESTROYED",
        }
    }

    /// Human readable description
    pub fn description(&self) -> &'static str {
        match self {
            EventType::Created => "Configuration created",
            EventType::Destroyed => "Configuration destroyed",
        }
    }
}

/// A configuration lifecycle event
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfigEvent {
    pub id: ProfileId,
    pub kind: EventType,
    pub owner: Uid,
}

impl ConfigEvent {
    pub fn new(id: ProfileId, kind: EventType, owner: Uid) -> Self {
        Self { id, kind, owner }
    }
}

impl fmt::Display for ConfigEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}; owner: {}, id: {}",
            self.kind.description(),
            self.owner,
            self.id
        )
    }
}

/// Broadcast channel for lifecycle events
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<ConfigEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self { tx }
    }

    /// Subscribe to all future events
    pub fn subscribe(&self) -> broadcast::Receiver<ConfigEvent> {
        self.tx.subscribe()
    }

    /// Send an event to every subscriber
    pub fn publish(&self, event: ConfigEvent) {
        debug!("Event: {}", event);
        // Nobody listening is not an error
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
