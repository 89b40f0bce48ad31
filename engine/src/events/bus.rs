//! Broadcast bus for routing events
//!
//! Publishing never blocks and never fails the request path: with no
//! subscribers the event is dropped, and slow subscribers see
//! `RecvError::Lagged` rather than back-pressuring the engine.

use std::sync::Arc;

use tokio::sync::broadcast;
use tracing::debug;

use super::types::RoutingEvent;

/// Channel capacity for broadcast
const CHANNEL_CAPACITY: usize = 256;

/// Shared reference to EventBus
pub type SharedEventBus = Arc<EventBus>;

pub struct EventBus {
    sender: broadcast::Sender<RoutingEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(CHANNEL_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    /// Create a shared reference to this event bus
    pub fn shared(self) -> SharedEventBus {
        Arc::new(self)
    }

    /// Publish an event to all current subscribers
    pub fn publish(&self, event: RoutingEvent) {
        let event_type = event.event_type();
        match self.sender.send(event) {
            Ok(receivers) => debug!(event_type, receivers, "Event published"),
            Err(_) => debug!(event_type, "Event published (no receivers)"),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<RoutingEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}
