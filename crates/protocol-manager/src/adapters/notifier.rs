//! Notification adapters.
//!
//! Implements `ProtocolNotifier` using the event bus.

use crate::ports::outbound::ProtocolNotifier;
use async_trait::async_trait;
use shared_bus::{EventPublisher, InMemoryEventBus, ProtocolEvent};
use std::sync::Arc;
use tracing::trace;

/// Publishes notifications on the shared event bus.
pub struct EventBusNotifier {
    event_bus: Arc<InMemoryEventBus>,
}

impl EventBusNotifier {
    pub fn new(event_bus: Arc<InMemoryEventBus>) -> Self {
        Self { event_bus }
    }
}

#[async_trait]
impl ProtocolNotifier for EventBusNotifier {
    async fn notify(&self, event: ProtocolEvent) {
        let receivers = self.event_bus.publish(event).await;
        if receivers == 0 {
            trace!("No subscribers for protocol notification");
        }
    }
}

/// In-memory mock notifier for testing.
#[derive(Default)]
pub struct RecordingNotifier {
    events: parking_lot::RwLock<Vec<ProtocolEvent>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// All notifications so far, oldest first.
    pub fn events(&self) -> Vec<ProtocolEvent> {
        self.events.read().clone()
    }

    pub fn clear(&self) {
        self.events.write().clear();
    }
}

#[async_trait]
impl ProtocolNotifier for RecordingNotifier {
    async fn notify(&self, event: ProtocolEvent) {
        self.events.write().push(event);
    }
}
