//! # Event Publisher
//!
//! Publishing side of the bus. Events are fanned out over a
//! `tokio::sync::broadcast` channel; an event whose topic has no live
//! subscription is counted and dropped without touching the channel.

use crate::events::{EventFilter, EventTopic, ProtocolEvent};
use crate::subscriber::{EventStream, EventSubscriber, Subscription, TopicInterest};
use crate::DEFAULT_CHANNEL_CAPACITY;
use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, trace};

#[async_trait]
pub trait EventPublisher: Send + Sync {
    /// Publish `event`. Returns how many receivers it was handed to.
    async fn publish(&self, event: ProtocolEvent) -> usize;

    /// Events published since creation, heard or not.
    fn events_published(&self) -> u64;
}

/// In-process bus shared by the manager, the runtime and the app layer.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<ProtocolEvent>,
    interest: Arc<TopicInterest>,
    published: AtomicU64,
    /// Published while no subscription covered their topic.
    unheard: AtomicU64,
    capacity: usize,
}

impl InMemoryEventBus {
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// `capacity` events are buffered per subscriber before the oldest drop.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            interest: Arc::new(TopicInterest::default()),
            published: AtomicU64::new(0),
            unheard: AtomicU64::new(0),
            capacity: capacity.max(1),
        }
    }

    #[must_use]
    pub fn subscribe(&self, filter: EventFilter) -> Subscription {
        debug!(topics = ?filter.topics, owners = filter.owned_identities.len(), "New subscription");
        Subscription::new(self.sender.subscribe(), filter, Arc::clone(&self.interest))
    }

    #[must_use]
    pub fn event_stream(&self, filter: EventFilter) -> EventStream {
        EventStream::new(self.subscribe(filter))
    }

    /// Live subscriptions of any kind.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Live subscriptions that would see events of `topic`.
    #[must_use]
    pub fn listeners(&self, topic: EventTopic) -> usize {
        self.interest.listeners(topic)
    }

    #[must_use]
    pub fn unheard_events(&self) -> u64 {
        self.unheard.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventPublisher for InMemoryEventBus {
    async fn publish(&self, event: ProtocolEvent) -> usize {
        let topic = event.topic();
        self.published.fetch_add(1, Ordering::Relaxed);

        if self.interest.listeners(topic) == 0 {
            self.unheard.fetch_add(1, Ordering::Relaxed);
            trace!(?topic, "No subscription for topic, event dropped");
            return 0;
        }

        // The last listener can drop between the check and the send.
        let receivers = self.sender.send(event).unwrap_or(0);
        debug!(?topic, receivers, "Event published");
        receivers
    }

    fn events_published(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }
}

impl EventSubscriber for InMemoryEventBus {
    fn subscribe(&self, filter: EventFilter) -> Subscription {
        InMemoryEventBus::subscribe(self, filter)
    }
}
