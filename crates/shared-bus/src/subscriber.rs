//! # Event Subscriber
//!
//! Receiving side of the bus. Each [`Subscription`] registers interest in its
//! topics for as long as it lives, which lets the bus skip events nobody can
//! see.

use crate::events::{EventFilter, EventTopic, ProtocolEvent};
use parking_lot::Mutex;
use shared_types::{FlowId, MessageIdentifier};
use std::collections::HashMap;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use thiserror::Error;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::Stream;
use tracing::{debug, trace};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("Event bus closed")]
    Closed,
}

pub trait EventSubscriber: Send + Sync {
    fn subscribe(&self, filter: EventFilter) -> Subscription;
}

// =============================================================================
// TOPIC INTEREST
// =============================================================================

/// Live subscriptions per topic. A filter without topics counts as `All`.
#[derive(Debug, Default)]
pub(crate) struct TopicInterest {
    counts: Mutex<HashMap<EventTopic, usize>>,
}

impl TopicInterest {
    fn registered_topics(filter: &EventFilter) -> Vec<EventTopic> {
        if filter.topics.is_empty() || filter.topics.contains(&EventTopic::All) {
            vec![EventTopic::All]
        } else {
            let mut topics = filter.topics.clone();
            topics.sort_by_key(|t| *t as u8);
            topics.dedup();
            topics
        }
    }

    fn register(&self, topics: &[EventTopic]) {
        let mut counts = self.counts.lock();
        for topic in topics {
            *counts.entry(*topic).or_insert(0) += 1;
        }
    }

    fn release(&self, topics: &[EventTopic]) {
        let mut counts = self.counts.lock();
        for topic in topics {
            if let Some(count) = counts.get_mut(topic) {
                *count = count.saturating_sub(1);
                if *count == 0 {
                    counts.remove(topic);
                }
            }
        }
    }

    /// Subscriptions whose topics include `topic`.
    pub(crate) fn listeners(&self, topic: EventTopic) -> usize {
        let counts = self.counts.lock();
        let all = counts.get(&EventTopic::All).copied().unwrap_or(0);
        if topic == EventTopic::All {
            return counts.values().sum();
        }
        all + counts.get(&topic).copied().unwrap_or(0)
    }
}

// =============================================================================
// SUBSCRIPTION
// =============================================================================

/// Filtered receiver. Dropping it withdraws its topic interest.
pub struct Subscription {
    receiver: broadcast::Receiver<ProtocolEvent>,
    filter: EventFilter,
    interest: Arc<TopicInterest>,
    topics: Vec<EventTopic>,
}

impl Subscription {
    pub(crate) fn new(
        receiver: broadcast::Receiver<ProtocolEvent>,
        filter: EventFilter,
        interest: Arc<TopicInterest>,
    ) -> Self {
        let topics = TopicInterest::registered_topics(&filter);
        interest.register(&topics);
        Self {
            receiver,
            filter,
            interest,
            topics,
        }
    }

    /// Next event matching the filter. `None` once the bus is gone.
    ///
    /// A lagging subscriber skips what it missed.
    pub async fn recv(&mut self) -> Option<ProtocolEvent> {
        loop {
            match self.receiver.recv().await {
                Ok(event) if self.filter.matches(&event) => return Some(event),
                Ok(_) => {}
                Err(broadcast::error::RecvError::Closed) => return None,
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    debug!(missed, "Subscriber lagged behind the bus");
                }
            }
        }
    }

    /// Non-blocking variant of [`Subscription::recv`]. `Ok(None)` means
    /// nothing is pending.
    pub fn try_recv(&mut self) -> Result<Option<ProtocolEvent>, SubscriptionError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) if self.filter.matches(&event) => return Ok(Some(event)),
                Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => {}
                Err(broadcast::error::TryRecvError::Empty) => return Ok(None),
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(SubscriptionError::Closed)
                }
            }
        }
    }

    /// Wait for the terminal notification of `message_id` and return the flow
    /// it completed in.
    ///
    /// Requires a filter that lets `ReceivedMessages` through.
    pub async fn processed(&mut self, message_id: MessageIdentifier) -> Option<FlowId> {
        loop {
            match self.recv().await? {
                ProtocolEvent::ProtocolMessageProcessed {
                    message_id: id,
                    flow_id,
                } if id == message_id => return Some(flow_id),
                other => trace!(topic = ?other.topic(), "Skipping event while waiting for processed"),
            }
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.interest.release(&self.topics);
        debug!(topics = ?self.topics, "Subscription dropped");
    }
}

// =============================================================================
// STREAM
// =============================================================================

/// [`Subscription`] as a `tokio_stream::Stream`.
pub struct EventStream {
    inner: BroadcastStream<ProtocolEvent>,
    filter: EventFilter,
    // Keeps the topic interest registered.
    _subscription: Subscription,
}

impl EventStream {
    #[must_use]
    pub fn new(subscription: Subscription) -> Self {
        Self {
            inner: BroadcastStream::new(subscription.receiver.resubscribe()),
            filter: subscription.filter.clone(),
            _subscription: subscription,
        }
    }

    #[must_use]
    pub fn filter(&self) -> &EventFilter {
        &self.filter
    }
}

impl Stream for EventStream {
    type Item = ProtocolEvent;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        loop {
            match Pin::new(&mut self.inner).poll_next(cx) {
                Poll::Ready(Some(Ok(event))) if self.filter.matches(&event) => {
                    return Poll::Ready(Some(event))
                }
                Poll::Ready(Some(_)) => {}
                Poll::Ready(None) => return Poll::Ready(None),
                Poll::Pending => return Poll::Pending,
            }
        }
    }
}
