//! # Shared Bus - Typed Event Bus for the Protocol Engine
//!
//! Cross-cutting notifications (a protocol message became processable, a
//! message was processed, a user-facing protocol failed, a contact's trust
//! level changed) travel as typed [`ProtocolEvent`] values instead of
//! stringly-named notifications.
//!
//! ```text
//! ┌──────────────────┐                    ┌───────────────────┐
//! │ Protocol manager │                    │ App / UI / tests  │
//! │                  │    publish()       │                   │
//! │                  │ ──────┐            │                   │
//! └──────────────────┘       │            └───────────────────┘
//!                            ▼                    ↑
//!                      ┌──────────────┐           │
//!                      │  Event Bus   │ ──────────┘
//!                      └──────────────┘  subscribe()
//! ```
//!
//! Subscribers that lag behind lose the oldest events, and events whose topic
//! nobody subscribed to are dropped at once. The engine never relies on the
//! bus for durability: everything that must survive a crash lives in the
//! durable store. Callers that need a request/response shape wait on
//! [`Subscription::processed`].

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod events;
pub mod publisher;
pub mod subscriber;

pub use events::{EventFilter, EventTopic, ProtocolEvent, ProtocolFailure};
pub use publisher::{EventPublisher, InMemoryEventBus};
pub use subscriber::{EventStream, EventSubscriber, Subscription, SubscriptionError};

/// Maximum events to buffer per subscriber before the oldest are dropped.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1000;
