//! # Adapters Layer (Hexagonal Architecture)
//!
//! Implements the outbound port traits in memory and on the event bus.

mod channel;
mod directory;
mod memory_store;
mod notifier;
mod step_engine;

pub use channel::OutboxChannelSender;
pub use directory::InMemoryContactDirectory;
pub use memory_store::{MemoryStore, StoreSnapshot};
pub use notifier::{EventBusNotifier, RecordingNotifier};
pub use step_engine::{ExecutedStep, ScriptedStepEngine};
