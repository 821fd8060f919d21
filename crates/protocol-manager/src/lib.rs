//! # Protocol Manager
//!
//! Runs long-lived, multi-message cryptographic protocol instances (trust
//! establishment, group management, device discovery...) for every owned
//! identity of the engine.
//!
//! ## Purpose
//!
//! A protocol instance advances one step per received message. The manager
//! persists every received message, runs each step in its own unit of work,
//! and keeps the durable state consistent when steps fail, when instances are
//! aborted, and when the application restarts.
//!
//! ## Guarantees
//!
//! | Guarantee | Enforcement Location |
//! |-----------|---------------------|
//! | One step at a time per instance | `service/queue.rs` - keyed lanes |
//! | A message is executed at most once | `service/dispatcher.rs` - deleted in the step's unit of work |
//! | Abort reaches every linked instance | `domain/lifecycle.rs` - `abort()` |
//! | Contact re-checked before resumption | `service/trust_upgrade.rs` |
//! | Backlog drained after every state change | `service/dispatcher.rs` - `after_commit()` |
//!
//! ## Step Unit
//!
//! ```text
//! [RECEIVED] ──step ok──→ [DELETED] ──→ backlog of the instance resubmitted
//!     │
//!     ├── no step for state ──→ [RECEIVED] (kept, swept once obsolete)
//!     ├── state mismatch ────→ [DELETED]
//!     └── save failure ──────→ retried, then [DELETED]
//! ```
//!
//! ## Module Structure (Hexagonal Architecture)
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      OUTER LAYER                                │
//! │  adapters/ - memory store, channel, directory, notifiers       │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ implements ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      MIDDLE LAYER                               │
//! │  ports/inbound.rs  - ProtocolManagerApi trait                  │
//! │  ports/outbound.rs - ContextCreator, UnitOfWork, StepEngine... │
//! └─────────────────────────────────────────────────────────────────┘
//!                          ↑ uses ↑
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                      INNER LAYER                                │
//! │  domain/entities.rs       - instances, messages, links         │
//! │  domain/cancel.rs         - ReasonForCancel and dispositions   │
//! │  domain/lifecycle.rs      - abort cascade, normal termination  │
//! │  domain/kept_for_later.rs - deferred message buffer            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod adapters;
pub mod config;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use config::{ProtocolManagerConfig, SaveFailurePolicy};
pub use domain::*;
pub use error::{
    ChannelError, ConfigError, DirectoryError, ProtocolError, ProtocolResult, StoreError,
    StoreResult,
};
pub use ports::inbound::{ProtocolManagerApi, ProtocolStartRequest, ResumptionReport};
pub use ports::outbound::{
    ChannelSender, CommitReceipt, ContactDirectory, ContextCreator, ProtocolNotifier, StepEngine,
    UnitOfWork,
};
pub use service::{ProtocolManagerBuilder, ProtocolManagerService, WorkKey};
