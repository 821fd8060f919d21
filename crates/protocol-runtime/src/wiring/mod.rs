//! # Event Wiring
//!
//! Connects the event bus to the protocol manager.
//!
//! ```text
//!  identity manager ──ContactOneToOneStatusChanged──┐
//!  application      ──ApplicationAppearedOnScreen───┤
//!  protocol manager ──ProtocolFailed────────────────┤
//!                                                   ▼
//!                                             ┌───────────┐
//!                                             │ Event Bus │
//!                                             └─────┬─────┘
//!                                                   ▼
//!                                             EventRouter ──→ ProtocolManagerApi
//! ```

pub mod event_routing;

pub use event_routing::*;
