//! # Protocol Runtime Library
//!
//! Exposes the runtime's container and wiring for testing. The entry point
//! is the `main.rs` binary.
//!
//! ## Structure
//!
//! - `container/` - configuration and construction of every collaborator
//! - `wiring/` - routing of bus events to the protocol manager

pub mod container;
pub mod wiring;

pub use container::{ProtocolContainer, RuntimeConfig, RuntimeConfigError, RuntimeError};
pub use wiring::{EventRouter, RouteOutcome};
