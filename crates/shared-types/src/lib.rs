//! # Shared Types Crate
//!
//! Identifiers and small value types shared by every crate of the protocol
//! engine workspace.
//!
//! ## Design Principles
//!
//! - **Single Source of Truth**: identities, uids and protocol identifiers are
//!   defined once here and re-used by the manager, the bus and the runtime.
//! - **Owner scoping**: every durable key embeds the owned identity, so two
//!   owned identities on the same device never observe each other's rows.
//! - **Injected randomness and time**: uid generation goes through
//!   [`PrngService`] and clocks through [`TimeSource`], so tests are
//!   deterministic.

pub mod entities;
pub mod prng;
pub mod time;

pub use entities::*;
pub use prng::{OsPrng, PrngService, SeededPrng};
pub use time::{ManualTimeSource, SystemTimeSource, TimeSource, Timestamp};
