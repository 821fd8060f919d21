//! # Ports Layer (Hexagonal Architecture)
//!
//! - `inbound`: the API the runtime exposes
//! - `outbound`: what the runtime needs from its environment

pub mod inbound;
pub mod outbound;

pub use inbound::{ProtocolManagerApi, ProtocolStartRequest, ResumptionReport};
pub use outbound::{
    ChannelSender, CommitReceipt, ContactDirectory, ContextCreator, ProtocolNotifier, StepEngine,
    UnitOfWork,
};
