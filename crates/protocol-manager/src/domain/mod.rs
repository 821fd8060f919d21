//! # Domain Layer
//!
//! Pure types and the lifecycle rules of protocol instances. No I/O beyond
//! the unit-of-work handle passed in by the caller.

pub mod cancel;
pub mod entities;
pub mod kept_for_later;
pub mod lifecycle;
pub mod step;

pub use cancel::{CancelDisposition, ReasonForCancel};
pub use entities::{
    ChannelType, ContactStatus, DialogAction, GenericReceivedMessage, InstanceKey,
    LinkBetweenProtocolInstances, MessageKind, OutboundProtocolMessage, OutboxMessage,
    ProtocolInstance, ReceivedMessage, StateId, WaitingForOneToOneContact,
};
pub use kept_for_later::{
    CorrelationKey, DeferredPayload, KeepDecision, KeptForLaterManager, KeptForLaterMessage,
};
pub use lifecycle::AbortReport;
pub use step::{StepInput, StepOutcome, Transition, WaitRegistration};
