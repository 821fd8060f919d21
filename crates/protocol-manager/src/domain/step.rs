//! Inputs and outcomes of a protocol step.

use super::entities::{OutboundProtocolMessage, ProtocolInstance, ReceivedMessage, StateId};
use shared_bus::ProtocolFailure;
use shared_types::{CryptoIdentity, PrngService, Timestamp, Uid};

/// Everything a step engine gets to look at.
pub struct StepInput<'a> {
    pub message: &'a ReceivedMessage,
    /// `None` when no instance exists yet for the target uid.
    pub instance: Option<&'a ProtocolInstance>,
    pub now: Timestamp,
    pub prng: &'a dyn PrngService,
}

/// State transition requested by a step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    /// Persist the new state, creating the instance if needed.
    Advance { state_id: StateId, state: Vec<u8> },
    /// Normal termination: the instance is deleted.
    Finish,
    /// Abort the instance and cascade to linked instances.
    Abort,
}

/// A waiting entry a step wants registered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WaitRegistration {
    pub contact_identity: CryptoIdentity,
    pub resumption: OutboundProtocolMessage,
}

/// Side effects of one successful step, applied in a single unit of work.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepOutcome {
    pub transition: Transition,
    pub outbound: Vec<OutboundProtocolMessage>,
    /// Child instance uids to link under the executing instance.
    pub child_links: Vec<Uid>,
    pub waits: Vec<WaitRegistration>,
    pub failure: Option<ProtocolFailure>,
}

impl StepOutcome {
    #[must_use]
    pub fn advance(state_id: StateId, state: Vec<u8>) -> Self {
        Self::with_transition(Transition::Advance { state_id, state })
    }

    #[must_use]
    pub fn finish() -> Self {
        Self::with_transition(Transition::Finish)
    }

    #[must_use]
    pub fn abort() -> Self {
        Self::with_transition(Transition::Abort)
    }

    fn with_transition(transition: Transition) -> Self {
        Self {
            transition,
            outbound: Vec::new(),
            child_links: Vec::new(),
            waits: Vec::new(),
            failure: None,
        }
    }

    #[must_use]
    pub fn send(mut self, message: OutboundProtocolMessage) -> Self {
        self.outbound.push(message);
        self
    }

    #[must_use]
    pub fn link_child(mut self, child_uid: Uid) -> Self {
        self.child_links.push(child_uid);
        self
    }

    #[must_use]
    pub fn wait_for_one_to_one(
        mut self,
        contact_identity: CryptoIdentity,
        resumption: OutboundProtocolMessage,
    ) -> Self {
        self.waits.push(WaitRegistration {
            contact_identity,
            resumption,
        });
        self
    }

    #[must_use]
    pub fn fail(mut self, failure: ProtocolFailure) -> Self {
        self.failure = Some(failure);
        self
    }
}
