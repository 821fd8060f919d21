//! # Protocol Events
//!
//! Everything the protocol engine exchanges with the rest of the application
//! over the shared bus.

use serde::{Deserialize, Serialize};
use shared_types::{CryptoIdentity, CryptoProtocolId, FlowId, MessageIdentifier, Uid};
use thiserror::Error;

/// Bus payload. Variants are grouped by the component that emits them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProtocolEvent {
    // =========================================================================
    // PROTOCOL MANAGER (outgoing)
    // =========================================================================
    /// A received message is ready to be processed, either freshly stored or
    /// unblocked because its protocol instance advanced.
    ProtocolMessageToProcess {
        message_id: MessageIdentifier,
        flow_id: FlowId,
    },

    /// Terminal notification for a received message, success or failure
    /// alike. Request/response style callers wait on this one.
    ProtocolMessageProcessed {
        message_id: MessageIdentifier,
        flow_id: FlowId,
    },

    /// A user-facing protocol (e.g. owned identity transfer) failed.
    ProtocolFailed {
        owned_identity: CryptoIdentity,
        protocol_instance_uid: Uid,
        protocol_id: CryptoProtocolId,
        failure: ProtocolFailure,
    },

    // =========================================================================
    // IDENTITY MANAGER (incoming)
    // =========================================================================
    /// The OneToOne status of a contact changed.
    ContactOneToOneStatusChanged {
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
        is_one_to_one: bool,
    },

    // =========================================================================
    // APPLICATION (incoming)
    // =========================================================================
    /// The application came to the foreground. On the first occurrence the
    /// engine runs its bootstrap and reconciliation tasks.
    ApplicationAppearedOnScreen { first_time: bool, flow_id: FlowId },
}

/// Typed failure surfaced to the app layer for user-facing protocols.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum ProtocolFailure {
    #[error("a server request required by the protocol failed")]
    ServerRequestFailed,
    #[error("could not decrypt or authenticate a protocol payload")]
    DecryptionFailed,
    #[error("the short authentication string entered by the user is incorrect")]
    IncorrectSas,
    #[error("the protocol was aborted by the other device")]
    AbortedByRemote,
    #[error("keycloak authentication is required and failed")]
    KeycloakAuthenticationFailed,
    #[error("{0}")]
    Other(String),
}

impl ProtocolEvent {
    /// Coarse category used by subscription filters.
    #[must_use]
    pub fn topic(&self) -> EventTopic {
        match self {
            Self::ProtocolMessageToProcess { .. } | Self::ProtocolMessageProcessed { .. } => {
                EventTopic::ReceivedMessages
            }
            Self::ProtocolFailed { .. } => EventTopic::ProtocolFailures,
            Self::ContactOneToOneStatusChanged { .. } => EventTopic::ContactTrust,
            Self::ApplicationAppearedOnScreen { .. } => EventTopic::Application,
        }
    }

    /// The owned identity this event concerns, if any.
    #[must_use]
    pub fn owned_identity(&self) -> Option<CryptoIdentity> {
        match self {
            Self::ProtocolMessageToProcess { message_id, .. }
            | Self::ProtocolMessageProcessed { message_id, .. } => {
                Some(message_id.owned_identity)
            }
            Self::ProtocolFailed { owned_identity, .. }
            | Self::ContactOneToOneStatusChanged { owned_identity, .. } => Some(*owned_identity),
            Self::ApplicationAppearedOnScreen { .. } => None,
        }
    }
}

/// Subscription granularity. Each event maps to exactly one topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EventTopic {
    /// Received-message lifecycle notifications.
    ReceivedMessages,
    /// User-facing protocol failures.
    ProtocolFailures,
    /// Contact trust level changes.
    ContactTrust,
    /// Application lifecycle.
    Application,
    /// Wildcard accepted by filters; no event carries it.
    All,
}

/// Topic and owner restrictions applied on the receiving side.
#[derive(Debug, Clone, Default)]
pub struct EventFilter {
    /// Accepted topics, or every topic when empty.
    pub topics: Vec<EventTopic>,
    /// Owned identities to include. Empty means all identities.
    pub owned_identities: Vec<CryptoIdentity>,
}

impl EventFilter {
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Only events whose topic is listed. `EventTopic::All` widens to every topic.
    #[must_use]
    pub fn topics(topics: Vec<EventTopic>) -> Self {
        Self {
            topics,
            owned_identities: Vec::new(),
        }
    }

    /// Restrict the filter to events concerning one owned identity.
    ///
    /// Events without an owned identity (application lifecycle) still match.
    #[must_use]
    pub fn for_owned_identity(mut self, owned_identity: CryptoIdentity) -> Self {
        self.owned_identities.push(owned_identity);
        self
    }

    fn accepts_topic(&self, topic: EventTopic) -> bool {
        self.topics.is_empty()
            || self
                .topics
                .iter()
                .any(|wanted| *wanted == EventTopic::All || *wanted == topic)
    }

    fn accepts_owner(&self, owner: Option<CryptoIdentity>) -> bool {
        match owner {
            Some(owner) if !self.owned_identities.is_empty() => {
                self.owned_identities.contains(&owner)
            }
            _ => true,
        }
    }

    #[must_use]
    pub fn matches(&self, event: &ProtocolEvent) -> bool {
        self.accepts_topic(event.topic()) && self.accepts_owner(event.owned_identity())
    }
}
