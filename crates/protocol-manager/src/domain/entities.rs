//! # Persistent Entities
//!
//! Rows the runtime keeps in the durable store, plus the outbound message
//! shape handed to the channel sender.

use serde::{Deserialize, Serialize};
use shared_types::{CryptoIdentity, CryptoProtocolId, MessageIdentifier, Timestamp, Uid};
use uuid::Uuid;

/// Identifier of a concrete protocol state. Meaning is protocol specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StateId(pub u16);

/// Identifier of a concrete protocol message. Meaning is protocol specific.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageKind(pub u16);

/// A running protocol instance.
///
/// Keyed by `(owned_identity, uid)`. Never shared across owned identities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProtocolInstance {
    pub owned_identity: CryptoIdentity,
    pub uid: Uid,
    pub protocol_id: CryptoProtocolId,
    pub state_id: StateId,
    /// Opaque, protocol-specific state.
    pub state: Vec<u8>,
    pub created_at: Timestamp,
}

impl ProtocolInstance {
    #[must_use]
    pub fn key(&self) -> InstanceKey {
        InstanceKey::new(self.owned_identity, self.uid)
    }
}

/// Composite key of a protocol instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct InstanceKey {
    pub owned_identity: CryptoIdentity,
    pub uid: Uid,
}

impl InstanceKey {
    #[must_use]
    pub fn new(owned_identity: CryptoIdentity, uid: Uid) -> Self {
        Self { owned_identity, uid }
    }
}

/// Parent/child relation between two instances of the same owned identity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LinkBetweenProtocolInstances {
    pub owned_identity: CryptoIdentity,
    pub parent_uid: Uid,
    pub child_uid: Uid,
}

/// A protocol message waiting in the backlog of its target instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceivedMessage {
    pub message_id: MessageIdentifier,
    pub protocol_id: CryptoProtocolId,
    pub protocol_instance_uid: Uid,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    /// Set when the message is the user's answer to a UI dialog.
    pub dialog_uuid: Option<Uuid>,
    pub timestamp: Timestamp,
}

impl ReceivedMessage {
    #[must_use]
    pub fn owned_identity(&self) -> CryptoIdentity {
        self.message_id.owned_identity
    }

    #[must_use]
    pub fn instance_key(&self) -> InstanceKey {
        InstanceKey::new(self.message_id.owned_identity, self.protocol_instance_uid)
    }
}

/// A message as handed over by the network or by a local component, before
/// it has been stored.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GenericReceivedMessage {
    pub owned_identity: CryptoIdentity,
    /// Uid assigned by the server. `None` for locally generated messages.
    pub network_uid: Option<Uid>,
    pub protocol_id: CryptoProtocolId,
    pub protocol_instance_uid: Uid,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
    pub dialog_uuid: Option<Uuid>,
}

/// Instance suspended until a contact becomes OneToOne.
///
/// Several entries may exist for the same `(owner, contact, instance)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WaitingForOneToOneContact {
    pub entry_id: Uid,
    pub owned_identity: CryptoIdentity,
    pub contact_identity: CryptoIdentity,
    pub protocol_instance_uid: Uid,
    /// Posted as-is once the contact qualifies.
    pub resumption: OutboundProtocolMessage,
}

// =============================================================================
// OUTBOUND MESSAGES
// =============================================================================

/// Where an outbound protocol message goes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChannelType {
    /// Loopback to the owned identity itself: becomes a received message.
    Local,
    /// All confirmed devices of the listed contacts.
    ContactDevices { contacts: Vec<CryptoIdentity> },
    /// The other devices of the owned identity.
    OtherOwnedDevices,
    /// The user interface, for dialogs.
    UserInterface { dialog_uuid: Uuid, action: DialogAction },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DialogAction {
    Show,
    Delete,
}

/// A fully formed message a step wants to send.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboundProtocolMessage {
    pub owned_identity: CryptoIdentity,
    pub channel: ChannelType,
    pub protocol_id: CryptoProtocolId,
    pub protocol_instance_uid: Uid,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

impl OutboundProtocolMessage {
    /// Loopback message addressed to an instance of the owned identity.
    #[must_use]
    pub fn local(
        owned_identity: CryptoIdentity,
        protocol_id: CryptoProtocolId,
        protocol_instance_uid: Uid,
        kind: MessageKind,
        payload: Vec<u8>,
    ) -> Self {
        Self {
            owned_identity,
            channel: ChannelType::Local,
            protocol_id,
            protocol_instance_uid,
            kind,
            payload,
        }
    }

    /// Instruction to the UI layer to remove a dialog nobody can answer anymore.
    #[must_use]
    pub fn delete_dialog(owned_identity: CryptoIdentity, dialog_uuid: Uuid) -> Self {
        Self {
            owned_identity,
            channel: ChannelType::UserInterface {
                dialog_uuid,
                action: DialogAction::Delete,
            },
            protocol_id: CryptoProtocolId::Generic,
            protocol_instance_uid: Uid::default(),
            kind: MessageKind(0),
            payload: Vec::new(),
        }
    }
}

/// A message enqueued for network (or UI) delivery.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutboxMessage {
    pub message_id: MessageIdentifier,
    pub message: OutboundProtocolMessage,
    /// Per-message randomness drawn from the PRNG at post time.
    pub randomization: Vec<u8>,
    pub timestamp: Timestamp,
}

/// What the identity manager knows about a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContactStatus {
    pub is_active: bool,
    pub is_one_to_one: bool,
}

impl ContactStatus {
    /// Whether an instance waiting for this contact may resume.
    #[must_use]
    pub fn allows_resumption(&self) -> bool {
        self.is_active && self.is_one_to_one
    }
}
