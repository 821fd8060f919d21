//! Driven Ports (SPI - Outbound Dependencies)
//!
//! Everything the runtime needs from the outside world: a transactional
//! store, a channel layer, the identity manager, the protocol step engine
//! and a sink for notifications.

use crate::domain::{
    ContactStatus, InstanceKey, LinkBetweenProtocolInstances, OutboundProtocolMessage,
    OutboxMessage, ProtocolInstance, ReasonForCancel, ReceivedMessage, StateId, StepInput,
    StepOutcome, WaitingForOneToOneContact,
};
use crate::error::{ChannelError, DirectoryError, StoreResult};
use async_trait::async_trait;
use shared_bus::ProtocolEvent;
use shared_types::{CryptoIdentity, CryptoProtocolId, FlowId, MessageIdentifier, PrngService};

// =============================================================================
// DURABLE STORE
// =============================================================================

/// Opens units of work on the durable store.
#[async_trait]
pub trait ContextCreator: Send + Sync {
    /// Open a new unit of work. Dropping it without committing discards it.
    async fn begin(&self, flow_id: FlowId) -> StoreResult<Box<dyn UnitOfWork>>;
}

/// What a successful commit wrote that the caller has to act on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CommitReceipt {
    /// Received messages inserted by this unit of work, in insertion order.
    pub inserted_received_messages: Vec<MessageIdentifier>,
}

/// Atomic read-modify-write scope over every table the runtime owns.
///
/// Reads observe the writes already made in the same unit of work.
#[async_trait]
pub trait UnitOfWork: Send {
    fn flow_id(&self) -> FlowId;

    // --- Protocol instances ------------------------------------------------
    fn get_instance(&self, key: InstanceKey) -> StoreResult<Option<ProtocolInstance>>;
    /// Insert or replace.
    fn save_instance(&mut self, instance: ProtocolInstance) -> StoreResult<()>;
    /// Returns whether a row was deleted.
    fn delete_instance(&mut self, key: InstanceKey) -> StoreResult<bool>;
    fn all_instances(&self) -> StoreResult<Vec<ProtocolInstance>>;

    // --- Received messages -------------------------------------------------
    fn get_received_message(&self, id: &MessageIdentifier) -> StoreResult<Option<ReceivedMessage>>;
    fn insert_received_message(&mut self, message: ReceivedMessage) -> StoreResult<()>;
    fn delete_received_message(&mut self, id: &MessageIdentifier) -> StoreResult<bool>;
    /// Backlog of one instance, in enqueue order.
    fn received_messages_for_instance(&self, key: InstanceKey) -> StoreResult<Vec<ReceivedMessage>>;
    fn delete_received_messages_for_instance(&mut self, key: InstanceKey) -> StoreResult<usize>;
    /// Whole backlog, in enqueue order.
    fn all_received_messages(&self) -> StoreResult<Vec<ReceivedMessage>>;

    // --- Links -------------------------------------------------------------
    fn insert_link(&mut self, link: LinkBetweenProtocolInstances) -> StoreResult<()>;
    fn links_with_parent(&self, parent: InstanceKey)
        -> StoreResult<Vec<LinkBetweenProtocolInstances>>;
    fn links_with_child(&self, child: InstanceKey) -> StoreResult<Vec<LinkBetweenProtocolInstances>>;
    fn delete_link(&mut self, link: &LinkBetweenProtocolInstances) -> StoreResult<bool>;

    // --- Waiting entries ---------------------------------------------------
    fn insert_waiting_entry(&mut self, entry: WaitingForOneToOneContact) -> StoreResult<()>;
    fn waiting_entries_for(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
    ) -> StoreResult<Vec<WaitingForOneToOneContact>>;
    fn all_waiting_entries(&self) -> StoreResult<Vec<WaitingForOneToOneContact>>;
    fn delete_waiting_entry(&mut self, entry: &WaitingForOneToOneContact) -> StoreResult<bool>;
    fn delete_waiting_entries_for_instance(&mut self, key: InstanceKey) -> StoreResult<usize>;

    // --- Outbox ------------------------------------------------------------
    fn push_outbox(&mut self, message: OutboxMessage) -> StoreResult<()>;

    /// Make every change durable. A failed commit writes nothing.
    async fn commit(&mut self) -> StoreResult<CommitReceipt>;
}

// =============================================================================
// CHANNEL LAYER
// =============================================================================

/// Durably enqueues outbound protocol messages.
#[async_trait]
pub trait ChannelSender: Send + Sync {
    /// Enqueue `message` inside `uow`. Nothing leaves until `uow` commits.
    async fn post_channel_message(
        &self,
        message: OutboundProtocolMessage,
        prng: &dyn PrngService,
        uow: &mut dyn UnitOfWork,
    ) -> Result<MessageIdentifier, ChannelError>;
}

// =============================================================================
// IDENTITY MANAGER
// =============================================================================

/// Read access to contacts of an owned identity.
#[async_trait]
pub trait ContactDirectory: Send + Sync {
    /// `None` when the contact does not exist.
    async fn contact_status(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
    ) -> Result<Option<ContactStatus>, DirectoryError>;
}

// =============================================================================
// PROTOCOL STEP ENGINE
// =============================================================================

/// Pure decision function of the per-protocol state machines.
pub trait StepEngine: Send + Sync {
    /// Pick and run the step matching the message and current state.
    fn execute(&self, input: StepInput<'_>) -> Result<StepOutcome, ReasonForCancel>;

    /// Whether `state_id` is terminal for `protocol_id`.
    fn is_final_state(&self, protocol_id: CryptoProtocolId, state_id: StateId) -> bool;
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Sink for engine notifications. Best effort.
#[async_trait]
pub trait ProtocolNotifier: Send + Sync {
    async fn notify(&self, event: ProtocolEvent);
}
