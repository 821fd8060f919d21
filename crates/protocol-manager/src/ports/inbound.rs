//! Driving Ports (API - Inbound)

use crate::domain::{GenericReceivedMessage, MessageKind};
use crate::error::ProtocolResult;
use async_trait::async_trait;
use shared_types::{CryptoIdentity, CryptoProtocolId, FlowId, MessageIdentifier, Uid};

/// Outcome of a trust-upgrade resumption pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ResumptionReport {
    /// Entries whose resumption message was posted and which were deleted.
    pub resumed: usize,
    /// Entries whose contact does not qualify (yet). Left in place.
    pub kept: usize,
    /// Entries that hit an error. Left in place for the next rescan.
    pub failed: usize,
}

/// Request to start a protocol from this device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProtocolStartRequest {
    pub owned_identity: CryptoIdentity,
    pub protocol_id: CryptoProtocolId,
    /// Fixed uid for protocols that must always address the same instance
    /// (see [`Uid::for_group`]). A random uid is drawn when `None`.
    pub instance_uid: Option<Uid>,
    pub kind: MessageKind,
    pub payload: Vec<u8>,
}

/// Primary protocol manager API.
///
/// Step execution is asynchronous: the methods that queue work return once
/// it is queued. [`ProtocolManagerApi::wait_until_idle`] waits for all of it.
#[async_trait]
pub trait ProtocolManagerApi: Send + Sync {
    /// Queue the step for a stored received message.
    async fn process_received_message(&self, message_id: MessageIdentifier, flow_id: FlowId);

    /// Queue an abort of the instance and everything linked to it.
    async fn abort_protocol(&self, owned_identity: CryptoIdentity, uid: Uid, flow_id: FlowId);

    /// Store an inbound protocol message (once) and queue its step.
    async fn accept_received_message(
        &self,
        message: GenericReceivedMessage,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier>;

    /// Post the initial local message of a protocol and queue its step.
    async fn initiate_protocol(
        &self,
        request: ProtocolStartRequest,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier>;

    /// Resume the instances waiting for this contact to become OneToOne.
    async fn contact_one_to_one_status_changed(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
        flow_id: FlowId,
    ) -> ProtocolResult<ResumptionReport>;

    /// Run the startup reconciliation tasks when `first_time` is set.
    async fn application_appeared_on_screen(&self, first_time: bool, flow_id: FlowId);

    /// Wait until every queued unit of work has finished.
    async fn wait_until_idle(&self);
}
