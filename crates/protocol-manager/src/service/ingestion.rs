//! Storing inbound messages and starting protocols.

use super::ProtocolManagerService;
use crate::domain::{GenericReceivedMessage, OutboundProtocolMessage, ReceivedMessage};
use crate::error::ProtocolResult;
use crate::ports::inbound::ProtocolStartRequest;
use shared_types::{FlowId, MessageIdentifier};
use std::collections::HashSet;
use tracing::debug;

impl ProtocolManagerService {
    /// Store `message` unless a row with its network uid already exists,
    /// then queue it.
    pub(crate) async fn store_received_message(
        &self,
        message: GenericReceivedMessage,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier> {
        let uid = message.network_uid.unwrap_or_else(|| self.prng.gen_uid());
        let message_id = MessageIdentifier::new(message.owned_identity, uid);

        let mut uow = self.context_creator.begin(flow_id).await?;
        let key = match uow.get_received_message(&message_id)? {
            Some(existing) => {
                debug!(%flow_id, %message_id, "Message already stored, reusing it");
                existing.instance_key()
            }
            None => {
                let stored = ReceivedMessage {
                    message_id,
                    protocol_id: message.protocol_id,
                    protocol_instance_uid: message.protocol_instance_uid,
                    kind: message.kind,
                    payload: message.payload,
                    dialog_uuid: message.dialog_uuid,
                    timestamp: self.clock.now(),
                };
                let key = stored.instance_key();
                uow.insert_received_message(stored)?;
                uow.commit().await?;
                key
            }
        };
        drop(uow);

        self.notify_to_process(message_id, flow_id).await;
        self.submit_step(key, message_id, flow_id, 1);
        Ok(message_id)
    }

    /// Post the first message of a protocol to ourselves.
    pub(crate) async fn post_initial_message(
        &self,
        request: ProtocolStartRequest,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier> {
        let instance_uid = request
            .instance_uid
            .unwrap_or_else(|| self.prng.gen_uid());
        let message = OutboundProtocolMessage::local(
            request.owned_identity,
            request.protocol_id,
            instance_uid,
            request.kind,
            request.payload,
        );

        let mut uow = self.context_creator.begin(flow_id).await?;
        let message_id = self
            .channel_sender
            .post_channel_message(message, self.prng.as_ref(), uow.as_mut())
            .await?;
        let receipt = uow.commit().await?;
        drop(uow);

        debug!(%flow_id, %message_id, uid = %instance_uid, protocol = ?request.protocol_id, "Protocol start posted");
        self.submit_inserted(receipt, &HashSet::new(), flow_id)
            .await;
        Ok(message_id)
    }
}
