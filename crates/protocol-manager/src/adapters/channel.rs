//! Channel sender over the unit of work.
//!
//! Implements `ChannelSender` without any network: local messages loop back
//! as received messages of the owned identity, everything else lands in the
//! outbox table for the delivery layer to pick up after commit.

use crate::domain::{ChannelType, OutboundProtocolMessage, OutboxMessage, ReceivedMessage};
use crate::error::ChannelError;
use crate::ports::outbound::{ChannelSender, UnitOfWork};
use async_trait::async_trait;
use shared_types::{MessageIdentifier, PrngService, TimeSource};
use std::sync::Arc;
use tracing::debug;

/// Length of the per-message randomization drawn for outbox messages.
const RANDOMIZATION_LENGTH: usize = 16;

pub struct OutboxChannelSender {
    clock: Arc<dyn TimeSource>,
}

impl OutboxChannelSender {
    pub fn new(clock: Arc<dyn TimeSource>) -> Self {
        Self { clock }
    }
}

#[async_trait]
impl ChannelSender for OutboxChannelSender {
    async fn post_channel_message(
        &self,
        message: OutboundProtocolMessage,
        prng: &dyn PrngService,
        uow: &mut dyn UnitOfWork,
    ) -> Result<MessageIdentifier, ChannelError> {
        let message_id = MessageIdentifier::new(message.owned_identity, prng.gen_uid());
        let timestamp = self.clock.now();

        if let ChannelType::ContactDevices { contacts } = &message.channel {
            if contacts.is_empty() {
                return Err(ChannelError::NoRecipient);
            }
        }

        if message.channel == ChannelType::Local {
            uow.insert_received_message(ReceivedMessage {
                message_id,
                protocol_id: message.protocol_id,
                protocol_instance_uid: message.protocol_instance_uid,
                kind: message.kind,
                payload: message.payload,
                dialog_uuid: None,
                timestamp,
            })?;
            debug!(flow_id = %uow.flow_id(), %message_id, "Local message looped back");
        } else {
            let mut randomization = vec![0u8; RANDOMIZATION_LENGTH];
            prng.fill_bytes(&mut randomization);
            debug!(
                flow_id = %uow.flow_id(),
                %message_id,
                channel = ?message.channel,
                "Message queued in outbox"
            );
            uow.push_outbox(OutboxMessage {
                message_id,
                message,
                randomization,
                timestamp,
            })?;
        }

        Ok(message_id)
    }
}
