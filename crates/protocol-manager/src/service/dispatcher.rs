//! Received-message dispatcher.
//!
//! One step unit per received message, run on the lane of its target
//! instance:
//!
//! ```text
//! begin ─→ load message + instance ─→ engine.execute ─→ apply outcome ─→ commit
//!                                          │                               │
//!                                          └── cancel ─→ disposition       ├─→ drain backlog, resubmit
//!                                                                          └─→ submit loopback messages
//! ```

use super::{ProtocolManagerService, WorkKey};
use crate::config::SaveFailurePolicy;
use crate::domain::{
    lifecycle, CancelDisposition, InstanceKey, LinkBetweenProtocolInstances,
    OutboundProtocolMessage, ProtocolInstance, ReasonForCancel, ReceivedMessage, StepInput,
    StepOutcome, Transition, WaitingForOneToOneContact,
};
use crate::ports::outbound::{CommitReceipt, UnitOfWork};
use shared_bus::{ProtocolEvent, ProtocolFailure};
use shared_types::{CryptoProtocolId, FlowId, MessageIdentifier};
use std::collections::HashSet;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// A step whose unit of work was committed.
struct CommittedStep {
    key: InstanceKey,
    aborted: bool,
    failure: Option<(CryptoProtocolId, ProtocolFailure)>,
    receipt: CommitReceipt,
}

impl ProtocolManagerService {
    /// Look up the target instance of a stored message and queue its step.
    pub(crate) async fn submit_stored_message(&self, message_id: MessageIdentifier, flow_id: FlowId) {
        let mut uow = match self.context_creator.begin(flow_id).await {
            Ok(uow) => uow,
            Err(e) => {
                error!(%flow_id, %message_id, error = %e, "Cannot open unit of work, message not processed");
                self.notify_processed(message_id, flow_id).await;
                return;
            }
        };
        let key = match uow.get_received_message(&message_id) {
            Ok(Some(message)) => message.instance_key(),
            Ok(None) | Err(_) => {
                debug!(%flow_id, %message_id, "Received message not found, nothing to process");
                drop(uow);
                self.notify_processed(message_id, flow_id).await;
                return;
            }
        };
        drop(uow);
        self.submit_step(key, message_id, flow_id, 1);
    }

    /// Queue a step unit on the lane of `key`.
    pub(crate) fn submit_step(
        &self,
        key: InstanceKey,
        message_id: MessageIdentifier,
        flow_id: FlowId,
        attempt: u32,
    ) {
        let this = self.clone();
        self.queue.submit(WorkKey::Instance(key), async move {
            this.run_step(key, message_id, flow_id, attempt).await;
        });
    }

    fn schedule_retry(
        &self,
        key: InstanceKey,
        message_id: MessageIdentifier,
        flow_id: FlowId,
        attempt: u32,
        delay: Duration,
    ) {
        let this = self.clone();
        self.queue
            .submit_after(WorkKey::Instance(key), delay, async move {
                this.run_step(key, message_id, flow_id, attempt).await;
            });
    }

    /// Queue an abort on the lane of `key`, so it never overlaps a step.
    pub(crate) fn submit_abort(&self, key: InstanceKey, flow_id: FlowId) {
        let this = self.clone();
        self.queue.submit(WorkKey::Instance(key), async move {
            this.run_abort(key, flow_id).await;
        });
    }

    async fn run_abort(&self, key: InstanceKey, flow_id: FlowId) {
        let mut uow = match self.context_creator.begin(flow_id).await {
            Ok(uow) => uow,
            Err(e) => {
                error!(%flow_id, uid = %key.uid, error = %e, "Cannot open unit of work, abort skipped");
                return;
            }
        };
        let report = lifecycle::abort(uow.as_mut(), key);
        if report.is_empty() {
            debug!(%flow_id, uid = %key.uid, "Abort of absent instance, nothing to do");
            return;
        }
        match uow.commit().await {
            Ok(_) => info!(
                %flow_id,
                owned_identity = %key.owned_identity,
                uid = %key.uid,
                instances = report.instances_deleted.len(),
                messages = report.messages_deleted,
                "Protocol instance aborted"
            ),
            Err(e) => error!(%flow_id, uid = %key.uid, error = %e, "Could not commit abort"),
        }
    }

    async fn run_step(
        &self,
        key: InstanceKey,
        message_id: MessageIdentifier,
        flow_id: FlowId,
        attempt: u32,
    ) {
        match self.execute_step(message_id, flow_id).await {
            Ok(committed) => self.after_commit(message_id, committed, flow_id).await,
            Err(reason) => {
                self.handle_cancel(key, message_id, flow_id, reason, attempt)
                    .await
            }
        }
    }

    async fn execute_step(
        &self,
        message_id: MessageIdentifier,
        flow_id: FlowId,
    ) -> Result<CommittedStep, ReasonForCancel> {
        let mut uow = self.context_creator.begin(flow_id).await.map_err(|e| {
            error!(%flow_id, error = %e, "Cannot open unit of work");
            ReasonForCancel::ContextCreatorDelegateNotSet
        })?;

        let message = uow
            .get_received_message(&message_id)
            .ok()
            .flatten()
            .ok_or(ReasonForCancel::MessageNotFoundInDatabase)?;
        let key = message.instance_key();

        let instance = uow
            .get_instance(key)
            .map_err(|_| ReasonForCancel::CouldNotReconstructConcreteCryptoProtocol)?;
        if let Some(instance) = &instance {
            if instance.protocol_id != message.protocol_id {
                warn!(
                    %flow_id,
                    uid = %key.uid,
                    instance_protocol = ?instance.protocol_id,
                    message_protocol = ?message.protocol_id,
                    "Message addressed to an instance of another protocol"
                );
                return Err(ReasonForCancel::CouldNotReconstructConcreteCryptoProtocol);
            }
        }

        let outcome = self.step_engine.execute(StepInput {
            message: &message,
            instance: instance.as_ref(),
            now: self.clock.now(),
            prng: self.prng.as_ref(),
        })?;

        let failure = outcome
            .failure
            .clone()
            .map(|failure| (message.protocol_id, failure));
        let aborted = self
            .apply_outcome(uow.as_mut(), &message, instance, outcome)
            .await?;

        let receipt = uow.commit().await.map_err(|e| {
            warn!(%flow_id, %message_id, error = %e, "Could not save step");
            ReasonForCancel::CouldNotSaveContext
        })?;

        Ok(CommittedStep {
            key,
            aborted,
            failure,
            receipt,
        })
    }

    /// Apply every side effect of `outcome` inside `uow`. Returns whether the
    /// instance was aborted.
    async fn apply_outcome(
        &self,
        uow: &mut dyn UnitOfWork,
        message: &ReceivedMessage,
        instance: Option<ProtocolInstance>,
        outcome: StepOutcome,
    ) -> Result<bool, ReasonForCancel> {
        let key = message.instance_key();
        let flow_id = uow.flow_id();
        let mut alive = false;
        let mut aborted = false;

        match outcome.transition {
            Transition::Advance { state_id, state } => {
                let instance = match instance {
                    Some(mut existing) => {
                        existing.state_id = state_id;
                        existing.state = state;
                        existing
                    }
                    None => {
                        debug!(%flow_id, uid = %key.uid, protocol = ?message.protocol_id, "Starting protocol instance");
                        ProtocolInstance {
                            owned_identity: key.owned_identity,
                            uid: key.uid,
                            protocol_id: message.protocol_id,
                            state_id,
                            state,
                            created_at: self.clock.now(),
                        }
                    }
                };
                if self
                    .step_engine
                    .is_final_state(instance.protocol_id, instance.state_id)
                {
                    lifecycle::finish(uow, &instance)
                        .map_err(|_| ReasonForCancel::CouldNotUpdateProtocolState)?;
                } else {
                    uow.save_instance(instance)
                        .map_err(|_| ReasonForCancel::CouldNotUpdateProtocolState)?;
                    alive = true;
                }
            }
            Transition::Finish => {
                if let Some(instance) = &instance {
                    lifecycle::finish(uow, instance)
                        .map_err(|_| ReasonForCancel::CouldNotUpdateProtocolState)?;
                }
            }
            Transition::Abort => {
                lifecycle::abort(uow, key);
                aborted = true;
            }
        }

        for outbound in outcome.outbound {
            self.post(uow, outbound).await?;
        }

        if alive {
            for child_uid in outcome.child_links {
                uow.insert_link(LinkBetweenProtocolInstances {
                    owned_identity: key.owned_identity,
                    parent_uid: key.uid,
                    child_uid,
                })
                .map_err(|_| ReasonForCancel::CouldNotUpdateProtocolState)?;
            }
            for wait in outcome.waits {
                uow.insert_waiting_entry(WaitingForOneToOneContact {
                    entry_id: self.prng.gen_uid(),
                    owned_identity: key.owned_identity,
                    contact_identity: wait.contact_identity,
                    protocol_instance_uid: key.uid,
                    resumption: wait.resumption,
                })
                .map_err(|_| ReasonForCancel::CouldNotUpdateProtocolState)?;
            }
        } else if !outcome.child_links.is_empty() || !outcome.waits.is_empty() {
            warn!(
                %flow_id,
                uid = %key.uid,
                protocol = ?message.protocol_id,
                child_links = outcome.child_links.len(),
                waits = outcome.waits.len(),
                "Step ended the instance but requested links or waits, dropping them"
            );
        }

        uow.delete_received_message(&message.message_id)
            .map_err(|_| ReasonForCancel::CouldNotDeleteReceivedMessage)?;

        Ok(aborted)
    }

    async fn post(
        &self,
        uow: &mut dyn UnitOfWork,
        message: OutboundProtocolMessage,
    ) -> Result<(), ReasonForCancel> {
        let flow_id = uow.flow_id();
        self.channel_sender
            .post_channel_message(message, self.prng.as_ref(), uow)
            .await
            .map(|_| ())
            .map_err(|e| {
                warn!(%flow_id, error = %e, "Could not post outbound message");
                ReasonForCancel::TheProtocolStepCancelled
            })
    }

    async fn after_commit(
        &self,
        message_id: MessageIdentifier,
        committed: CommittedStep,
        flow_id: FlowId,
    ) {
        debug!(%flow_id, %message_id, aborted = committed.aborted, "Step committed");

        if let Some((protocol_id, failure)) = committed.failure {
            self.notify(ProtocolEvent::ProtocolFailed {
                owned_identity: committed.key.owned_identity,
                protocol_instance_uid: committed.key.uid,
                protocol_id,
                failure,
            })
            .await;
        }

        let backlog = if committed.aborted {
            Vec::new()
        } else {
            self.read_backlog(committed.key, flow_id).await
        };

        for message in &backlog {
            self.notify_to_process(message.message_id, flow_id).await;
        }
        self.notify_processed(message_id, flow_id).await;

        let drained: HashSet<MessageIdentifier> = backlog.iter().map(|m| m.message_id).collect();
        for message in backlog {
            self.submit_step(committed.key, message.message_id, flow_id, 1);
        }
        self.submit_inserted(committed.receipt, &drained, flow_id)
            .await;
    }

    /// Queue the received messages a commit inserted, skipping `already`.
    pub(crate) async fn submit_inserted(
        &self,
        receipt: CommitReceipt,
        already: &HashSet<MessageIdentifier>,
        flow_id: FlowId,
    ) {
        for message_id in receipt.inserted_received_messages {
            if already.contains(&message_id) {
                continue;
            }
            self.notify_to_process(message_id, flow_id).await;
            self.submit_stored_message(message_id, flow_id).await;
        }
    }

    /// Remaining backlog of `key`, read in a fresh unit of work.
    async fn read_backlog(&self, key: InstanceKey, flow_id: FlowId) -> Vec<ReceivedMessage> {
        let uow = match self.context_creator.begin(flow_id).await {
            Ok(uow) => uow,
            Err(e) => {
                warn!(%flow_id, uid = %key.uid, error = %e, "Cannot read backlog");
                return Vec::new();
            }
        };
        uow.received_messages_for_instance(key).unwrap_or_else(|e| {
            warn!(%flow_id, uid = %key.uid, error = %e, "Cannot read backlog");
            Vec::new()
        })
    }

    async fn handle_cancel(
        &self,
        key: InstanceKey,
        message_id: MessageIdentifier,
        flow_id: FlowId,
        reason: ReasonForCancel,
        attempt: u32,
    ) {
        match reason.disposition() {
            CancelDisposition::Nothing => {
                debug!(%flow_id, %message_id, %reason, "Step cancelled, nothing to delete");
            }
            CancelDisposition::KeepMessage => {
                debug!(%flow_id, %message_id, %reason, "Step cancelled, message stays in backlog");
            }
            CancelDisposition::DeleteMessage => {
                info!(%flow_id, %message_id, %reason, "Step cancelled, deleting message");
                self.delete_message(message_id, None, flow_id).await;
            }
            CancelDisposition::DeleteDialogAndMessage(dialog_uuid) => {
                info!(%flow_id, %message_id, %dialog_uuid, "Dialog response without matching step");
                self.delete_message(message_id, Some(dialog_uuid), flow_id)
                    .await;
            }
            CancelDisposition::SaveFailure => {
                if let SaveFailurePolicy::RetryAfter {
                    delay,
                    max_attempts,
                } = self.config.save_failure_policy
                {
                    if attempt < max_attempts {
                        warn!(%flow_id, %message_id, attempt, ?delay, "Step not saved, retrying");
                        self.schedule_retry(key, message_id, flow_id, attempt + 1, delay);
                        return;
                    }
                }
                error!(%flow_id, %message_id, attempt, "Step not saved, dropping message");
                self.delete_message(message_id, None, flow_id).await;
            }
        }
        self.notify_processed(message_id, flow_id).await;
    }

    /// Delete a received message, posting a dialog deletion first if asked.
    async fn delete_message(
        &self,
        message_id: MessageIdentifier,
        dialog_uuid: Option<Uuid>,
        flow_id: FlowId,
    ) {
        let mut uow = match self.context_creator.begin(flow_id).await {
            Ok(uow) => uow,
            Err(e) => {
                error!(%flow_id, %message_id, error = %e, "Cannot open unit of work to delete message");
                return;
            }
        };

        if let Some(dialog_uuid) = dialog_uuid {
            let delete_dialog =
                OutboundProtocolMessage::delete_dialog(message_id.owned_identity, dialog_uuid);
            if let Err(e) = self
                .channel_sender
                .post_channel_message(delete_dialog, self.prng.as_ref(), uow.as_mut())
                .await
            {
                warn!(%flow_id, %dialog_uuid, error = %e, "Could not post dialog deletion");
            }
        }

        if let Err(e) = uow.delete_received_message(&message_id) {
            error!(%flow_id, %message_id, error = %e, "Could not delete received message");
            return;
        }
        if let Err(e) = uow.commit().await {
            error!(%flow_id, %message_id, error = %e, "Could not commit message deletion");
        }
    }
}
