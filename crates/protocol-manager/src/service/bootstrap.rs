//! Startup reconciliation.
//!
//! Run once, the first time the application appears on screen. Each task is
//! queued on the maintenance lane, in order.

use super::{ProtocolManagerService, WorkKey};
use crate::domain::lifecycle;
use crate::error::ProtocolResult;
use shared_types::{CryptoProtocolId, FlowId};
use tracing::{error, info};

/// One reconciliation task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum BootstrapTask {
    DeleteOwnedIdentityTransferInstances,
    DeleteOwnedIdentityTransferMessages,
    DeleteFinalStateInstances,
    DeleteObsoleteMessages,
    ReprocessReceivedMessages,
    RescanWaitingInstances,
}

const BOOTSTRAP_TASKS: [BootstrapTask; 6] = [
    BootstrapTask::DeleteOwnedIdentityTransferInstances,
    BootstrapTask::DeleteOwnedIdentityTransferMessages,
    BootstrapTask::DeleteFinalStateInstances,
    BootstrapTask::DeleteObsoleteMessages,
    BootstrapTask::ReprocessReceivedMessages,
    BootstrapTask::RescanWaitingInstances,
];

impl ProtocolManagerService {
    pub(crate) fn schedule_bootstrap(&self, flow_id: FlowId) {
        info!(%flow_id, "Scheduling protocol manager bootstrap");
        for task in BOOTSTRAP_TASKS {
            let this = self.clone();
            self.queue.submit(WorkKey::Maintenance, async move {
                if let Err(e) = this.run_bootstrap_task(task, flow_id).await {
                    error!(%flow_id, ?task, error = %e, "Bootstrap task failed");
                }
            });
        }
    }

    async fn run_bootstrap_task(&self, task: BootstrapTask, flow_id: FlowId) -> ProtocolResult<()> {
        match task {
            BootstrapTask::DeleteOwnedIdentityTransferInstances => {
                self.delete_owned_identity_transfer_instances(flow_id).await
            }
            BootstrapTask::DeleteOwnedIdentityTransferMessages => {
                self.delete_owned_identity_transfer_messages(flow_id).await
            }
            BootstrapTask::DeleteFinalStateInstances => {
                self.delete_final_state_instances(flow_id).await
            }
            BootstrapTask::DeleteObsoleteMessages => self.delete_obsolete_messages(flow_id).await,
            BootstrapTask::ReprocessReceivedMessages => {
                self.reprocess_received_messages(flow_id).await
            }
            BootstrapTask::RescanWaitingInstances => {
                self.rescan_waiting_entries(flow_id).await.map(|_| ())
            }
        }
    }

    /// A transfer cannot survive a restart: the other device has given up.
    async fn delete_owned_identity_transfer_instances(&self, flow_id: FlowId) -> ProtocolResult<()> {
        let mut uow = self.context_creator.begin(flow_id).await?;
        let transfers: Vec<_> = uow
            .all_instances()?
            .into_iter()
            .filter(|i| i.protocol_id == CryptoProtocolId::OwnedIdentityTransfer)
            .collect();
        if transfers.is_empty() {
            return Ok(());
        }
        for instance in &transfers {
            lifecycle::abort(uow.as_mut(), instance.key());
        }
        uow.commit().await?;
        info!(%flow_id, count = transfers.len(), "Deleted owned identity transfer instances");
        Ok(())
    }

    /// Replaying a leftover transfer message would start a new transfer.
    async fn delete_owned_identity_transfer_messages(&self, flow_id: FlowId) -> ProtocolResult<()> {
        let mut uow = self.context_creator.begin(flow_id).await?;
        let stale: Vec<_> = uow
            .all_received_messages()?
            .into_iter()
            .filter(|m| m.protocol_id == CryptoProtocolId::OwnedIdentityTransfer)
            .map(|m| m.message_id)
            .collect();
        if stale.is_empty() {
            return Ok(());
        }
        for message_id in &stale {
            uow.delete_received_message(message_id)?;
        }
        uow.commit().await?;
        info!(%flow_id, count = stale.len(), "Deleted owned identity transfer messages");
        Ok(())
    }

    async fn delete_final_state_instances(&self, flow_id: FlowId) -> ProtocolResult<()> {
        let mut uow = self.context_creator.begin(flow_id).await?;
        let finished: Vec<_> = uow
            .all_instances()?
            .into_iter()
            .filter(|i| self.step_engine.is_final_state(i.protocol_id, i.state_id))
            .collect();
        if finished.is_empty() {
            return Ok(());
        }
        for instance in &finished {
            lifecycle::finish(uow.as_mut(), instance)?;
        }
        uow.commit().await?;
        info!(%flow_id, count = finished.len(), "Deleted instances in a final state");
        Ok(())
    }

    /// Old messages with no instance will never find a step. Also purges
    /// expired kept-for-later messages.
    async fn delete_obsolete_messages(&self, flow_id: FlowId) -> ProtocolResult<()> {
        let now = self.clock.now();
        let purged = self.kept_for_later.purge_older_than(now);
        if !purged.is_empty() {
            info!(%flow_id, count = purged.len(), "Purged expired kept-for-later messages");
        }

        let cutoff = now.saturating_sub(self.config.obsolete_message_age.as_millis() as u64);
        let mut uow = self.context_creator.begin(flow_id).await?;
        let mut obsolete = Vec::new();
        for message in uow.all_received_messages()? {
            if message.timestamp < cutoff && uow.get_instance(message.instance_key())?.is_none() {
                obsolete.push(message.message_id);
            }
        }
        if obsolete.is_empty() {
            return Ok(());
        }
        for message_id in &obsolete {
            uow.delete_received_message(message_id)?;
        }
        uow.commit().await?;
        info!(%flow_id, count = obsolete.len(), "Deleted obsolete received messages");
        Ok(())
    }

    async fn reprocess_received_messages(&self, flow_id: FlowId) -> ProtocolResult<()> {
        let uow = self.context_creator.begin(flow_id).await?;
        let messages = uow.all_received_messages()?;
        drop(uow);
        info!(%flow_id, count = messages.len(), "Reprocessing received messages");
        for message in messages {
            self.submit_step(message.instance_key(), message.message_id, flow_id, 1);
        }
        Ok(())
    }
}
