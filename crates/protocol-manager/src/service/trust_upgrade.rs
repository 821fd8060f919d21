//! Trust-upgrade waiting manager.
//!
//! Instances parked until a contact becomes OneToOne are resumed either by
//! the targeted status-change event or by a full rescan at startup. The
//! contact is re-checked at resumption time; entries that do not qualify are
//! left alone, and one failing entry never blocks the others.

use super::ProtocolManagerService;
use crate::domain::WaitingForOneToOneContact;
use crate::error::ProtocolResult;
use crate::ports::inbound::ResumptionReport;
use crate::ports::outbound::UnitOfWork;
use shared_types::{CryptoIdentity, FlowId};
use std::collections::HashSet;
use tracing::{debug, info, warn};

impl ProtocolManagerService {
    /// Event path: entries waiting for exactly `(owned_identity, contact_identity)`.
    pub(crate) async fn resume_waiting_for(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
        flow_id: FlowId,
    ) -> ProtocolResult<ResumptionReport> {
        let uow = self.context_creator.begin(flow_id).await?;
        let entries = uow.waiting_entries_for(owned_identity, contact_identity)?;
        self.resume_entries(uow, entries, flow_id).await
    }

    /// Rescan path: every waiting entry.
    pub(crate) async fn rescan_waiting_entries(
        &self,
        flow_id: FlowId,
    ) -> ProtocolResult<ResumptionReport> {
        let uow = self.context_creator.begin(flow_id).await?;
        let entries = uow.all_waiting_entries()?;
        self.resume_entries(uow, entries, flow_id).await
    }

    async fn resume_entries(
        &self,
        mut uow: Box<dyn UnitOfWork>,
        entries: Vec<WaitingForOneToOneContact>,
        flow_id: FlowId,
    ) -> ProtocolResult<ResumptionReport> {
        let mut report = ResumptionReport::default();

        for entry in entries {
            if !self.entry_qualifies(&entry, flow_id, &mut report).await {
                continue;
            }

            if let Err(e) = self
                .channel_sender
                .post_channel_message(entry.resumption.clone(), self.prng.as_ref(), uow.as_mut())
                .await
            {
                warn!(%flow_id, uid = %entry.protocol_instance_uid, error = %e, "Could not post resumption message");
                report.failed += 1;
                continue;
            }

            // A posted resumption whose entry survives only causes a
            // duplicate resumption later, which finds no step.
            if let Err(e) = uow.delete_waiting_entry(&entry) {
                warn!(%flow_id, uid = %entry.protocol_instance_uid, error = %e, "Could not delete waiting entry");
            }
            report.resumed += 1;
        }

        if report.resumed == 0 {
            debug!(%flow_id, kept = report.kept, failed = report.failed, "No waiting instance resumed");
            return Ok(report);
        }

        let receipt = uow.commit().await?;
        drop(uow);
        info!(%flow_id, resumed = report.resumed, kept = report.kept, failed = report.failed, "Waiting instances resumed");

        self.submit_inserted(receipt, &HashSet::new(), flow_id)
            .await;
        Ok(report)
    }

    /// Re-check the contact behind `entry`, updating `report` when it does
    /// not qualify.
    async fn entry_qualifies(
        &self,
        entry: &WaitingForOneToOneContact,
        flow_id: FlowId,
        report: &mut ResumptionReport,
    ) -> bool {
        match self
            .contact_directory
            .contact_status(entry.owned_identity, entry.contact_identity)
            .await
        {
            Ok(Some(status)) if status.allows_resumption() => true,
            Ok(status) => {
                debug!(
                    %flow_id,
                    contact = %entry.contact_identity,
                    ?status,
                    "Contact does not qualify for resumption, entry kept"
                );
                report.kept += 1;
                false
            }
            Err(e) => {
                warn!(%flow_id, contact = %entry.contact_identity, error = %e, "Contact lookup failed, entry kept");
                report.failed += 1;
                false
            }
        }
    }
}
