//! # Protocol Instance Lifecycle
//!
//! Abort cascade and normal termination, expressed over an explicit unit of
//! work so the caller decides when (and whether) the result is committed.
//!
//! ## Cascade
//!
//! ```text
//!            P                abort(C1):
//!          /   \                C1 deleted, backlog of C1 deleted
//!        C1     C2              link P→C1 deleted, recurse into P
//!                                 P deleted, link P→C2 deleted, recurse into C2
//! ```
//!
//! The recursion is guarded twice: rows are deleted before recursing and a
//! visited set stops revisits. A failing store call stops the current branch;
//! deletions already made stay in the unit of work.

use super::entities::{InstanceKey, ProtocolInstance};
use crate::error::StoreResult;
use crate::ports::outbound::UnitOfWork;
use shared_types::Uid;
use std::collections::HashSet;
use tracing::{debug, warn};

/// What an abort removed.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AbortReport {
    pub instances_deleted: Vec<Uid>,
    pub messages_deleted: usize,
    pub links_deleted: usize,
    pub waiting_entries_deleted: usize,
    /// Branches cut short by a store failure.
    pub failed_branches: usize,
}

impl AbortReport {
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.instances_deleted.is_empty()
            && self.messages_deleted == 0
            && self.links_deleted == 0
            && self.waiting_entries_deleted == 0
    }
}

/// Abort `key` and every instance transitively linked to it, in either
/// direction. Aborting an absent instance is a no-op.
pub fn abort(uow: &mut dyn UnitOfWork, key: InstanceKey) -> AbortReport {
    let mut visited = HashSet::new();
    let mut report = AbortReport::default();
    abort_within(uow, key, &mut visited, &mut report);
    debug!(
        flow_id = %uow.flow_id(),
        owned_identity = %key.owned_identity,
        uid = %key.uid,
        instances = report.instances_deleted.len(),
        messages = report.messages_deleted,
        "Abort cascade applied"
    );
    report
}

fn abort_within(
    uow: &mut dyn UnitOfWork,
    key: InstanceKey,
    visited: &mut HashSet<Uid>,
    report: &mut AbortReport,
) {
    if !visited.insert(key.uid) {
        return;
    }

    if let Err(e) = delete_instance_and_backlog(uow, key, report) {
        warn!(uid = %key.uid, error = %e, "Abort: could not delete instance");
        report.failed_branches += 1;
        return;
    }

    let children = match uow.links_with_parent(key) {
        Ok(links) => links,
        Err(e) => {
            warn!(uid = %key.uid, error = %e, "Abort: could not read child links");
            report.failed_branches += 1;
            return;
        }
    };
    for link in children {
        if matches!(uow.delete_link(&link), Ok(true)) {
            report.links_deleted += 1;
        }
        abort_within(
            uow,
            InstanceKey::new(key.owned_identity, link.child_uid),
            visited,
            report,
        );
    }

    let parents = match uow.links_with_child(key) {
        Ok(links) => links,
        Err(e) => {
            warn!(uid = %key.uid, error = %e, "Abort: could not read parent links");
            report.failed_branches += 1;
            return;
        }
    };
    for link in parents {
        if matches!(uow.delete_link(&link), Ok(true)) {
            report.links_deleted += 1;
        }
        abort_within(
            uow,
            InstanceKey::new(key.owned_identity, link.parent_uid),
            visited,
            report,
        );
    }

    match uow.delete_waiting_entries_for_instance(key) {
        Ok(n) => report.waiting_entries_deleted += n,
        Err(e) => {
            warn!(uid = %key.uid, error = %e, "Abort: could not delete waiting entries");
            report.failed_branches += 1;
        }
    }
}

fn delete_instance_and_backlog(
    uow: &mut dyn UnitOfWork,
    key: InstanceKey,
    report: &mut AbortReport,
) -> StoreResult<()> {
    if uow.delete_instance(key)? {
        report.instances_deleted.push(key.uid);
    }
    report.messages_deleted += uow.delete_received_messages_for_instance(key)?;
    Ok(())
}

/// Normal termination: remove the instance, its links and waiting entries.
///
/// Linked instances are left alone and the backlog is kept; leftover
/// messages are swept once obsolete.
pub fn finish(uow: &mut dyn UnitOfWork, instance: &ProtocolInstance) -> StoreResult<()> {
    let key = instance.key();
    uow.delete_instance(key)?;
    for link in uow.links_with_parent(key)? {
        uow.delete_link(&link)?;
    }
    for link in uow.links_with_child(key)? {
        uow.delete_link(&link)?;
    }
    uow.delete_waiting_entries_for_instance(key)?;
    debug!(uid = %key.uid, protocol = ?instance.protocol_id, "Protocol instance finished");
    Ok(())
}
