//! In-memory durable store.
//!
//! A unit of work locks the tables for its whole lifetime and edits a private
//! copy of them. Commit swaps the copy in; dropping the unit of work throws it
//! away. Units of work are therefore fully serialized.
//!
//! The tables can be exported to JSON and imported again, which is how tests
//! simulate a restart.

use crate::domain::{
    InstanceKey, LinkBetweenProtocolInstances, OutboxMessage, ProtocolInstance, ReceivedMessage,
    WaitingForOneToOneContact,
};
use crate::error::{StoreError, StoreResult};
use crate::ports::outbound::{CommitReceipt, ContextCreator, UnitOfWork};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use shared_types::{CryptoIdentity, FlowId, MessageIdentifier};
use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

#[derive(Debug, Clone, Default)]
struct Tables {
    instances: HashMap<InstanceKey, ProtocolInstance>,
    /// Keyed by insertion sequence.
    received: BTreeMap<u64, ReceivedMessage>,
    links: Vec<LinkBetweenProtocolInstances>,
    waiting: Vec<WaitingForOneToOneContact>,
    outbox: Vec<OutboxMessage>,
    next_sequence: u64,
}

impl Tables {
    fn received_sorted(&self, filter: impl Fn(&ReceivedMessage) -> bool) -> Vec<ReceivedMessage> {
        // BTreeMap order is insertion order; the stable sort keeps it as the
        // tie breaker for equal timestamps.
        let mut rows: Vec<ReceivedMessage> = self
            .received
            .values()
            .filter(|m| filter(m))
            .cloned()
            .collect();
        rows.sort_by_key(|m| m.timestamp);
        rows
    }

    fn sequence_of(&self, id: &MessageIdentifier) -> Option<u64> {
        self.received
            .iter()
            .find(|(_, m)| m.message_id == *id)
            .map(|(seq, _)| *seq)
    }
}

/// Serializable image of the whole store.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreSnapshot {
    pub instances: Vec<ProtocolInstance>,
    /// In insertion order.
    pub received_messages: Vec<ReceivedMessage>,
    pub links: Vec<LinkBetweenProtocolInstances>,
    pub waiting_entries: Vec<WaitingForOneToOneContact>,
    pub outbox: Vec<OutboxMessage>,
}

impl From<&Tables> for StoreSnapshot {
    fn from(tables: &Tables) -> Self {
        let mut instances: Vec<_> = tables.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.key());
        Self {
            instances,
            received_messages: tables.received.values().cloned().collect(),
            links: tables.links.clone(),
            waiting_entries: tables.waiting.clone(),
            outbox: tables.outbox.clone(),
        }
    }
}

impl From<StoreSnapshot> for Tables {
    fn from(snapshot: StoreSnapshot) -> Self {
        let received: BTreeMap<u64, ReceivedMessage> = snapshot
            .received_messages
            .into_iter()
            .enumerate()
            .map(|(seq, m)| (seq as u64, m))
            .collect();
        Self {
            instances: snapshot
                .instances
                .into_iter()
                .map(|i| (i.key(), i))
                .collect(),
            next_sequence: received.len() as u64,
            received,
            links: snapshot.links,
            waiting: snapshot.waiting_entries,
            outbox: snapshot.outbox,
        }
    }
}

#[derive(Debug, Default)]
struct FailureInjection {
    unavailable: AtomicBool,
    commit_failures: AtomicU32,
}

impl FailureInjection {
    fn take_commit_failure(&self) -> bool {
        self.commit_failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

/// In-memory store with serializable units of work.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
    failures: Arc<FailureInjection>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_snapshot(snapshot: StoreSnapshot) -> Self {
        Self {
            tables: Arc::new(Mutex::new(snapshot.into())),
            failures: Arc::default(),
        }
    }

    /// Rebuild a store from [`MemoryStore::export_json`] output.
    pub fn import_json(json: &str) -> StoreResult<Self> {
        let snapshot: StoreSnapshot =
            serde_json::from_str(json).map_err(|e| StoreError::Snapshot {
                reason: e.to_string(),
            })?;
        Ok(Self::from_snapshot(snapshot))
    }

    /// Committed state. Waits for any open unit of work to finish.
    pub async fn snapshot(&self) -> StoreSnapshot {
        StoreSnapshot::from(&*self.tables.lock().await)
    }

    pub async fn export_json(&self) -> StoreResult<String> {
        serde_json::to_string(&self.snapshot().await).map_err(|e| StoreError::Snapshot {
            reason: e.to_string(),
        })
    }

    /// Make `begin` fail until called again with `false`.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.failures.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Make the next `n` commits fail.
    pub fn fail_next_commits(&self, n: u32) {
        self.failures.commit_failures.store(n, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContextCreator for MemoryStore {
    async fn begin(&self, flow_id: FlowId) -> StoreResult<Box<dyn UnitOfWork>> {
        if self.failures.unavailable.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable {
                reason: "memory store switched off".into(),
            });
        }
        let guard = Arc::clone(&self.tables).lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryUnitOfWork {
            flow_id,
            guard: Some(guard),
            working,
            inserted: Vec::new(),
            failures: Arc::clone(&self.failures),
        }))
    }
}

struct MemoryUnitOfWork {
    flow_id: FlowId,
    /// `None` once committed.
    guard: Option<OwnedMutexGuard<Tables>>,
    working: Tables,
    inserted: Vec<MessageIdentifier>,
    failures: Arc<FailureInjection>,
}

impl MemoryUnitOfWork {
    fn ensure_open(&self) -> StoreResult<()> {
        if self.guard.is_some() {
            Ok(())
        } else {
            Err(StoreError::AlreadyFinished)
        }
    }
}

#[async_trait]
impl UnitOfWork for MemoryUnitOfWork {
    fn flow_id(&self) -> FlowId {
        self.flow_id
    }

    fn get_instance(&self, key: InstanceKey) -> StoreResult<Option<ProtocolInstance>> {
        Ok(self.working.instances.get(&key).cloned())
    }

    fn save_instance(&mut self, instance: ProtocolInstance) -> StoreResult<()> {
        self.ensure_open()?;
        self.working.instances.insert(instance.key(), instance);
        Ok(())
    }

    fn delete_instance(&mut self, key: InstanceKey) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(self.working.instances.remove(&key).is_some())
    }

    fn all_instances(&self) -> StoreResult<Vec<ProtocolInstance>> {
        let mut instances: Vec<_> = self.working.instances.values().cloned().collect();
        instances.sort_by_key(|i| i.created_at);
        Ok(instances)
    }

    fn get_received_message(&self, id: &MessageIdentifier) -> StoreResult<Option<ReceivedMessage>> {
        Ok(self
            .working
            .received
            .values()
            .find(|m| m.message_id == *id)
            .cloned())
    }

    fn insert_received_message(&mut self, message: ReceivedMessage) -> StoreResult<()> {
        self.ensure_open()?;
        if self.working.sequence_of(&message.message_id).is_some() {
            return Err(StoreError::DuplicateReceivedMessage {
                message_id: message.message_id,
            });
        }
        let seq = self.working.next_sequence;
        self.working.next_sequence += 1;
        self.inserted.push(message.message_id);
        self.working.received.insert(seq, message);
        Ok(())
    }

    fn delete_received_message(&mut self, id: &MessageIdentifier) -> StoreResult<bool> {
        self.ensure_open()?;
        Ok(match self.working.sequence_of(id) {
            Some(seq) => self.working.received.remove(&seq).is_some(),
            None => false,
        })
    }

    fn received_messages_for_instance(&self, key: InstanceKey) -> StoreResult<Vec<ReceivedMessage>> {
        Ok(self.working.received_sorted(move |m| m.instance_key() == key))
    }

    fn delete_received_messages_for_instance(&mut self, key: InstanceKey) -> StoreResult<usize> {
        self.ensure_open()?;
        let before = self.working.received.len();
        self.working.received.retain(|_, m| m.instance_key() != key);
        Ok(before - self.working.received.len())
    }

    fn all_received_messages(&self) -> StoreResult<Vec<ReceivedMessage>> {
        Ok(self.working.received_sorted(|_| true))
    }

    fn insert_link(&mut self, link: LinkBetweenProtocolInstances) -> StoreResult<()> {
        self.ensure_open()?;
        if !self.working.links.contains(&link) {
            self.working.links.push(link);
        }
        Ok(())
    }

    fn links_with_parent(
        &self,
        parent: InstanceKey,
    ) -> StoreResult<Vec<LinkBetweenProtocolInstances>> {
        Ok(self
            .working
            .links
            .iter()
            .filter(|l| l.owned_identity == parent.owned_identity && l.parent_uid == parent.uid)
            .cloned()
            .collect())
    }

    fn links_with_child(&self, child: InstanceKey) -> StoreResult<Vec<LinkBetweenProtocolInstances>> {
        Ok(self
            .working
            .links
            .iter()
            .filter(|l| l.owned_identity == child.owned_identity && l.child_uid == child.uid)
            .cloned()
            .collect())
    }

    fn delete_link(&mut self, link: &LinkBetweenProtocolInstances) -> StoreResult<bool> {
        self.ensure_open()?;
        let before = self.working.links.len();
        self.working.links.retain(|l| l != link);
        Ok(before != self.working.links.len())
    }

    fn insert_waiting_entry(&mut self, entry: WaitingForOneToOneContact) -> StoreResult<()> {
        self.ensure_open()?;
        self.working.waiting.push(entry);
        Ok(())
    }

    fn waiting_entries_for(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
    ) -> StoreResult<Vec<WaitingForOneToOneContact>> {
        Ok(self
            .working
            .waiting
            .iter()
            .filter(|e| e.owned_identity == owned_identity && e.contact_identity == contact_identity)
            .cloned()
            .collect())
    }

    fn all_waiting_entries(&self) -> StoreResult<Vec<WaitingForOneToOneContact>> {
        Ok(self.working.waiting.clone())
    }

    fn delete_waiting_entry(&mut self, entry: &WaitingForOneToOneContact) -> StoreResult<bool> {
        self.ensure_open()?;
        let before = self.working.waiting.len();
        self.working.waiting.retain(|e| e.entry_id != entry.entry_id);
        Ok(before != self.working.waiting.len())
    }

    fn delete_waiting_entries_for_instance(&mut self, key: InstanceKey) -> StoreResult<usize> {
        self.ensure_open()?;
        let before = self.working.waiting.len();
        self.working.waiting.retain(|e| {
            e.owned_identity != key.owned_identity || e.protocol_instance_uid != key.uid
        });
        Ok(before - self.working.waiting.len())
    }

    fn push_outbox(&mut self, message: OutboxMessage) -> StoreResult<()> {
        self.ensure_open()?;
        self.working.outbox.push(message);
        Ok(())
    }

    async fn commit(&mut self) -> StoreResult<CommitReceipt> {
        let Some(mut guard) = self.guard.take() else {
            return Err(StoreError::AlreadyFinished);
        };
        if self.failures.take_commit_failure() {
            warn!(flow_id = %self.flow_id, "Injected commit failure");
            return Err(StoreError::CommitFailed {
                reason: "injected failure".into(),
            });
        }
        *guard = std::mem::take(&mut self.working);
        debug!(
            flow_id = %self.flow_id,
            inserted = self.inserted.len(),
            "Unit of work committed"
        );
        Ok(CommitReceipt {
            inserted_received_messages: std::mem::take(&mut self.inserted),
        })
    }
}
