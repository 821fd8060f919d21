//! # Kept-For-Later Buffer
//!
//! Inbound payloads that arrived before the object they refer to exists
//! (a group not created yet, a contact not added yet...) are parked here and
//! replayed when it appears. Entries live in memory only: the upstream layer
//! redelivers anything it has not been told was handled.

use parking_lot::Mutex;
use shared_types::{CryptoIdentity, GroupIdentifier, MessageIdentifier, Timestamp};
use std::collections::HashMap;
use std::time::Duration;
use tracing::debug;

/// Object a parked message is waiting for.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CorrelationKey {
    Group(GroupIdentifier),
    Contact(CryptoIdentity),
    GroupMember {
        group: GroupIdentifier,
        contact: CryptoIdentity,
    },
}

/// The parked payload itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeferredPayload {
    pub message_id: MessageIdentifier,
    pub payload: Vec<u8>,
    pub received_at: Timestamp,
}

/// A message waiting for a missing object.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeptForLaterMessage {
    /// From a contact, for a group v2 we do not know yet.
    GroupV2 {
        group: GroupIdentifier,
        message: DeferredPayload,
    },
    /// From another owned device, for a group v2 we do not know yet.
    OwnedDeviceGroupV2 {
        group: GroupIdentifier,
        message: DeferredPayload,
    },
    /// From an identity that is not a contact yet.
    ExpectingContact {
        contact: CryptoIdentity,
        message: DeferredPayload,
    },
    /// From another owned device, about a contact we do not have yet.
    OwnedDeviceExpectingContact {
        contact: CryptoIdentity,
        message: DeferredPayload,
    },
    /// From a contact that is not OneToOne yet.
    ExpectingOneToOneContact {
        contact: CryptoIdentity,
        message: DeferredPayload,
    },
    /// From a group v2 member we have not seen as a member yet.
    ExpectingGroupV2Member {
        group: GroupIdentifier,
        contact: CryptoIdentity,
        message: DeferredPayload,
    },
}

impl KeptForLaterMessage {
    #[must_use]
    pub fn correlation_key(&self) -> CorrelationKey {
        match self {
            Self::GroupV2 { group, .. } | Self::OwnedDeviceGroupV2 { group, .. } => {
                CorrelationKey::Group(group.clone())
            }
            Self::ExpectingContact { contact, .. }
            | Self::OwnedDeviceExpectingContact { contact, .. }
            | Self::ExpectingOneToOneContact { contact, .. } => CorrelationKey::Contact(*contact),
            Self::ExpectingGroupV2Member { group, contact, .. } => CorrelationKey::GroupMember {
                group: group.clone(),
                contact: *contact,
            },
        }
    }

    #[must_use]
    pub fn payload(&self) -> &DeferredPayload {
        match self {
            Self::GroupV2 { message, .. }
            | Self::OwnedDeviceGroupV2 { message, .. }
            | Self::ExpectingContact { message, .. }
            | Self::OwnedDeviceExpectingContact { message, .. }
            | Self::ExpectingOneToOneContact { message, .. }
            | Self::ExpectingGroupV2Member { message, .. } => message,
        }
    }

    #[must_use]
    pub fn owned_identity(&self) -> CryptoIdentity {
        self.payload().message_id.owned_identity
    }
}

/// Result of [`KeptForLaterManager::keep_for_later`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeepDecision {
    Kept,
    /// Too old to be worth keeping; the caller should acknowledge it upstream.
    TooOld,
}

type BufferKey = (CryptoIdentity, CorrelationKey);

/// Mutex-guarded map of parked messages.
pub struct KeptForLaterManager {
    max_age: Duration,
    buffer: Mutex<HashMap<BufferKey, Vec<KeptForLaterMessage>>>,
}

impl KeptForLaterManager {
    #[must_use]
    pub fn new(max_age: Duration) -> Self {
        Self {
            max_age,
            buffer: Mutex::new(HashMap::new()),
        }
    }

    /// Park `message` unless it is older than the configured maximum age.
    pub fn keep_for_later(&self, message: KeptForLaterMessage, now: Timestamp) -> KeepDecision {
        if self.is_expired(message.payload().received_at, now) {
            debug!(message_id = %message.payload().message_id, "Refusing to keep stale message");
            return KeepDecision::TooOld;
        }
        let key = (message.owned_identity(), message.correlation_key());
        self.buffer.lock().entry(key).or_default().push(message);
        KeepDecision::Kept
    }

    /// Remove and return every message parked for `key`, oldest first.
    pub fn drain(
        &self,
        owned_identity: CryptoIdentity,
        key: &CorrelationKey,
    ) -> Vec<KeptForLaterMessage> {
        self.buffer
            .lock()
            .remove(&(owned_identity, key.clone()))
            .unwrap_or_default()
    }

    /// Remove and return every message older than the maximum age at `now`.
    pub fn purge_older_than(&self, now: Timestamp) -> Vec<KeptForLaterMessage> {
        let mut buffer = self.buffer.lock();
        let mut purged = Vec::new();
        buffer.retain(|_, messages| {
            let (expired, kept): (Vec<_>, Vec<_>) = messages
                .drain(..)
                .partition(|m| self.is_expired(m.payload().received_at, now));
            purged.extend(expired);
            *messages = kept;
            !messages.is_empty()
        });
        purged
    }

    /// Number of parked messages across all keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.buffer.lock().values().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn is_expired(&self, received_at: Timestamp, now: Timestamp) -> bool {
        now.saturating_sub(received_at) > self.max_age.as_millis() as u64
    }
}
