//! In-memory contact directory.

use crate::domain::ContactStatus;
use crate::error::DirectoryError;
use crate::ports::outbound::ContactDirectory;
use async_trait::async_trait;
use parking_lot::RwLock;
use shared_types::CryptoIdentity;
use std::collections::{HashMap, HashSet};

type ContactKey = (CryptoIdentity, CryptoIdentity);

/// Contacts held in memory, keyed by `(owned identity, contact identity)`.
#[derive(Default)]
pub struct InMemoryContactDirectory {
    contacts: RwLock<HashMap<ContactKey, ContactStatus>>,
    failing: RwLock<HashSet<ContactKey>>,
}

impl InMemoryContactDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn upsert(&self, owned: CryptoIdentity, contact: CryptoIdentity, status: ContactStatus) {
        self.contacts.write().insert((owned, contact), status);
    }

    /// Returns the new status, or `None` if the contact is unknown.
    pub fn set_one_to_one(
        &self,
        owned: CryptoIdentity,
        contact: CryptoIdentity,
        is_one_to_one: bool,
    ) -> Option<ContactStatus> {
        let mut contacts = self.contacts.write();
        let status = contacts.get_mut(&(owned, contact))?;
        status.is_one_to_one = is_one_to_one;
        Some(*status)
    }

    pub fn remove(&self, owned: CryptoIdentity, contact: CryptoIdentity) {
        self.contacts.write().remove(&(owned, contact));
    }

    /// Make lookups for this contact fail until cleared.
    pub fn fail_lookups_for(&self, owned: CryptoIdentity, contact: CryptoIdentity, fail: bool) {
        let mut failing = self.failing.write();
        if fail {
            failing.insert((owned, contact));
        } else {
            failing.remove(&(owned, contact));
        }
    }
}

#[async_trait]
impl ContactDirectory for InMemoryContactDirectory {
    async fn contact_status(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
    ) -> Result<Option<ContactStatus>, DirectoryError> {
        if self.failing.read().contains(&(owned_identity, contact_identity)) {
            return Err(DirectoryError::Unavailable {
                reason: format!("lookup of {contact_identity} failed"),
            });
        }
        Ok(self
            .contacts
            .read()
            .get(&(owned_identity, contact_identity))
            .copied())
    }
}
