//! # Core Identifiers
//!
//! ## Clusters
//!
//! - **Identities**: `CryptoIdentity`, `GroupIdentifier`
//! - **Protocol addressing**: `Uid`, `CryptoProtocolId`, `MessageIdentifier`
//! - **Tracing**: `FlowId`

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fmt;
use uuid::Uuid;

// =============================================================================
// CLUSTER A: IDENTITIES
// =============================================================================

/// A 32-byte cryptographic identity, either owned by this device or a contact.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct CryptoIdentity(pub [u8; 32]);

impl CryptoIdentity {
    /// Raw bytes of the identity.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl From<[u8; 32]> for CryptoIdentity {
    fn from(bytes: [u8; 32]) -> Self {
        Self(bytes)
    }
}

impl fmt::Debug for CryptoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CryptoIdentity({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for CryptoIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// Opaque identifier of a group (server, group uid and category in practice).
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupIdentifier(pub Vec<u8>);

impl GroupIdentifier {
    #[must_use]
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for GroupIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let shown = &self.0[..self.0.len().min(6)];
        write!(f, "GroupIdentifier({}..)", hex::encode(shown))
    }
}

// =============================================================================
// CLUSTER B: PROTOCOL ADDRESSING
// =============================================================================

/// Length in bytes of a [`Uid`].
pub const UID_LENGTH: usize = 32;

/// Domain separation prefix for uids derived from domain inputs.
const DERIVED_UID_PREFIX: &[u8] = b"protocol-instance-uid";

/// Fixed-size unique identifier.
///
/// Protocol instance uids are drawn from the PRNG when an instance is started,
/// except for protocols that must always address the same instance for a given
/// domain object (group management derives it from the group identifier).
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, Default)]
pub struct Uid(pub [u8; UID_LENGTH]);

impl Uid {
    /// Deterministically derive a uid from a protocol and its domain input.
    ///
    /// Two calls with the same arguments always return the same uid, which
    /// makes re-targeting trigger messages at an existing instance idempotent.
    #[must_use]
    pub fn derived(protocol: CryptoProtocolId, domain_input: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(DERIVED_UID_PREFIX);
        hasher.update(protocol.raw().to_be_bytes());
        hasher.update(domain_input);
        Self(hasher.finalize().into())
    }

    /// Uid addressing the group management instance of a group.
    #[must_use]
    pub fn for_group(group: &GroupIdentifier) -> Self {
        Self::derived(CryptoProtocolId::GroupManagement, group.as_bytes())
    }

    #[must_use]
    pub fn as_bytes(&self) -> &[u8; UID_LENGTH] {
        &self.0
    }
}

impl fmt::Debug for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Uid({}..)", hex::encode(&self.0[..4]))
    }
}

impl fmt::Display for Uid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", hex::encode(&self.0[..8]))
    }
}

/// The kind of cryptographic protocol a protocol instance runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum CryptoProtocolId {
    /// Generic dialog/response plumbing shared by all protocols.
    Generic,
    DeviceDiscoveryForContactIdentity,
    ChannelCreationWithContactDevice,
    ChannelCreationWithOwnedDevice,
    TrustEstablishmentWithSas,
    TrustEstablishmentWithMutualScan,
    ContactMutualIntroduction,
    IdentityDetailsPublication,
    DownloadIdentityPhoto,
    GroupManagement,
    GroupInvitation,
    DownloadGroupPhoto,
    GroupV2,
    DownloadGroupV2Photo,
    ContactManagement,
    KeycloakContactAddition,
    OneToOneContactInvitation,
    FullRatchet,
    OwnedIdentityDeletion,
    OwnedIdentityTransfer,
    KeycloakBinding,
    Synchronization,
}

impl CryptoProtocolId {
    /// Stable numeric identifier, used in derived uids.
    #[must_use]
    pub fn raw(self) -> u16 {
        match self {
            Self::Generic => 0,
            Self::DeviceDiscoveryForContactIdentity => 1,
            Self::ChannelCreationWithContactDevice => 2,
            Self::TrustEstablishmentWithSas => 3,
            Self::ContactMutualIntroduction => 4,
            Self::GroupManagement => 5,
            Self::GroupInvitation => 6,
            Self::ContactManagement => 7,
            Self::IdentityDetailsPublication => 8,
            Self::DownloadIdentityPhoto => 9,
            Self::DownloadGroupPhoto => 10,
            Self::KeycloakContactAddition => 11,
            Self::TrustEstablishmentWithMutualScan => 12,
            Self::FullRatchet => 13,
            Self::OneToOneContactInvitation => 14,
            Self::GroupV2 => 15,
            Self::DownloadGroupV2Photo => 16,
            Self::ChannelCreationWithOwnedDevice => 17,
            Self::OwnedIdentityDeletion => 18,
            Self::KeycloakBinding => 19,
            Self::Synchronization => 20,
            Self::OwnedIdentityTransfer => 21,
        }
    }
}

/// Identifier of a message: the owned identity it belongs to plus a uid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MessageIdentifier {
    pub owned_identity: CryptoIdentity,
    pub uid: Uid,
}

impl MessageIdentifier {
    #[must_use]
    pub fn new(owned_identity: CryptoIdentity, uid: Uid) -> Self {
        Self { owned_identity, uid }
    }
}

impl fmt::Display for MessageIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owned_identity, self.uid)
    }
}

// =============================================================================
// CLUSTER C: TRACING
// =============================================================================

/// Correlates all log lines and notifications of one logical flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowId(pub Uuid);

impl FlowId {
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for FlowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for FlowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}
