//! Engine harness shared by the integration flows.

use protocol_manager::adapters::{
    InMemoryContactDirectory, MemoryStore, OutboxChannelSender, RecordingNotifier,
    ScriptedStepEngine, StoreSnapshot,
};
use protocol_manager::{
    ContactStatus, GenericReceivedMessage, MessageKind, ProtocolManagerApi, ProtocolManagerConfig,
    ProtocolManagerService, ProtocolStartRequest,
};
use shared_bus::ProtocolEvent;
use shared_types::{
    CryptoIdentity, CryptoProtocolId, FlowId, ManualTimeSource, MessageIdentifier, SeededPrng, Uid,
};
use std::sync::Arc;

pub const SAS: CryptoProtocolId = CryptoProtocolId::TrustEstablishmentWithSas;
pub const DAY_MS: u64 = 24 * 3600 * 1000;

pub fn owner() -> CryptoIdentity {
    CryptoIdentity([0xA1; 32])
}

pub fn contact(tag: u8) -> CryptoIdentity {
    CryptoIdentity([tag; 32])
}

pub fn uid(tag: u8) -> Uid {
    Uid([tag; 32])
}

/// Protocol manager wired to in-memory adapters.
pub struct TestEngine {
    pub manager: ProtocolManagerService,
    pub store: MemoryStore,
    pub steps: Arc<ScriptedStepEngine>,
    pub notifier: Arc<RecordingNotifier>,
    pub contacts: Arc<InMemoryContactDirectory>,
    pub clock: Arc<ManualTimeSource>,
}

impl TestEngine {
    pub fn new() -> Self {
        Self::build(ProtocolManagerConfig::default(), MemoryStore::new(), 1_000)
    }

    pub fn with_config(config: ProtocolManagerConfig) -> Self {
        Self::build(config, MemoryStore::new(), 1_000)
    }

    pub fn from_snapshot(snapshot: StoreSnapshot, now: u64) -> Self {
        Self::build(
            ProtocolManagerConfig::default(),
            MemoryStore::from_snapshot(snapshot),
            now,
        )
    }

    pub fn build(config: ProtocolManagerConfig, store: MemoryStore, now: u64) -> Self {
        let steps = Arc::new(ScriptedStepEngine::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let contacts = Arc::new(InMemoryContactDirectory::new());
        let clock = Arc::new(ManualTimeSource::new(now));
        let manager = ProtocolManagerService::builder(config)
            .context_creator(Arc::new(store.clone()))
            .channel_sender(Arc::new(OutboxChannelSender::new(clock.clone())))
            .step_engine(steps.clone())
            .contact_directory(contacts.clone())
            .notifier(notifier.clone())
            .prng(Arc::new(SeededPrng::new(7)))
            .clock(clock.clone())
            .build()
            .unwrap();
        Self {
            manager,
            store,
            steps,
            notifier,
            contacts,
            clock,
        }
    }

    /// Accept a network message for `instance` of the SAS protocol.
    pub async fn receive(&self, network_tag: u8, instance: u8, kind: u16) -> MessageIdentifier {
        self.manager
            .accept_received_message(
                GenericReceivedMessage {
                    owned_identity: owner(),
                    network_uid: Some(uid(network_tag)),
                    protocol_id: SAS,
                    protocol_instance_uid: uid(instance),
                    kind: MessageKind(kind),
                    payload: vec![network_tag],
                    dialog_uuid: None,
                },
                FlowId::new(),
            )
            .await
            .unwrap()
    }

    /// Start `instance` of `protocol` with a local message of `kind`.
    pub async fn start(&self, protocol: CryptoProtocolId, instance: u8, kind: u16) -> MessageIdentifier {
        self.manager
            .initiate_protocol(
                ProtocolStartRequest {
                    owned_identity: owner(),
                    protocol_id: protocol,
                    instance_uid: Some(uid(instance)),
                    kind: MessageKind(kind),
                    payload: vec![],
                },
                FlowId::new(),
            )
            .await
            .unwrap()
    }

    pub async fn idle(&self) {
        self.manager.wait_until_idle().await;
    }

    pub async fn snapshot(&self) -> StoreSnapshot {
        self.store.snapshot().await
    }

    pub fn set_contact(&self, contact: CryptoIdentity, is_one_to_one: bool) {
        self.contacts.upsert(
            owner(),
            contact,
            ContactStatus {
                is_active: true,
                is_one_to_one,
            },
        );
    }

    /// Number of `ProtocolMessageProcessed` notifications for `message_id`.
    pub fn processed(&self, message_id: MessageIdentifier) -> usize {
        self.notifier
            .events()
            .iter()
            .filter(|e| {
                matches!(e, ProtocolEvent::ProtocolMessageProcessed { message_id: id, .. } if *id == message_id)
            })
            .count()
    }

    pub fn executed(&self) -> Vec<MessageIdentifier> {
        self.steps
            .executed()
            .into_iter()
            .map(|s| s.message_id)
            .collect()
    }
}
