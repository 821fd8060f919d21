//! # Protocol Manager Service
//!
//! Application service implementing [`ProtocolManagerApi`].
//!
//! ## Structure
//!
//! - `queue.rs` - Keyed work queue (per-instance serialization)
//! - `dispatcher.rs` - Step execution, cancel handling, backlog drain
//! - `trust_upgrade.rs` - Resumption of instances waiting for a OneToOne contact
//! - `bootstrap.rs` - Startup reconciliation
//! - `ingestion.rs` - Storing inbound messages and starting protocols
//!
//! Every unit of work that touches a protocol instance runs on the lane of
//! that instance. Maintenance work runs on its own lane; with the default
//! concurrency limit of 1 nothing on the queue ever overlaps.

mod bootstrap;
mod dispatcher;
mod ingestion;
pub mod queue;
mod trust_upgrade;


use crate::config::ProtocolManagerConfig;
use crate::domain::{
    CorrelationKey, GenericReceivedMessage, InstanceKey, KeepDecision, KeptForLaterManager,
    KeptForLaterMessage,
};
use crate::error::{ConfigError, ProtocolResult};
use crate::ports::inbound::{ProtocolManagerApi, ProtocolStartRequest, ResumptionReport};
use crate::ports::outbound::{
    ChannelSender, ContactDirectory, ContextCreator, ProtocolNotifier, StepEngine,
};
use async_trait::async_trait;
use queue::KeyedWorkQueue;
use shared_bus::ProtocolEvent;
use shared_types::{
    CryptoIdentity, FlowId, MessageIdentifier, OsPrng, PrngService, SystemTimeSource, TimeSource,
    Uid,
};
use std::sync::Arc;
use tracing::{debug, instrument};

/// Lane of the work queue a job runs on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKey {
    Instance(InstanceKey),
    Maintenance,
}

/// The protocol manager. Cheap to clone; clones share all state.
#[derive(Clone)]
pub struct ProtocolManagerService {
    config: Arc<ProtocolManagerConfig>,
    context_creator: Arc<dyn ContextCreator>,
    channel_sender: Arc<dyn ChannelSender>,
    step_engine: Arc<dyn StepEngine>,
    contact_directory: Arc<dyn ContactDirectory>,
    notifier: Arc<dyn ProtocolNotifier>,
    prng: Arc<dyn PrngService>,
    clock: Arc<dyn TimeSource>,
    kept_for_later: Arc<KeptForLaterManager>,
    queue: KeyedWorkQueue<WorkKey>,
}

impl ProtocolManagerService {
    #[must_use]
    pub fn builder(config: ProtocolManagerConfig) -> ProtocolManagerBuilder {
        ProtocolManagerBuilder::new(config)
    }

    #[must_use]
    pub fn config(&self) -> &ProtocolManagerConfig {
        &self.config
    }

    #[must_use]
    pub fn kept_for_later(&self) -> &KeptForLaterManager {
        &self.kept_for_later
    }

    /// Park a message until the object it needs appears.
    pub fn keep_for_later(&self, message: KeptForLaterMessage) -> KeepDecision {
        self.kept_for_later.keep_for_later(message, self.clock.now())
    }

    /// Hand back every message parked for `key`, oldest first.
    pub fn drain_kept_for_later(
        &self,
        owned_identity: CryptoIdentity,
        key: &CorrelationKey,
    ) -> Vec<KeptForLaterMessage> {
        self.kept_for_later.drain(owned_identity, key)
    }

    async fn notify(&self, event: ProtocolEvent) {
        self.notifier.notify(event).await;
    }

    async fn notify_processed(&self, message_id: MessageIdentifier, flow_id: FlowId) {
        self.notify(ProtocolEvent::ProtocolMessageProcessed {
            message_id,
            flow_id,
        })
        .await;
    }

    async fn notify_to_process(&self, message_id: MessageIdentifier, flow_id: FlowId) {
        self.notify(ProtocolEvent::ProtocolMessageToProcess {
            message_id,
            flow_id,
        })
        .await;
    }
}

#[async_trait]
impl ProtocolManagerApi for ProtocolManagerService {
    async fn process_received_message(&self, message_id: MessageIdentifier, flow_id: FlowId) {
        self.submit_stored_message(message_id, flow_id).await;
    }

    async fn abort_protocol(&self, owned_identity: CryptoIdentity, uid: Uid, flow_id: FlowId) {
        self.submit_abort(InstanceKey::new(owned_identity, uid), flow_id);
    }

    async fn accept_received_message(
        &self,
        message: GenericReceivedMessage,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier> {
        self.store_received_message(message, flow_id).await
    }

    async fn initiate_protocol(
        &self,
        request: ProtocolStartRequest,
        flow_id: FlowId,
    ) -> ProtocolResult<MessageIdentifier> {
        self.post_initial_message(request, flow_id).await
    }

    #[instrument(skip_all, fields(%owned_identity, contact = %contact_identity, %flow_id))]
    async fn contact_one_to_one_status_changed(
        &self,
        owned_identity: CryptoIdentity,
        contact_identity: CryptoIdentity,
        flow_id: FlowId,
    ) -> ProtocolResult<ResumptionReport> {
        self.resume_waiting_for(owned_identity, contact_identity, flow_id)
            .await
    }

    async fn application_appeared_on_screen(&self, first_time: bool, flow_id: FlowId) {
        if !first_time {
            debug!(%flow_id, "Application appeared on screen again, nothing to do");
            return;
        }
        self.schedule_bootstrap(flow_id);
    }

    async fn wait_until_idle(&self) {
        self.queue.idle().await;
    }
}

// =============================================================================
// BUILDER
// =============================================================================

/// Builds a [`ProtocolManagerService`]; every port is injected here.
pub struct ProtocolManagerBuilder {
    config: ProtocolManagerConfig,
    context_creator: Option<Arc<dyn ContextCreator>>,
    channel_sender: Option<Arc<dyn ChannelSender>>,
    step_engine: Option<Arc<dyn StepEngine>>,
    contact_directory: Option<Arc<dyn ContactDirectory>>,
    notifier: Option<Arc<dyn ProtocolNotifier>>,
    prng: Option<Arc<dyn PrngService>>,
    clock: Option<Arc<dyn TimeSource>>,
}

impl ProtocolManagerBuilder {
    #[must_use]
    pub fn new(config: ProtocolManagerConfig) -> Self {
        Self {
            config,
            context_creator: None,
            channel_sender: None,
            step_engine: None,
            contact_directory: None,
            notifier: None,
            prng: None,
            clock: None,
        }
    }

    #[must_use]
    pub fn context_creator(mut self, context_creator: Arc<dyn ContextCreator>) -> Self {
        self.context_creator = Some(context_creator);
        self
    }

    #[must_use]
    pub fn channel_sender(mut self, channel_sender: Arc<dyn ChannelSender>) -> Self {
        self.channel_sender = Some(channel_sender);
        self
    }

    #[must_use]
    pub fn step_engine(mut self, step_engine: Arc<dyn StepEngine>) -> Self {
        self.step_engine = Some(step_engine);
        self
    }

    #[must_use]
    pub fn contact_directory(mut self, contact_directory: Arc<dyn ContactDirectory>) -> Self {
        self.contact_directory = Some(contact_directory);
        self
    }

    #[must_use]
    pub fn notifier(mut self, notifier: Arc<dyn ProtocolNotifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    /// Defaults to the operating system PRNG.
    #[must_use]
    pub fn prng(mut self, prng: Arc<dyn PrngService>) -> Self {
        self.prng = Some(prng);
        self
    }

    /// Defaults to the system clock.
    #[must_use]
    pub fn clock(mut self, clock: Arc<dyn TimeSource>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn build(self) -> Result<ProtocolManagerService, ConfigError> {
        self.config.validate()?;

        let kept_for_later = Arc::new(KeptForLaterManager::new(
            self.config.kept_for_later_max_age,
        ));
        let queue = KeyedWorkQueue::new(self.config.max_concurrent_steps);

        Ok(ProtocolManagerService {
            context_creator: required(self.context_creator, "context_creator")?,
            channel_sender: required(self.channel_sender, "channel_sender")?,
            step_engine: required(self.step_engine, "step_engine")?,
            contact_directory: required(self.contact_directory, "contact_directory")?,
            notifier: required(self.notifier, "notifier")?,
            prng: self.prng.unwrap_or_else(|| Arc::new(OsPrng)),
            clock: self.clock.unwrap_or_else(|| Arc::new(SystemTimeSource)),
            config: Arc::new(self.config),
            kept_for_later,
            queue,
        })
    }
}

fn required<T: ?Sized>(port: Option<Arc<T>>, name: &'static str) -> Result<Arc<T>, ConfigError> {
    port.ok_or(ConfigError::MissingCollaborator { name })
}
