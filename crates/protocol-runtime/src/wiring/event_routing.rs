//! # Event Routing
//!
//! Inbound bus events the protocol manager reacts to:
//!
//! | Event | Action |
//! |-------|--------|
//! | `ContactOneToOneStatusChanged` (to OneToOne) | resume waiting instances |
//! | `ApplicationAppearedOnScreen` | startup reconciliation, first time only |
//! | `ProtocolFailed` | logged for the user-facing layer |

use protocol_manager::{ProtocolManagerApi, ResumptionReport};
use shared_bus::{EventFilter, EventTopic, ProtocolEvent, Subscription};
use shared_types::FlowId;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

/// What the router did with one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RouteOutcome {
    Resumption(ResumptionReport),
    ResumptionFailed,
    AppearanceForwarded,
    FailureReported,
    Ignored,
}

/// Routes bus events to the protocol manager.
pub struct EventRouter {
    manager: Arc<dyn ProtocolManagerApi>,
}

impl EventRouter {
    pub fn new(manager: Arc<dyn ProtocolManagerApi>) -> Self {
        Self { manager }
    }

    /// Topics the router needs to subscribe to.
    #[must_use]
    pub fn filter() -> EventFilter {
        EventFilter::topics(vec![
            EventTopic::ContactTrust,
            EventTopic::Application,
            EventTopic::ProtocolFailures,
        ])
    }

    pub async fn route(&self, event: ProtocolEvent) -> RouteOutcome {
        match event {
            ProtocolEvent::ContactOneToOneStatusChanged {
                owned_identity,
                contact_identity,
                is_one_to_one: true,
            } => {
                let flow_id = FlowId::new();
                match self
                    .manager
                    .contact_one_to_one_status_changed(owned_identity, contact_identity, flow_id)
                    .await
                {
                    Ok(report) => RouteOutcome::Resumption(report),
                    Err(e) => {
                        error!(%flow_id, contact = %contact_identity, error = %e, "Resumption pass failed");
                        RouteOutcome::ResumptionFailed
                    }
                }
            }
            ProtocolEvent::ContactOneToOneStatusChanged {
                contact_identity, ..
            } => {
                debug!(contact = %contact_identity, "Contact no longer OneToOne, nothing to resume");
                RouteOutcome::Ignored
            }
            ProtocolEvent::ApplicationAppearedOnScreen {
                first_time,
                flow_id,
            } => {
                self.manager
                    .application_appeared_on_screen(first_time, flow_id)
                    .await;
                RouteOutcome::AppearanceForwarded
            }
            ProtocolEvent::ProtocolFailed {
                owned_identity,
                protocol_instance_uid,
                protocol_id,
                failure,
            } => {
                warn!(
                    %owned_identity,
                    uid = %protocol_instance_uid,
                    protocol = ?protocol_id,
                    %failure,
                    "Protocol failed"
                );
                RouteOutcome::FailureReported
            }
            ProtocolEvent::ProtocolMessageToProcess { .. }
            | ProtocolEvent::ProtocolMessageProcessed { .. } => RouteOutcome::Ignored,
        }
    }

    /// Route events until the bus closes or `shutdown` flips.
    pub async fn run(self, mut subscription: Subscription, mut shutdown: watch::Receiver<bool>) {
        info!("Event router started");
        loop {
            tokio::select! {
                event = subscription.recv() => match event {
                    Some(event) => {
                        self.route(event).await;
                    }
                    None => {
                        info!("Event bus closed, router stopping");
                        break;
                    }
                },
                _ = shutdown.changed() => {
                    info!("Shutdown signal received, router stopping");
                    break;
                }
            }
        }
    }
}
