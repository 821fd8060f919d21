//! # Bus Flows
//!
//! The runtime container with its event router: inbound events arrive on the
//! shared bus and notifications leave through it.

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use protocol_manager::{
        ContactStatus, GenericReceivedMessage, MessageKind, OutboundProtocolMessage,
        ProtocolManagerApi, ProtocolStartRequest, StateId, StepOutcome,
    };
    use protocol_runtime::{EventRouter, ProtocolContainer, RuntimeConfig};
    use shared_bus::{EventFilter, EventPublisher, EventTopic, ProtocolEvent, Subscription};
    use shared_types::{FlowId, MessageIdentifier};
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::sync::watch;

    struct RunningContainer {
        container: ProtocolContainer,
        shutdown: watch::Sender<bool>,
    }

    async fn running_container() -> RunningContainer {
        let container = ProtocolContainer::new(RuntimeConfig::default())
            .await
            .unwrap();
        let (shutdown, shutdown_rx) = watch::channel(false);
        let router = EventRouter::new(Arc::new(container.manager.clone()));
        let subscription = container.event_bus.subscribe(EventRouter::filter());
        tokio::spawn(router.run(subscription, shutdown_rx));
        RunningContainer {
            container,
            shutdown,
        }
    }

    async fn next_processed(subscription: &mut Subscription) -> MessageIdentifier {
        loop {
            let event = tokio::time::timeout(Duration::from_secs(5), subscription.recv())
                .await
                .unwrap()
                .unwrap();
            if let ProtocolEvent::ProtocolMessageProcessed { message_id, .. } = event {
                return message_id;
            }
        }
    }

    #[tokio::test]
    async fn test_trust_event_on_bus_resumes_instance() {
        let running = running_container().await;
        let container = &running.container;
        container.step_engine.on(SAS, None, MessageKind(0), |input| {
            let resume = OutboundProtocolMessage::local(
                owner(),
                SAS,
                input.message.protocol_instance_uid,
                MessageKind(5),
                vec![],
            );
            Ok(StepOutcome::advance(StateId(1), vec![]).wait_for_one_to_one(contact(2), resume))
        });
        container.step_engine.on(SAS, Some(StateId(1)), MessageKind(5), |_| {
            Ok(StepOutcome::advance(StateId(2), vec![]))
        });

        container
            .manager
            .initiate_protocol(
                ProtocolStartRequest {
                    owned_identity: owner(),
                    protocol_id: SAS,
                    instance_uid: Some(uid(110)),
                    kind: MessageKind(0),
                    payload: vec![],
                },
                FlowId::new(),
            )
            .await
            .unwrap();
        container.manager.wait_until_idle().await;

        let mut processed = container
            .event_bus
            .subscribe(EventFilter::topics(vec![EventTopic::ReceivedMessages]));
        container.contacts.upsert(
            owner(),
            contact(2),
            ContactStatus {
                is_active: true,
                is_one_to_one: true,
            },
        );
        container
            .event_bus
            .publish(ProtocolEvent::ContactOneToOneStatusChanged {
                owned_identity: owner(),
                contact_identity: contact(2),
                is_one_to_one: true,
            })
            .await;

        next_processed(&mut processed).await;
        container.manager.wait_until_idle().await;

        let snapshot = container.store.snapshot().await;
        assert!(snapshot.waiting_entries.is_empty());
        assert_eq!(snapshot.instances[0].state_id, StateId(2));
        running.shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_processed_notifications_reach_owner_subscribers() {
        let running = running_container().await;
        let container = &running.container;
        let mut mine = container.event_bus.subscribe(
            EventFilter::topics(vec![EventTopic::ReceivedMessages]).for_owned_identity(owner()),
        );
        let mut theirs = container.event_bus.subscribe(
            EventFilter::topics(vec![EventTopic::ReceivedMessages])
                .for_owned_identity(contact(9)),
        );

        let message_id = container
            .manager
            .accept_received_message(
                GenericReceivedMessage {
                    owned_identity: owner(),
                    network_uid: Some(uid(1)),
                    protocol_id: SAS,
                    protocol_instance_uid: uid(111),
                    kind: MessageKind(42),
                    payload: vec![],
                    dialog_uuid: None,
                },
                FlowId::new(),
            )
            .await
            .unwrap();

        let flow = tokio::time::timeout(Duration::from_secs(5), mine.processed(message_id))
            .await
            .unwrap();
        assert!(flow.is_some());
        container.manager.wait_until_idle().await;
        assert!(theirs.try_recv().unwrap().is_none());
        running.shutdown.send(true).unwrap();
    }

    #[tokio::test]
    async fn test_first_appearance_on_bus_reprocesses_backlog() {
        let running = running_container().await;
        let container = &running.container;

        let message_id = container
            .manager
            .accept_received_message(
                GenericReceivedMessage {
                    owned_identity: owner(),
                    network_uid: Some(uid(2)),
                    protocol_id: SAS,
                    protocol_instance_uid: uid(112),
                    kind: MessageKind(0),
                    payload: vec![],
                    dialog_uuid: None,
                },
                FlowId::new(),
            )
            .await
            .unwrap();
        container.manager.wait_until_idle().await;

        container.step_engine.on(SAS, None, MessageKind(0), |_| {
            Ok(StepOutcome::advance(StateId(1), vec![]))
        });
        let mut processed = container
            .event_bus
            .subscribe(EventFilter::topics(vec![EventTopic::ReceivedMessages]));
        container
            .event_bus
            .publish(ProtocolEvent::ApplicationAppearedOnScreen {
                first_time: true,
                flow_id: FlowId::new(),
            })
            .await;

        assert_eq!(next_processed(&mut processed).await, message_id);
        container.manager.wait_until_idle().await;
        let snapshot = container.store.snapshot().await;
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(snapshot.instances.len(), 1);
        running.shutdown.send(true).unwrap();
    }
}
