//! # Lifecycle Flows
//!
//! Parent/child protocol families built by real steps, then torn down by an
//! abort from either side.

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use protocol_manager::{
        GenericReceivedMessage, MessageKind, OutboundProtocolMessage, ProtocolManagerApi, StateId,
        StepOutcome,
    };
    use shared_types::{CryptoProtocolId, FlowId, MessageIdentifier};

    const CHILD: CryptoProtocolId = CryptoProtocolId::ContactMutualIntroduction;
    const PARENT_UID: u8 = 70;
    const CHILD_UID: u8 = 71;

    /// Parent starts, links a child and starts it with a local message.
    fn script_family(engine: &TestEngine) {
        engine.steps.on(SAS, None, MessageKind(0), |_| {
            let start_child =
                OutboundProtocolMessage::local(owner(), CHILD, uid(CHILD_UID), MessageKind(0), vec![]);
            Ok(StepOutcome::advance(StateId(1), b"parent".to_vec())
                .link_child(uid(CHILD_UID))
                .send(start_child))
        });
        engine.steps.on(CHILD, None, MessageKind(0), |_| {
            Ok(StepOutcome::advance(StateId(1), b"child".to_vec()))
        });
        engine
            .steps
            .on(CHILD, Some(StateId(1)), MessageKind(1), |_| Ok(StepOutcome::abort()));
    }

    async fn receive_for_child(engine: &TestEngine, network_tag: u8, kind: u16) -> MessageIdentifier {
        engine
            .manager
            .accept_received_message(
                GenericReceivedMessage {
                    owned_identity: owner(),
                    network_uid: Some(uid(network_tag)),
                    protocol_id: CHILD,
                    protocol_instance_uid: uid(CHILD_UID),
                    kind: MessageKind(kind),
                    payload: vec![],
                    dialog_uuid: None,
                },
                FlowId::new(),
            )
            .await
            .unwrap()
    }

    async fn build_family(engine: &TestEngine) {
        script_family(engine);
        engine.start(SAS, PARENT_UID, 0).await;
        engine.idle().await;

        // A parent message no step accepts yet stays in the backlog.
        engine.receive(1, PARENT_UID, 9).await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.instances.len(), 2);
        assert_eq!(snapshot.links.len(), 1);
        assert_eq!(snapshot.received_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_of_child_removes_whole_family() {
        let engine = TestEngine::new();
        build_family(&engine).await;

        engine
            .manager
            .abort_protocol(owner(), uid(CHILD_UID), FlowId::new())
            .await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.links.is_empty());
        assert!(snapshot.received_messages.is_empty());
    }

    #[tokio::test]
    async fn test_abort_is_idempotent() {
        let engine = TestEngine::new();
        build_family(&engine).await;

        for _ in 0..2 {
            engine
                .manager
                .abort_protocol(owner(), uid(PARENT_UID), FlowId::new())
                .await;
            engine.idle().await;
        }
        // Aborting something that never existed is a no-op too.
        engine
            .manager
            .abort_protocol(owner(), uid(99), FlowId::new())
            .await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.links.is_empty());
        assert!(snapshot.received_messages.is_empty());
    }

    #[tokio::test]
    async fn test_step_requested_abort_cascades_to_parent() {
        let engine = TestEngine::new();
        build_family(&engine).await;

        let abort_message = receive_for_child(&engine, 2, 1).await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.links.is_empty());
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(engine.processed(abort_message), 1);
    }

    #[tokio::test]
    async fn test_abort_of_other_owner_leaves_family() {
        let engine = TestEngine::new();
        build_family(&engine).await;

        engine
            .manager
            .abort_protocol(contact(3), uid(PARENT_UID), FlowId::new())
            .await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.instances.len(), 2);
        assert_eq!(snapshot.links.len(), 1);
    }

    #[tokio::test]
    async fn test_finished_instance_keeps_no_links_or_waits() {
        let engine = TestEngine::new();
        engine.steps.on(SAS, None, MessageKind(0), |input| {
            let resume = OutboundProtocolMessage::local(
                owner(),
                SAS,
                input.message.protocol_instance_uid,
                MessageKind(5),
                vec![],
            );
            Ok(StepOutcome::finish()
                .link_child(uid(CHILD_UID))
                .wait_for_one_to_one(contact(2), resume))
        });

        let message = engine.receive(1, PARENT_UID, 0).await;
        engine.idle().await;

        let snapshot = engine.snapshot().await;
        assert!(snapshot.instances.is_empty());
        assert!(snapshot.links.is_empty());
        assert!(snapshot.waiting_entries.is_empty());
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(engine.processed(message), 1);
    }
}
