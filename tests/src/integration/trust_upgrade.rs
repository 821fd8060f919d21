//! # Trust Upgrade Flows
//!
//! Instances parked until a contact becomes OneToOne, and the
//! kept-for-later buffer for messages about objects not created yet.

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use protocol_manager::{
        CorrelationKey, DeferredPayload, KeepDecision, KeptForLaterMessage, MessageKind,
        OutboundProtocolMessage, ProtocolManagerApi, StateId, StepOutcome,
    };
    use shared_types::{FlowId, GroupIdentifier, MessageIdentifier, TimeSource};

    const INSTANCE: u8 = 80;

    /// The first step waits for `contact(2)`; the resumption moves the
    /// instance to state 2.
    fn script_waiting_protocol(engine: &TestEngine) {
        engine.steps.on(SAS, None, MessageKind(0), |input| {
            let resume = OutboundProtocolMessage::local(
                owner(),
                SAS,
                input.message.protocol_instance_uid,
                MessageKind(5),
                b"resume".to_vec(),
            );
            Ok(StepOutcome::advance(StateId(1), vec![]).wait_for_one_to_one(contact(2), resume))
        });
        engine.steps.on(SAS, Some(StateId(1)), MessageKind(5), |_| {
            Ok(StepOutcome::advance(StateId(2), vec![]))
        });
    }

    async fn park_instance(engine: &TestEngine) {
        script_waiting_protocol(engine);
        engine.start(SAS, INSTANCE, 0).await;
        engine.idle().await;
        assert_eq!(engine.snapshot().await.waiting_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_resumption_waits_for_one_to_one() {
        let engine = TestEngine::new();
        park_instance(&engine).await;

        // The event arrives while the contact is still not OneToOne.
        engine.set_contact(contact(2), false);
        let report = engine
            .manager
            .contact_one_to_one_status_changed(owner(), contact(2), FlowId::new())
            .await
            .unwrap();
        engine.idle().await;

        assert_eq!((report.resumed, report.kept), (0, 1));
        let snapshot = engine.snapshot().await;
        assert_eq!(snapshot.waiting_entries.len(), 1);
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(snapshot.instances[0].state_id, StateId(1));
    }

    #[tokio::test]
    async fn test_one_to_one_contact_resumes_instance() {
        let engine = TestEngine::new();
        park_instance(&engine).await;

        engine.set_contact(contact(2), true);
        let report = engine
            .manager
            .contact_one_to_one_status_changed(owner(), contact(2), FlowId::new())
            .await
            .unwrap();
        engine.idle().await;

        assert_eq!(report.resumed, 1);
        let snapshot = engine.snapshot().await;
        assert!(snapshot.waiting_entries.is_empty());
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(snapshot.instances[0].state_id, StateId(2));
        assert_eq!(engine.executed().len(), 2);
    }

    #[tokio::test]
    async fn test_event_for_other_contact_resumes_nothing() {
        let engine = TestEngine::new();
        park_instance(&engine).await;

        engine.set_contact(contact(3), true);
        let report = engine
            .manager
            .contact_one_to_one_status_changed(owner(), contact(3), FlowId::new())
            .await
            .unwrap();

        assert_eq!(report.resumed + report.kept + report.failed, 0);
        assert_eq!(engine.snapshot().await.waiting_entries.len(), 1);
    }

    #[tokio::test]
    async fn test_abort_drops_waiting_entry() {
        let engine = TestEngine::new();
        park_instance(&engine).await;

        engine
            .manager
            .abort_protocol(owner(), uid(INSTANCE), FlowId::new())
            .await;
        engine.idle().await;

        engine.set_contact(contact(2), true);
        let report = engine
            .manager
            .contact_one_to_one_status_changed(owner(), contact(2), FlowId::new())
            .await
            .unwrap();
        assert_eq!(report.resumed, 0);
        assert!(engine.snapshot().await.waiting_entries.is_empty());
    }

    fn parked(tag: u8, contact_tag: u8, received_at: u64) -> KeptForLaterMessage {
        KeptForLaterMessage::ExpectingContact {
            contact: contact(contact_tag),
            message: DeferredPayload {
                message_id: MessageIdentifier::new(owner(), uid(tag)),
                payload: vec![tag],
                received_at,
            },
        }
    }

    #[tokio::test]
    async fn test_kept_for_later_replays_in_arrival_order() {
        let engine = TestEngine::new();
        let now = engine.clock.now();

        for tag in [1, 2, 3] {
            assert_eq!(
                engine.manager.keep_for_later(parked(tag, 4, now)),
                KeepDecision::Kept
            );
        }
        engine.manager.keep_for_later(parked(9, 5, now));

        let key = CorrelationKey::Contact(contact(4));
        let drained: Vec<_> = engine
            .manager
            .drain_kept_for_later(owner(), &key)
            .iter()
            .map(|m| m.payload().payload.clone())
            .collect();
        assert_eq!(drained, vec![vec![1], vec![2], vec![3]]);
        assert!(engine.manager.drain_kept_for_later(owner(), &key).is_empty());
        assert_eq!(engine.manager.kept_for_later().len(), 1);
    }

    #[tokio::test]
    async fn test_kept_for_later_is_scoped_per_group() {
        let engine = TestEngine::new();
        let now = engine.clock.now();
        let group = GroupIdentifier(vec![7; 8]);
        let other_group = GroupIdentifier(vec![8; 8]);

        engine.manager.keep_for_later(KeptForLaterMessage::GroupV2 {
            group: group.clone(),
            message: DeferredPayload {
                message_id: MessageIdentifier::new(owner(), uid(1)),
                payload: vec![],
                received_at: now,
            },
        });

        assert!(engine
            .manager
            .drain_kept_for_later(owner(), &CorrelationKey::Group(other_group))
            .is_empty());
        assert!(engine
            .manager
            .drain_kept_for_later(contact(6), &CorrelationKey::Group(group.clone()))
            .is_empty());
        assert_eq!(
            engine
                .manager
                .drain_kept_for_later(owner(), &CorrelationKey::Group(group))
                .len(),
            1
        );
    }
}
