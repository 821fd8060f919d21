//! # Bootstrap Flows
//!
//! Startup reconciliation after a restart: the store is exported from one
//! engine and imported into a fresh one.

#[cfg(test)]
mod tests {
    use super::super::fixtures::*;
    use protocol_manager::adapters::MemoryStore;
    use protocol_manager::{
        DeferredPayload, KeptForLaterMessage, MessageKind, OutboundProtocolMessage,
        ProtocolManagerApi, ProtocolManagerConfig, StateId, StepOutcome,
    };
    use shared_types::{CryptoProtocolId, FlowId, MessageIdentifier};
    use std::time::Duration;

    async fn restart(engine: &TestEngine, now: u64) -> TestEngine {
        let json = engine.store.export_json().await.unwrap();
        TestEngine::build(
            ProtocolManagerConfig::default(),
            MemoryStore::import_json(&json).unwrap(),
            now,
        )
    }

    async fn bootstrap(engine: &TestEngine) {
        engine
            .manager
            .application_appeared_on_screen(true, FlowId::new())
            .await;
        engine.idle().await;
    }

    #[tokio::test]
    async fn test_pending_message_runs_after_restart() {
        let before = TestEngine::new();
        let message_id = before.receive(1, 90, 0).await;
        before.idle().await;
        assert_eq!(before.snapshot().await.received_messages.len(), 1);

        // The step only exists in the new process.
        let after = restart(&before, 2_000).await;
        after.steps.on(SAS, None, MessageKind(0), |_| {
            Ok(StepOutcome::advance(StateId(1), vec![]))
        });
        bootstrap(&after).await;

        assert_eq!(after.executed(), vec![message_id]);
        let snapshot = after.snapshot().await;
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(snapshot.instances.len(), 1);
    }

    #[tokio::test]
    async fn test_later_appearances_do_not_bootstrap() {
        let before = TestEngine::new();
        before.receive(1, 90, 0).await;
        before.idle().await;

        let after = restart(&before, 2_000).await;
        after.steps.on(SAS, None, MessageKind(0), |_| {
            Ok(StepOutcome::advance(StateId(1), vec![]))
        });
        after
            .manager
            .application_appeared_on_screen(false, FlowId::new())
            .await;
        after.idle().await;

        assert!(after.executed().is_empty());
        assert_eq!(after.snapshot().await.received_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_obsolete_messages_swept_after_restart() {
        let before = TestEngine::new();
        before.steps.on(SAS, None, MessageKind(0), |_| {
            Ok(StepOutcome::advance(StateId(1), vec![]))
        });
        // 91 has an instance, 92 never will.
        before.receive(1, 91, 0).await;
        before.receive(2, 91, 42).await;
        before.receive(3, 92, 42).await;
        before.idle().await;

        let after = restart(&before, 1_000 + 16 * DAY_MS).await;
        bootstrap(&after).await;

        let snapshot = after.snapshot().await;
        assert_eq!(snapshot.received_messages.len(), 1);
        assert_eq!(snapshot.received_messages[0].protocol_instance_uid, uid(91));
    }

    #[tokio::test]
    async fn test_recent_orphan_messages_survive() {
        let before = TestEngine::new();
        before.receive(3, 92, 42).await;
        before.idle().await;

        let after = restart(&before, 1_000 + DAY_MS).await;
        bootstrap(&after).await;

        assert_eq!(after.snapshot().await.received_messages.len(), 1);
    }

    #[tokio::test]
    async fn test_final_and_transfer_instances_swept() {
        let before = TestEngine::new();
        for protocol in [SAS, CryptoProtocolId::OwnedIdentityTransfer] {
            before.steps.on(protocol, None, MessageKind(0), |_| {
                Ok(StepOutcome::advance(StateId(4), vec![]))
            });
        }
        before.steps.on(SAS, None, MessageKind(1), |_| {
            Ok(StepOutcome::advance(StateId(1), vec![]))
        });
        before.start(SAS, 93, 0).await;
        before.start(CryptoProtocolId::OwnedIdentityTransfer, 94, 0).await;
        before.start(SAS, 95, 1).await;
        before.idle().await;
        assert_eq!(before.snapshot().await.instances.len(), 3);

        // State 4 became final in the new version of the protocol.
        let after = restart(&before, 2_000).await;
        after.steps.mark_final(SAS, StateId(4));
        bootstrap(&after).await;

        let snapshot = after.snapshot().await;
        assert_eq!(snapshot.instances.len(), 1);
        assert_eq!(snapshot.instances[0].uid, uid(95));
    }

    #[tokio::test]
    async fn test_rescan_resumes_contacts_upgraded_while_down() {
        let before = TestEngine::new();
        before.steps.on(SAS, None, MessageKind(0), |input| {
            let resume = OutboundProtocolMessage::local(
                owner(),
                SAS,
                input.message.protocol_instance_uid,
                MessageKind(5),
                vec![],
            );
            Ok(StepOutcome::advance(StateId(1), vec![]).wait_for_one_to_one(contact(2), resume))
        });
        before.start(SAS, 96, 0).await;
        before.idle().await;

        let after = restart(&before, 2_000).await;
        after.steps.on(SAS, Some(StateId(1)), MessageKind(5), |_| {
            Ok(StepOutcome::advance(StateId(2), vec![]))
        });
        after.set_contact(contact(2), true);
        bootstrap(&after).await;

        let snapshot = after.snapshot().await;
        assert!(snapshot.waiting_entries.is_empty());
        assert_eq!(snapshot.instances[0].state_id, StateId(2));
    }

    #[tokio::test]
    async fn test_expired_kept_for_later_purged_on_bootstrap() {
        let engine = TestEngine::new();
        let now = 1_000;
        engine.manager.keep_for_later(KeptForLaterMessage::ExpectingContact {
            contact: contact(4),
            message: DeferredPayload {
                message_id: MessageIdentifier::new(owner(), uid(1)),
                payload: vec![],
                received_at: now,
            },
        });

        engine.clock.advance(Duration::from_millis(16 * DAY_MS));
        bootstrap(&engine).await;

        assert!(engine.manager.kept_for_later().is_empty());
    }

    #[tokio::test]
    async fn test_transfer_messages_without_instance_swept() {
        const TRANSFER: CryptoProtocolId = CryptoProtocolId::OwnedIdentityTransfer;
        let before = TestEngine::new();
        // No step yet, so both messages stay in the backlog.
        before.start(TRANSFER, 77, 0).await;
        let pending = before.receive(1, 90, 0).await;
        before.idle().await;
        assert_eq!(before.snapshot().await.received_messages.len(), 2);

        let after = restart(&before, 2_000).await;
        for protocol in [SAS, TRANSFER] {
            after.steps.on(protocol, None, MessageKind(0), |_| {
                Ok(StepOutcome::advance(StateId(1), vec![]))
            });
        }
        bootstrap(&after).await;

        assert_eq!(after.executed(), vec![pending]);
        let snapshot = after.snapshot().await;
        assert!(snapshot.received_messages.is_empty());
        assert_eq!(snapshot.instances.len(), 1);
        assert_eq!(snapshot.instances[0].protocol_id, SAS);
    }
}
