//! Rule-table step engine.
//!
//! Concrete protocols plug in through `StepEngine`. This adapter drives the
//! runtime from a table of `(protocol, current state, message kind)` rules,
//! which is enough to boot the runtime and to script whole flows in tests.

use crate::domain::{MessageKind, ReasonForCancel, StateId, StepInput, StepOutcome};
use crate::ports::outbound::StepEngine;
use parking_lot::RwLock;
use shared_types::{CryptoProtocolId, MessageIdentifier};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

type StepFn = Arc<dyn Fn(&StepInput<'_>) -> Result<StepOutcome, ReasonForCancel> + Send + Sync>;

/// `None` as state matches a message addressed to an instance that does not
/// exist yet, i.e. a protocol start.
type RuleKey = (CryptoProtocolId, Option<StateId>, MessageKind);

/// One executed step, as seen by the engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutedStep {
    pub message_id: MessageIdentifier,
    pub state_before: Option<StateId>,
}

#[derive(Default)]
pub struct ScriptedStepEngine {
    rules: RwLock<HashMap<RuleKey, StepFn>>,
    final_states: RwLock<HashSet<(CryptoProtocolId, StateId)>>,
    executed: RwLock<Vec<ExecutedStep>>,
}

impl ScriptedStepEngine {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the step run for `kind` when the instance is in `state`.
    pub fn on<F>(&self, protocol: CryptoProtocolId, state: Option<StateId>, kind: MessageKind, step: F)
    where
        F: Fn(&StepInput<'_>) -> Result<StepOutcome, ReasonForCancel> + Send + Sync + 'static,
    {
        self.rules
            .write()
            .insert((protocol, state, kind), Arc::new(step));
    }

    pub fn mark_final(&self, protocol: CryptoProtocolId, state: StateId) {
        self.final_states.write().insert((protocol, state));
    }

    /// Steps that ran, in order. Cancelled lookups are not recorded.
    pub fn executed(&self) -> Vec<ExecutedStep> {
        self.executed.read().clone()
    }
}

impl StepEngine for ScriptedStepEngine {
    fn execute(&self, input: StepInput<'_>) -> Result<StepOutcome, ReasonForCancel> {
        let state = input.instance.map(|i| i.state_id);
        let key = (input.message.protocol_id, state, input.message.kind);
        let step = self.rules.read().get(&key).cloned();

        let Some(step) = step else {
            return Err(match input.message.dialog_uuid {
                Some(uuid) => {
                    ReasonForCancel::CouldNotFindConcreteStepToExecuteForReceivedDialogResponse(uuid)
                }
                None => ReasonForCancel::CouldNotFindConcreteStepToExecute,
            });
        };

        self.executed.write().push(ExecutedStep {
            message_id: input.message.message_id,
            state_before: state,
        });
        step(&input)
    }

    fn is_final_state(&self, protocol_id: CryptoProtocolId, state_id: StateId) -> bool {
        self.final_states.read().contains(&(protocol_id, state_id))
    }
}
