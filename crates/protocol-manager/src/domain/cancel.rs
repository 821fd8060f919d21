//! Step cancellation reasons and what the dispatcher does with each.

use thiserror::Error;
use uuid::Uuid;

/// Why a step unit did not run to completion.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ReasonForCancel {
    #[error("no unit of work could be opened")]
    ContextCreatorDelegateNotSet,

    #[error("received message not found in database")]
    MessageNotFoundInDatabase,

    #[error("no concrete step matches the message in the current state")]
    CouldNotFindConcreteStepToExecute,

    #[error("no concrete step matches the dialog response {0}")]
    CouldNotFindConcreteStepToExecuteForReceivedDialogResponse(Uuid),

    #[error("could not construct a concrete protocol message for the crypto protocol")]
    CouldNotConstructConcreteProtocolMessageForTheGivenCryptoProtocol,

    #[error("the protocol step cancelled itself")]
    TheProtocolStepCancelled,

    #[error("could not determine the new protocol state")]
    CouldNotDetermineNewProtocolState,

    #[error("could not update the protocol state")]
    CouldNotUpdateProtocolState,

    #[error("could not save the unit of work")]
    CouldNotSaveContext,

    #[error("could not delete the received message")]
    CouldNotDeleteReceivedMessage,

    #[error("could not determine the associated owned identity")]
    CouldNotDetermineTheAssociatedOwnedIdentity,

    #[error("could not reconstruct the concrete crypto protocol")]
    CouldNotReconstructConcreteCryptoProtocol,
}

/// Follow-up action for a cancelled step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelDisposition {
    /// Nothing to delete.
    Nothing,
    /// Leave the message in the backlog; a later state change may drain it.
    KeepMessage,
    /// Drop the message, keep the instance.
    DeleteMessage,
    /// Ask the UI to remove the dialog, then drop the message.
    DeleteDialogAndMessage(Uuid),
    /// Transient persistence failure, governed by the save-failure policy.
    SaveFailure,
}

impl ReasonForCancel {
    #[must_use]
    pub fn disposition(&self) -> CancelDisposition {
        match self {
            Self::ContextCreatorDelegateNotSet | Self::MessageNotFoundInDatabase => {
                CancelDisposition::Nothing
            }
            Self::CouldNotFindConcreteStepToExecute => CancelDisposition::KeepMessage,
            Self::CouldNotFindConcreteStepToExecuteForReceivedDialogResponse(uuid) => {
                CancelDisposition::DeleteDialogAndMessage(*uuid)
            }
            Self::CouldNotConstructConcreteProtocolMessageForTheGivenCryptoProtocol
            | Self::TheProtocolStepCancelled
            | Self::CouldNotDetermineNewProtocolState
            | Self::CouldNotUpdateProtocolState
            | Self::CouldNotDetermineTheAssociatedOwnedIdentity
            | Self::CouldNotReconstructConcreteCryptoProtocol => CancelDisposition::DeleteMessage,
            Self::CouldNotSaveContext | Self::CouldNotDeleteReceivedMessage => {
                CancelDisposition::SaveFailure
            }
        }
    }
}
