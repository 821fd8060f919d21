//! Error types for the protocol manager
//!
//! Step-level cancellations are not errors of the manager itself; they are
//! modelled by [`crate::domain::ReasonForCancel`] and handled by the
//! dispatcher. The types here cover the ports and the public API.

use shared_types::MessageIdentifier;
use thiserror::Error;

/// Failures of the durable store port.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No unit of work could be opened (store not configured or offline).
    #[error("Durable store unavailable: {reason}")]
    Unavailable { reason: String },

    /// The unit of work could not be committed. Nothing was written.
    #[error("Commit failed: {reason}")]
    CommitFailed { reason: String },

    /// The unit of work was already committed.
    #[error("Unit of work already finished")]
    AlreadyFinished,

    /// A row with the same key already exists.
    #[error("Duplicate received message {message_id}")]
    DuplicateReceivedMessage { message_id: MessageIdentifier },

    /// Snapshot import/export failed.
    #[error("Snapshot serialization failed: {reason}")]
    Snapshot { reason: String },
}

/// Failures of the channel sender port.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel has no recipient")]
    NoRecipient,

    #[error("Could not enqueue outbound message: {0}")]
    Store(#[from] StoreError),
}

/// Failures of the contact directory port.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    #[error("Identity manager unavailable: {reason}")]
    Unavailable { reason: String },
}

/// Construction-time errors.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ConfigError {
    /// A required collaborator was not supplied to the builder.
    #[error("Missing collaborator: {name}")]
    MissingCollaborator { name: &'static str },

    /// A configuration value is out of range.
    #[error("Invalid configuration value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Channel(#[from] ChannelError),

    #[error(transparent)]
    Directory(#[from] DirectoryError),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

/// Result type for store operations
pub type StoreResult<T> = Result<T, StoreError>;

/// Result type for protocol manager operations
pub type ProtocolResult<T> = Result<T, ProtocolError>;
