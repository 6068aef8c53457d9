//! Session and transport errors.

use replicant_sync_core::{StoreError, TopicKey};
use replicant_sync_proto::MessageError;

/// Errors raised by a transport.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportError {
    /// No connection is open
    #[error("transport is not connected")]
    NotConnected,
    /// The peer did not acknowledge in time
    #[error("no acknowledgement for {0}")]
    Timeout(String),
    /// Sending failed
    #[error("emit error: {0}")]
    Emit(String),
    /// Connection-level failure
    #[error("connection error: {0}")]
    Connection(String),
}

/// Errors for session operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SyncError {
    /// Host or port missing or invalid
    #[error("configuration error: {0}")]
    Config(String),
    /// The session has no live connection
    #[error("not connected")]
    NotConnected,
    /// The topic is not in the registry
    #[error("unknown topic {0}")]
    UnknownTopic(TopicKey),
    /// The topic has no server value yet
    #[error("topic {0} is not synced")]
    NotSynced(TopicKey),
    /// Joining or declaring a topic failed
    #[error("declaration of {topic} failed: {reason}")]
    Declaration {
        /// Topic concerned
        topic: TopicKey,
        /// Failure description
        reason: String,
    },
    /// Transport failure
    #[error(transparent)]
    Transport(#[from] TransportError),
    /// Malformed or refused message
    #[error(transparent)]
    Protocol(#[from] MessageError),
    /// Store refused an update
    #[error(transparent)]
    Store(#[from] StoreError),
    /// The session was stopped while the call was pending
    #[error("session closed")]
    SessionClosed,
}
