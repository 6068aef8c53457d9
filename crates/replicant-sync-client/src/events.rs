//! Events published by a session.

use crate::error::SyncError;
use crate::transport::DisconnectReason;
use replicant_sync_core::TopicKey;

/// Session notification, delivered over a broadcast channel.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// The connection is up; declarations are starting
    Connected,
    /// The connection is down
    Disconnected {
        /// Why
        reason: DisconnectReason,
    },
    /// A topic's cached value changed
    TopicUpdated(TopicKey),
    /// A topic's bundle is not installed; its value was cleared
    TopicUnavailable(TopicKey),
    /// A bundle is installed at a version outside the configured requirement
    BundleIncompatible {
        /// Bundle namespace
        namespace: String,
        /// Installed version
        installed: String,
        /// Configured requirement
        required: String,
    },
    /// Something failed without a caller to report it to
    Error(SyncError),
}

/// Result of a proposal the server answered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProposeOutcome {
    /// Accepted; the mirror now holds the confirmed state
    Accepted {
        /// Revision held after adoption
        revision: u64,
    },
    /// Refused; the mirror is unchanged
    Rejected {
        /// Server's reason
        reason: String,
    },
}
