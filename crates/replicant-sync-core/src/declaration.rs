//! Per-topic declaration state machine.
//!
//! ```text
//! Undeclared ──Begin──► Joining ──Joined──► Declaring ──Declared──► Synced
//!                          │                    │
//!                          └──────Failed────────┴──► Failed
//! ```
//!
//! `Gated` moves any topic to `Unavailable` (its bundle is not installed);
//! `Begin` leaves `Unavailable` again once the bundle reappears. `Reset`
//! returns every topic to `Undeclared` on a fresh connection, which is also
//! the only way out of `Failed`.

use serde::{Deserialize, Serialize};

/// Declaration phase of a topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SyncPhase {
    /// Not yet requested on this connection
    #[default]
    Undeclared,
    /// Waiting for the room join acknowledgement
    Joining,
    /// Waiting for the declare response
    Declaring,
    /// Holding a server value
    Synced,
    /// Join or declare failed; retried on the next connection
    Failed,
    /// Owning bundle is not installed
    Unavailable,
}

/// Inputs to the declaration state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// Start joining the topic's room
    Begin,
    /// Room join acknowledged
    Joined,
    /// Declare response adopted
    Declared,
    /// Join or declare failed
    Failed,
    /// Owning bundle disappeared
    Gated,
    /// Fresh connection
    Reset,
}

impl SyncPhase {
    /// Compute the phase after `event`.
    ///
    /// # Errors
    ///
    /// Returns error if `event` is not valid in the current phase.
    pub fn advance(self, event: PhaseEvent) -> Result<Self, PhaseError> {
        use PhaseEvent as E;
        use SyncPhase as P;

        match (self, event) {
            (_, E::Reset) => Ok(P::Undeclared),
            (_, E::Gated) => Ok(P::Unavailable),
            (P::Undeclared | P::Unavailable, E::Begin) => Ok(P::Joining),
            (P::Joining, E::Joined) => Ok(P::Declaring),
            (P::Declaring, E::Declared) => Ok(P::Synced),
            (P::Joining | P::Declaring, E::Failed) => Ok(P::Failed),
            (from, event) => Err(PhaseError::InvalidTransition { from, event }),
        }
    }

    /// Whether a join or declare request is outstanding.
    #[must_use]
    pub fn is_in_flight(self) -> bool {
        matches!(self, Self::Joining | Self::Declaring)
    }

    /// Whether a declaration may be started.
    #[must_use]
    pub fn can_begin(self) -> bool {
        matches!(self, Self::Undeclared | Self::Unavailable)
    }
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Undeclared => "undeclared",
            Self::Joining => "joining",
            Self::Declaring => "declaring",
            Self::Synced => "synced",
            Self::Failed => "failed",
            Self::Unavailable => "unavailable",
        };
        f.write_str(name)
    }
}

/// A refused transition.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PhaseError {
    /// `event` is not valid in phase `from`
    #[error("invalid transition from {from} on {event:?}")]
    InvalidTransition {
        /// Phase before the event
        from: SyncPhase,
        /// Refused event
        event: PhaseEvent,
    },
}
