//! Event names and room naming.
//!
//! Room structure: `replicant:{namespace}`. Every topic joins its namespace's
//! room before declaring, one join per topic.

/// Prefix of replicant rooms.
pub const ROOM_PREFIX: &str = "replicant";

/// Request: join a room.
pub const JOIN_ROOM: &str = "joinRoom";

/// Request: declare a replicant and fetch its snapshot.
pub const DECLARE: &str = "replicant:declare";

/// Request: read a replicant's full value.
pub const READ: &str = "replicant:read";

/// Request: propose an operation batch.
pub const PROPOSE_OPERATIONS: &str = "replicant:proposeOperations";

/// Request: send a message to a bundle.
pub const MESSAGE: &str = "message";

/// Push: operation batch.
pub const OPERATIONS: &str = "replicant:operations";

/// Push: whole-value assignment.
pub const ASSIGNMENT: &str = "replicant:assignment";

/// Room a topic in `namespace` must join.
#[must_use]
pub fn room_name(namespace: &str) -> String {
    format!("{ROOM_PREFIX}:{namespace}")
}

/// Server-initiated events this client understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    /// Operation batch
    Operations,
    /// Whole-value assignment
    Assignment,
}

impl EventKind {
    /// Every push event, for transports that subscribe by name.
    pub const ALL: [Self; 2] = [Self::Operations, Self::Assignment];

    /// Parse an event name.
    #[must_use]
    pub fn parse(event: &str) -> Option<Self> {
        match event {
            OPERATIONS => Some(Self::Operations),
            ASSIGNMENT => Some(Self::Assignment),
            _ => None,
        }
    }

    /// Wire name of the event.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Operations => OPERATIONS,
            Self::Assignment => ASSIGNMENT,
        }
    }
}
