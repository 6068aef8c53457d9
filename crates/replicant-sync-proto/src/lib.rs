//! # Replicant Sync Protocol
//!
//! Wire contract between a replicant client and the server that owns the
//! replicants.
//!
//! ## Requests (acknowledged)
//!
//! - `joinRoom`: membership in a namespace's room
//! - `replicant:declare`: first-contact snapshot
//! - `replicant:read`: forced full read
//! - `replicant:proposeOperations`: optimistic write
//! - `message`: bundle message
//!
//! ## Pushes
//!
//! - `replicant:operations`: revisioned operation batch
//! - `replicant:assignment`: whole-value replacement (legacy)
//!
//! Acks arrive either as `(data)` or as `(error, data)`; [`decode_ack`]
//! accepts both.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod events;
pub mod messages;

pub use events::{room_name, EventKind};
pub use messages::{
    decode_ack, decode_message_reply, encode, AssignmentEvent, DeclareRequest, DeclareResponse,
    InboundMessage, MessageError, MessageRequest, OperationsEvent, ProposeOperationsRequest,
    ProposeResponse, ReadRequest,
};
