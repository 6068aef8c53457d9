//! # Replicant Sync Core
//!
//! Client-side model of remotely owned, revisioned replicants.
//!
//! This crate provides:
//! - Topic keys and the static registry of tracked topics
//! - Path codec for slash-delimited operation paths
//! - Typed replicant operations and the patch engine that applies them
//! - The replicant store with its revision-continuity invariant
//! - The per-topic declaration state machine
//! - Bundle gating rules driven by the installed-packages topic
//!
//! Nothing here performs I/O; the session crate drives it.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod declaration;
pub mod gating;
mod mutator;
pub mod operation;
pub mod patch;
pub mod path;
pub mod store;
pub mod topic;

pub use declaration::{PhaseError, PhaseEvent, SyncPhase};
pub use gating::{BundleGate, GateStatus, InstalledBundle};
pub use operation::{ArrayMethod, Operation, OperationError, OperationKind, RawOperation};
pub use patch::{apply_operation, PatchError};
pub use path::{decode_path, encode_path, PathError};
pub use store::{
    BatchOutcome, ReplicantEntry, ReplicantMetadata, ReplicantOptions, ReplicantState,
    ReplicantStore, Snapshot, StoreError,
};
pub use topic::{TopicKey, TopicRegistry};
