//! # Replicant Sync Client
//!
//! Keeps a local mirror of remote replicants consistent over an
//! auto-reconnecting transport.
//!
//! ## Architecture
//!
//! A [`ReplicantSession`] owns one driver task. The driver is the only writer
//! of the store and handles, one at a time and in arrival order:
//! 1. **Transport events**: connect, disconnect, errors and server pushes
//! 2. **Completions**: acks of join, declare, read and propose requests
//! 3. **Commands**: forced reads and proposals issued by callers
//!
//! Requests run as spawned tasks so several topics can declare concurrently,
//! while each topic's own state machine only advances inside the driver.
//! Every fresh connection resets the store and declares all topics again.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
mod driver;
pub mod error;
pub mod events;
pub mod remote;
pub mod session;
pub mod transport;

pub use config::{ConnectionConfig, Endpoint, SessionOptions};
pub use error::{SyncError, TransportError};
pub use events::{ProposeOutcome, SessionEvent};
pub use session::ReplicantSession;
pub use transport::{DisconnectReason, Transport, TransportEvent};
