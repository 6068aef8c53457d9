//! # Socket.IO Transport
//!
//! [`Transport`](replicant_sync_client::Transport) implementation over a
//! Socket.IO websocket connection.
//!
//! Connection lifecycle callbacks and replicant pushes are forwarded to the
//! session as transport events; requests use Socket.IO acknowledgements.

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod transport;

pub use transport::{SocketIoConfig, SocketIoTransport};
