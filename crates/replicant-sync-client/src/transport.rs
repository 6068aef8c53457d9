//! Transport abstraction.
//!
//! A transport owns one auto-reconnecting connection. Lifecycle changes and
//! server pushes are delivered on the channel returned by [`Transport::open`];
//! requests are sent with [`Transport::request`] and resolve with the
//! acknowledgement arguments.

use crate::config::Endpoint;
use crate::error::TransportError;
use serde_json::Value;
use std::future::Future;
use tokio::sync::mpsc;

/// Why a connection went away.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DisconnectReason {
    /// The server closed the connection; the transport will not retry on its own
    ServerInitiated,
    /// This client closed the connection
    ClientInitiated,
    /// The underlying connection dropped
    TransportClosed,
    /// Anything else
    Other(String),
}

impl DisconnectReason {
    /// Map a socket.io disconnect reason.
    #[must_use]
    pub fn from_reason(reason: &str) -> Self {
        match reason {
            "io server disconnect" => Self::ServerInitiated,
            "io client disconnect" => Self::ClientInitiated,
            "transport close" | "transport error" | "ping timeout" => Self::TransportClosed,
            other => Self::Other(other.to_string()),
        }
    }
}

impl std::fmt::Display for DisconnectReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ServerInitiated => f.write_str("server disconnect"),
            Self::ClientInitiated => f.write_str("client disconnect"),
            Self::TransportClosed => f.write_str("transport closed"),
            Self::Other(reason) => f.write_str(reason),
        }
    }
}

/// Something that happened on the connection.
#[derive(Debug, Clone, PartialEq)]
pub enum TransportEvent {
    /// A connection (or reconnection) was established
    Connected,
    /// The connection was lost
    Disconnected(DisconnectReason),
    /// A connection attempt or the live connection failed
    Error(String),
    /// A server push
    Message {
        /// Event name
        event: String,
        /// Event arguments
        args: Vec<Value>,
    },
}

/// A bidirectional, auto-reconnecting message channel.
pub trait Transport: Send + Sync + 'static {
    /// Start connecting to `endpoint`. Any previous connection is replaced.
    fn open(&self, endpoint: &Endpoint) -> mpsc::Receiver<TransportEvent>;

    /// Close the connection. Calling this when nothing is open is a no-op.
    fn close(&self);

    /// Reconnect after a server-initiated disconnect.
    fn reconnect(&self);

    /// Whether a connection is currently up.
    fn is_connected(&self) -> bool;

    /// Send an event without waiting for an acknowledgement.
    fn emit(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Send an event and wait for its acknowledgement arguments.
    fn request(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn socketio_reasons() {
        assert_eq!(
            DisconnectReason::from_reason("io server disconnect"),
            DisconnectReason::ServerInitiated
        );
        assert_eq!(
            DisconnectReason::from_reason("ping timeout"),
            DisconnectReason::TransportClosed
        );
        assert_eq!(
            DisconnectReason::from_reason("parse error"),
            DisconnectReason::Other("parse error".to_string())
        );
    }
}
