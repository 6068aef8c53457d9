//! Session configuration.

use crate::error::SyncError;
use replicant_sync_core::BundleGate;
use url::Url;
use uuid::Uuid;

/// Where to connect. Both fields are required; they are kept optional and
/// textual so that a half-filled configuration can be represented and
/// rejected by [`ConnectionConfig::endpoint`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConnectionConfig {
    /// Server host
    pub host: Option<String>,
    /// Server port
    pub port: Option<String>,
}

impl ConnectionConfig {
    /// Create a configuration for `host:port`.
    #[must_use]
    pub fn new(host: impl Into<String>, port: impl Into<String>) -> Self {
        Self {
            host: Some(host.into()),
            port: Some(port.into()),
        }
    }

    /// Validate the configuration into an endpoint.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if host or port is blank, or the port is
    /// not a valid port number.
    pub fn endpoint(&self) -> Result<Endpoint, SyncError> {
        let (Some(host), Some(port)) = (non_blank(self.host.as_deref()), non_blank(self.port.as_deref()))
        else {
            return Err(SyncError::Config(
                "host or port is not defined".to_string(),
            ));
        };

        let port: u16 = port
            .parse()
            .map_err(|_| SyncError::Config(format!("invalid port '{port}'")))?;

        let url = Url::parse(&format!("ws://{host}:{port}"))
            .map_err(|e| SyncError::Config(format!("invalid host '{host}': {e}")))?;

        Ok(Endpoint {
            host: host.to_string(),
            port,
            url,
        })
    }
}

fn non_blank(value: Option<&str>) -> Option<&str> {
    value.map(str::trim).filter(|v| !v.is_empty())
}

/// A validated server address.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    /// Server host
    pub host: String,
    /// Server port
    pub port: u16,
    /// `ws://host:port`
    pub url: Url,
}

impl std::fmt::Display for Endpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

/// Session behaviour.
#[derive(Debug, Clone)]
pub struct SessionOptions {
    /// Identifier used in log fields
    pub session_id: Uuid,
    /// Bundle gating, if enabled
    pub gate: Option<BundleGate>,
    /// Capacity of the session event channel
    pub event_capacity: usize,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            session_id: Uuid::new_v4(),
            gate: None,
            event_capacity: 256,
        }
    }
}

impl SessionOptions {
    /// Enable bundle gating.
    #[must_use]
    pub fn with_gate(mut self, gate: BundleGate) -> Self {
        self.gate = Some(gate);
        self
    }
}
