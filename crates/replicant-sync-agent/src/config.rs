//! Agent configuration.

use anyhow::{Context, Result};
use replicant_sync_adapter_socketio::SocketIoConfig;
use replicant_sync_client::{ConnectionConfig, SessionOptions};
use replicant_sync_core::{BundleGate, TopicKey, TopicRegistry};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;
use uuid::Uuid;

/// Replicants mirrored when no topics are configured.
const DEFAULT_NAMESPACE: &str = "ipl-overlay-controls";
const DEFAULT_TOPICS: [&str; 9] = [
    "activeRound",
    "scoreboardData",
    "swapColorsInternally",
    "activeBreakScene",
    "musicShown",
    "nextRoundStartTime",
    "nextRound",
    "obsData",
    "gameAutomationData",
];

/// Agent configuration.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Session identifier for log correlation
    pub session_id: Option<Uuid>,

    /// Server address
    pub connection: ConnectionConfig,

    /// Topics to mirror
    pub registry: TopicRegistry,

    /// Installed-packages topic; `None` disables gating
    pub packages_topic: Option<TopicKey>,

    /// Version requirement per bundle namespace
    pub requirements: BTreeMap<String, String>,

    /// Acknowledgement timeout
    pub ack_timeout: Duration,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            session_id: None,
            connection: ConnectionConfig::new("localhost", "9090"),
            registry: TopicRegistry::new().with_namespace(DEFAULT_NAMESPACE, DEFAULT_TOPICS),
            packages_topic: Some(BundleGate::default().packages_topic),
            requirements: BTreeMap::new(),
            ack_timeout: Duration::from_secs(30),
        }
    }
}

impl AgentConfig {
    /// Load configuration from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `REPLICANT_SYNC_HOST`: Server host
    /// - `REPLICANT_SYNC_PORT`: Server port
    /// - `REPLICANT_SYNC_TOPICS`: JSON map of namespace to replicant names
    /// - `REPLICANT_SYNC_TOPICS_FILE`: Path to a file holding the same JSON
    /// - `REPLICANT_SYNC_PACKAGES_TOPIC`: `namespace/name` of the installed
    ///   bundles topic; empty disables gating
    /// - `REPLICANT_SYNC_REQUIREMENTS`: JSON map of namespace to semver range
    /// - `REPLICANT_SYNC_ACK_TIMEOUT_SECS`: Acknowledgement timeout
    /// - `REPLICANT_SYNC_SESSION_ID`: Session UUID
    ///
    /// # Errors
    ///
    /// Returns error if a variable is set but cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();

        if let Some(id) = lookup("REPLICANT_SYNC_SESSION_ID") {
            config.session_id =
                Some(Uuid::parse_str(&id).context("Invalid REPLICANT_SYNC_SESSION_ID")?);
        }

        if let Some(host) = lookup("REPLICANT_SYNC_HOST") {
            config.connection.host = Some(host);
        }

        if let Some(port) = lookup("REPLICANT_SYNC_PORT") {
            config.connection.port = Some(port);
        }

        if let Some(path) = lookup("REPLICANT_SYNC_TOPICS_FILE") {
            let path = PathBuf::from(path);
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read topics file {}", path.display()))?;
            config.registry =
                serde_json::from_str(&json).context("Invalid topics file JSON")?;
        }

        if let Some(json) = lookup("REPLICANT_SYNC_TOPICS") {
            config.registry =
                serde_json::from_str(&json).context("Invalid REPLICANT_SYNC_TOPICS JSON")?;
        }

        if let Some(topic) = lookup("REPLICANT_SYNC_PACKAGES_TOPIC") {
            config.packages_topic = if topic.trim().is_empty() {
                None
            } else {
                Some(
                    TopicKey::parse(topic.trim())
                        .context("Invalid REPLICANT_SYNC_PACKAGES_TOPIC, expected namespace/name")?,
                )
            };
        }

        if let Some(json) = lookup("REPLICANT_SYNC_REQUIREMENTS") {
            config.requirements =
                serde_json::from_str(&json).context("Invalid REPLICANT_SYNC_REQUIREMENTS JSON")?;
        }

        if let Some(secs) = lookup("REPLICANT_SYNC_ACK_TIMEOUT_SECS") {
            let secs: u64 = secs
                .parse()
                .context("Invalid REPLICANT_SYNC_ACK_TIMEOUT_SECS")?;
            config.ack_timeout = Duration::from_secs(secs);
        }

        Ok(config)
    }

    /// Session options for this configuration.
    ///
    /// # Errors
    ///
    /// Returns error if a version requirement is not a valid semver range.
    pub fn session_options(&self) -> Result<SessionOptions> {
        let mut options = SessionOptions::default();
        if let Some(id) = self.session_id {
            options.session_id = id;
        }

        if let Some(packages_topic) = &self.packages_topic {
            let mut gate = BundleGate::new(packages_topic.clone());
            for (namespace, requirement) in &self.requirements {
                gate = gate
                    .require(namespace.as_str(), requirement)
                    .with_context(|| format!("Invalid version requirement for {namespace}"))?;
            }
            options = options.with_gate(gate);
        }

        Ok(options)
    }

    /// Transport configuration.
    #[must_use]
    pub fn socketio_config(&self) -> SocketIoConfig {
        SocketIoConfig {
            ack_timeout: self.ack_timeout,
            ..SocketIoConfig::default()
        }
    }
}
