//! Agent runtime.

use crate::config::AgentConfig;
use anyhow::{Context, Result};
use replicant_sync_adapter_socketio::SocketIoTransport;
use replicant_sync_client::{ReplicantSession, SessionEvent, Transport};
use replicant_sync_core::TopicKey;
use tokio::sync::broadcast::error::RecvError;

/// The agent: one session, logged until shutdown.
pub struct Agent {
    config: AgentConfig,
}

impl Agent {
    /// Create a new agent.
    #[must_use]
    pub fn new(config: AgentConfig) -> Self {
        Self { config }
    }

    /// Run until Ctrl+C.
    ///
    /// # Errors
    ///
    /// Returns error if the configuration is invalid.
    pub async fn run(self) -> Result<()> {
        let options = self.config.session_options()?;
        let transport = SocketIoTransport::new(self.config.socketio_config());
        let mut session = ReplicantSession::new(transport, self.config.registry.clone(), options);
        let mut events = session.subscribe();

        tracing::info!(session = %session.session_id(), "Agent initialized");

        session
            .start(self.config.connection.clone())
            .context("Failed to start replicant session")?;

        loop {
            tokio::select! {
                event = events.recv() => match event {
                    Ok(event) => report(&session, &event),
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Event receiver lagged");
                    }
                    Err(RecvError::Closed) => break,
                },
                _ = tokio::signal::ctrl_c() => {
                    tracing::info!("Shutting down");
                    break;
                }
            }
        }

        session.disconnect();
        Ok(())
    }
}

fn report<T: Transport>(session: &ReplicantSession<T>, event: &SessionEvent) {
    match event {
        SessionEvent::Connected => tracing::info!("Connected"),
        SessionEvent::Disconnected { reason } => tracing::warn!(reason = %reason, "Disconnected"),
        SessionEvent::TopicUpdated(topic) => report_update(session, topic),
        SessionEvent::TopicUnavailable(topic) => {
            tracing::info!(topic = %topic, "Bundle not installed");
        }
        SessionEvent::BundleIncompatible {
            namespace,
            installed,
            required,
        } => tracing::warn!(
            namespace = %namespace,
            installed = %installed,
            required = %required,
            "Bundle version mismatch"
        ),
        SessionEvent::Error(err) => tracing::error!(error = %err, "Session error"),
    }
}

fn report_update<T: Transport>(session: &ReplicantSession<T>, topic: &TopicKey) {
    let revision = session.revision(topic).unwrap_or_default();
    let value = session
        .value(topic)
        .map(|value| value.to_string())
        .unwrap_or_default();
    tracing::info!(topic = %topic, revision, "Replicant updated");
    tracing::debug!(topic = %topic, value = %value, "Replicant value");
}
