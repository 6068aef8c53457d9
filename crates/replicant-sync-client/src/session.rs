//! Session handle.

use crate::config::{ConnectionConfig, SessionOptions};
use crate::driver::{Command, Driver, Shared};
use crate::error::SyncError;
use crate::events::{ProposeOutcome, SessionEvent};
use crate::remote;
use crate::transport::{DisconnectReason, Transport};
use replicant_sync_core::{
    GateStatus, Operation, ReplicantState, ReplicantStore, SyncPhase, TopicKey, TopicRegistry,
};
use replicant_sync_proto::MessageRequest;
use serde_json::Value;
use std::sync::{Arc, RwLockReadGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

const COMMAND_CAPACITY: usize = 64;

struct Running {
    commands: mpsc::Sender<Command>,
    task: JoinHandle<()>,
}

/// A replicant synchronization session.
///
/// Holds the local mirror of every registered topic and keeps it consistent
/// with the server while a connection is up. Reads are synchronous and served
/// from the mirror; fetches and proposals go through the session driver.
///
/// [`start`](Self::start) spawns the driver and must be called from within a
/// Tokio runtime.
pub struct ReplicantSession<T: Transport> {
    transport: Arc<T>,
    registry: TopicRegistry,
    options: SessionOptions,
    shared: Arc<Shared>,
    events: broadcast::Sender<SessionEvent>,
    config: Option<ConnectionConfig>,
    running: Option<Running>,
}

impl<T: Transport> ReplicantSession<T> {
    /// Create a session tracking `registry`.
    ///
    /// With gating enabled the packages topic is tracked as well.
    #[must_use]
    pub fn new(transport: T, mut registry: TopicRegistry, options: SessionOptions) -> Self {
        if let Some(gate) = &options.gate {
            registry.insert(gate.packages_topic.clone());
        }
        let shared = Arc::new(Shared::new(ReplicantStore::new(&registry)));
        let (events, _) = broadcast::channel(options.event_capacity.max(1));

        Self {
            transport: Arc::new(transport),
            registry,
            options,
            shared,
            events,
            config: None,
            running: None,
        }
    }

    /// Connect using `config`, replacing any running connection.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if host or port is missing or invalid;
    /// nothing is opened in that case.
    pub fn start(&mut self, config: ConnectionConfig) -> Result<(), SyncError> {
        let endpoint = config.endpoint()?;
        self.stop();

        tracing::info!(
            session = %self.options.session_id,
            endpoint = %endpoint,
            topics = self.registry.len(),
            "Starting replicant session"
        );

        let inbound = self.transport.open(&endpoint);
        let (commands, command_rx) = mpsc::channel(COMMAND_CAPACITY);
        let task = Driver::spawn(
            Arc::clone(&self.transport),
            Arc::clone(&self.shared),
            self.events.clone(),
            self.options.gate.clone(),
            self.options.session_id,
            inbound,
            command_rx,
        );

        self.config = Some(config);
        self.running = Some(Running { commands, task });
        Ok(())
    }

    /// Apply a new configuration, reconnecting if it differs from the
    /// current one.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::Config`] if the new configuration is invalid.
    pub fn update_config(&mut self, config: ConnectionConfig) -> Result<(), SyncError> {
        if self.running.is_some() && self.config.as_ref() == Some(&config) {
            tracing::debug!(session = %self.options.session_id, "Configuration unchanged");
            return Ok(());
        }
        self.start(config)
    }

    /// Close the connection. Safe to call repeatedly.
    pub fn disconnect(&mut self) {
        if self.stop() {
            tracing::info!(session = %self.options.session_id, "Session disconnected");
            let _ = self.events.send(SessionEvent::Disconnected {
                reason: DisconnectReason::ClientInitiated,
            });
        }
    }

    fn stop(&mut self) -> bool {
        self.transport.close();
        let Some(running) = self.running.take() else {
            return false;
        };
        running.task.abort();
        self.shared.set_connected(false);
        true
    }

    /// Whether the connection is up.
    #[must_use]
    pub fn is_connected(&self) -> bool {
        self.running.is_some() && self.shared.is_connected() && self.transport.is_connected()
    }

    /// Subscribe to session events.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    /// Session identifier.
    #[must_use]
    pub fn session_id(&self) -> Uuid {
        self.options.session_id
    }

    /// Tracked topics.
    #[must_use]
    pub fn registry(&self) -> &TopicRegistry {
        &self.registry
    }

    /// Lock the mirror for reading. Do not hold the guard across an await.
    #[must_use]
    pub fn replicants(&self) -> RwLockReadGuard<'_, ReplicantStore> {
        self.shared.store()
    }

    /// Cached state of a topic.
    ///
    /// # Errors
    ///
    /// Returns [`SyncError::UnknownTopic`] if the topic is not tracked.
    pub fn read(&self, topic: &TopicKey) -> Result<ReplicantState, SyncError> {
        self.shared
            .store()
            .read(topic)
            .cloned()
            .ok_or_else(|| SyncError::UnknownTopic(topic.clone()))
    }

    /// Cached value of a topic, if synced.
    #[must_use]
    pub fn value(&self, topic: &TopicKey) -> Option<Value> {
        self.shared.store().value(topic).cloned()
    }

    /// Revision currently held for a topic.
    #[must_use]
    pub fn revision(&self, topic: &TopicKey) -> Option<u64> {
        self.shared.store().revision(topic)
    }

    /// Declaration phase of a topic.
    #[must_use]
    pub fn phase(&self, topic: &TopicKey) -> Option<SyncPhase> {
        self.shared.store().phase(topic)
    }

    /// Last gating verdict for a namespace.
    #[must_use]
    pub fn bundle_status(&self, namespace: &str) -> Option<GateStatus> {
        self.shared.gate_status(namespace)
    }

    /// Read the topic's full value from the server and store it.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown or not synced, if there is no
    /// connection, or if the read fails.
    pub async fn fetch(&self, topic: &TopicKey) -> Result<Value, SyncError> {
        self.ensure_tracked(topic)?;
        let (reply, response) = oneshot::channel();
        self.send_command(Command::Fetch {
            topic: topic.clone(),
            reply,
        })
        .await?;
        response.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Propose an operation batch based on the locally held revision.
    ///
    /// The mirror is updated only with what the server confirms; a rejection
    /// leaves it untouched.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown or not synced, if there is no
    /// connection, or if the request fails.
    pub async fn propose_operations(
        &self,
        topic: &TopicKey,
        operations: Vec<Operation>,
    ) -> Result<ProposeOutcome, SyncError> {
        self.ensure_tracked(topic)?;
        let (reply, response) = oneshot::channel();
        self.send_command(Command::Propose {
            topic: topic.clone(),
            operations,
            reply,
        })
        .await?;
        response.await.map_err(|_| SyncError::SessionClosed)?
    }

    /// Propose replacing the topic's whole value.
    ///
    /// # Errors
    ///
    /// See [`propose_operations`](Self::propose_operations).
    pub async fn propose_assignment(
        &self,
        topic: &TopicKey,
        value: Value,
    ) -> Result<ProposeOutcome, SyncError> {
        self.propose_operations(topic, vec![Operation::overwrite(value)])
            .await
    }

    /// Send a message to a bundle and wait for its reply.
    ///
    /// # Errors
    ///
    /// Returns error if there is no connection, the request fails, or the
    /// bundle answers with an error.
    pub async fn send_message(
        &self,
        bundle_name: &str,
        message_name: &str,
        content: Value,
    ) -> Result<Option<Value>, SyncError> {
        self.ensure_connected()?;
        let message = MessageRequest {
            bundle_name: bundle_name.to_string(),
            message_name: message_name.to_string(),
            content,
        };
        remote::send_message(self.transport.as_ref(), &message).await
    }

    /// Send a message to a bundle without waiting for a reply.
    ///
    /// # Errors
    ///
    /// Returns error if there is no connection or the message could not be
    /// sent.
    pub async fn notify(
        &self,
        bundle_name: &str,
        message_name: &str,
        content: Value,
    ) -> Result<(), SyncError> {
        self.ensure_connected()?;
        let message = MessageRequest {
            bundle_name: bundle_name.to_string(),
            message_name: message_name.to_string(),
            content,
        };
        remote::notify(self.transport.as_ref(), &message).await
    }

    fn ensure_tracked(&self, topic: &TopicKey) -> Result<(), SyncError> {
        if self.registry.contains(topic) {
            Ok(())
        } else {
            Err(SyncError::UnknownTopic(topic.clone()))
        }
    }

    fn ensure_connected(&self) -> Result<(), SyncError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(SyncError::NotConnected)
        }
    }

    async fn send_command(&self, command: Command) -> Result<(), SyncError> {
        let running = self.running.as_ref().ok_or(SyncError::NotConnected)?;
        running
            .commands
            .send(command)
            .await
            .map_err(|_| SyncError::SessionClosed)
    }
}

impl<T: Transport> Drop for ReplicantSession<T> {
    fn drop(&mut self) {
        self.stop();
    }
}
