//! Session driver.
//!
//! One task per running session. It is the only writer of the store; the
//! session handle only reads it and talks to the driver through commands.

use crate::error::{SyncError, TransportError};
use crate::events::{ProposeOutcome, SessionEvent};
use crate::remote;
use crate::transport::{DisconnectReason, Transport, TransportEvent};
use replicant_sync_core::{
    BatchOutcome, BundleGate, GateStatus, Operation, PhaseEvent, ReplicantStore, Snapshot,
    StoreError, SyncPhase, TopicKey,
};
use replicant_sync_proto::{InboundMessage, OperationsEvent, ProposeOperationsRequest, ProposeResponse};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use uuid::Uuid;

type Reply<T> = oneshot::Sender<Result<T, SyncError>>;

/// State shared between the driver and the session handle.
#[derive(Debug)]
pub(crate) struct Shared {
    store: RwLock<ReplicantStore>,
    gate_statuses: RwLock<BTreeMap<String, GateStatus>>,
    connected: AtomicBool,
}

impl Shared {
    pub(crate) fn new(store: ReplicantStore) -> Self {
        Self {
            store: RwLock::new(store),
            gate_statuses: RwLock::new(BTreeMap::new()),
            connected: AtomicBool::new(false),
        }
    }

    pub(crate) fn store(&self) -> RwLockReadGuard<'_, ReplicantStore> {
        self.store.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn store_mut(&self) -> RwLockWriteGuard<'_, ReplicantStore> {
        self.store.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn gate_status(&self, namespace: &str) -> Option<GateStatus> {
        self.gate_statuses
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(namespace)
            .cloned()
    }

    fn set_gate_status(&self, namespace: &str, status: GateStatus) -> Option<GateStatus> {
        self.gate_statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(namespace.to_string(), status)
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub(crate) fn set_connected(&self, connected: bool) {
        self.connected.store(connected, Ordering::Release);
    }

    fn reset(&self) {
        self.store_mut().reset_all();
        self.gate_statuses
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

/// Requests from the session handle.
pub(crate) enum Command {
    Fetch {
        topic: TopicKey,
        reply: Reply<Value>,
    },
    Propose {
        topic: TopicKey,
        operations: Vec<Operation>,
        reply: Reply<ProposeOutcome>,
    },
}

enum Completion {
    Joined {
        topic: TopicKey,
        result: Result<(), SyncError>,
    },
    Declared {
        topic: TopicKey,
        result: Result<Snapshot, SyncError>,
    },
    Read {
        topic: TopicKey,
        result: Result<Value, SyncError>,
    },
    Proposed {
        topic: TopicKey,
        result: Result<ProposeResponse, SyncError>,
        reply: Reply<ProposeOutcome>,
    },
}

/// A completion tagged with the connection it was issued on.
struct Tagged {
    generation: u64,
    completion: Completion,
}

/// An outstanding full read.
struct Refetch {
    /// Revision to record once the read lands
    target: u64,
    /// Updates arrived while the read was in flight
    dirty: bool,
    waiters: Vec<Reply<Value>>,
}

impl Refetch {
    fn fail(self, error: &SyncError) {
        for waiter in self.waiters {
            let _ = waiter.send(Err(error.clone()));
        }
    }
}

pub(crate) struct Driver<T> {
    transport: Arc<T>,
    shared: Arc<Shared>,
    events: broadcast::Sender<SessionEvent>,
    gate: Option<BundleGate>,
    session_id: Uuid,
    generation: u64,
    refetches: HashMap<TopicKey, Refetch>,
    completions: mpsc::UnboundedSender<Tagged>,
}

impl<T: Transport> Driver<T> {
    pub(crate) fn spawn(
        transport: Arc<T>,
        shared: Arc<Shared>,
        events: broadcast::Sender<SessionEvent>,
        gate: Option<BundleGate>,
        session_id: Uuid,
        inbound: mpsc::Receiver<TransportEvent>,
        commands: mpsc::Receiver<Command>,
    ) -> JoinHandle<()> {
        let (completions, completion_rx) = mpsc::unbounded_channel();
        let driver = Self {
            transport,
            shared,
            events,
            gate,
            session_id,
            generation: 0,
            refetches: HashMap::new(),
            completions,
        };
        tokio::spawn(driver.run(inbound, commands, completion_rx))
    }

    async fn run(
        mut self,
        mut inbound: mpsc::Receiver<TransportEvent>,
        mut commands: mpsc::Receiver<Command>,
        mut completions: mpsc::UnboundedReceiver<Tagged>,
    ) {
        tracing::debug!(session = %self.session_id, "Session driver started");

        loop {
            tokio::select! {
                event = inbound.recv() => match event {
                    Some(event) => self.on_transport_event(event),
                    None => {
                        tracing::debug!(session = %self.session_id, "Transport closed its event channel");
                        break;
                    }
                },
                Some(tagged) = completions.recv() => self.on_completion(tagged),
                command = commands.recv() => match command {
                    Some(command) => self.on_command(command),
                    None => break,
                },
            }
        }

        self.shared.set_connected(false);
        self.abandon_refetches(&SyncError::SessionClosed);
        tracing::debug!(session = %self.session_id, "Session driver stopped");
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.on_connected(),
            TransportEvent::Disconnected(reason) => self.on_disconnected(reason),
            TransportEvent::Error(message) => {
                tracing::warn!(session = %self.session_id, error = %message, "Transport error");
                self.publish(SessionEvent::Error(
                    TransportError::Connection(message).into(),
                ));
            }
            TransportEvent::Message { event, args } => self.on_message(&event, args),
        }
    }

    fn on_connected(&mut self) {
        self.generation += 1;
        self.abandon_refetches(&SyncError::NotConnected);
        self.shared.reset();
        self.shared.set_connected(true);

        tracing::info!(
            session = %self.session_id,
            generation = self.generation,
            "Connected, declaring replicants"
        );
        self.publish(SessionEvent::Connected);

        // Gated topics wait for the packages topic.
        let topics: Vec<TopicKey> = self
            .shared
            .store()
            .iter()
            .map(|(key, _)| key.clone())
            .filter(|key| !self.gate.as_ref().is_some_and(|gate| gate.is_gated(key)))
            .collect();
        for topic in topics {
            self.begin_declaration(topic);
        }
    }

    fn on_disconnected(&mut self, reason: DisconnectReason) {
        self.generation += 1;
        self.abandon_refetches(&SyncError::NotConnected);
        self.shared.set_connected(false);

        tracing::warn!(session = %self.session_id, reason = %reason, "Disconnected");
        let server_initiated = reason == DisconnectReason::ServerInitiated;
        self.publish(SessionEvent::Disconnected { reason });

        if server_initiated {
            tracing::info!(session = %self.session_id, "Server closed the connection, reconnecting");
            self.transport.reconnect();
        }
    }

    fn on_message(&mut self, event: &str, args: Vec<Value>) {
        let message = match InboundMessage::decode(event, args) {
            Ok(Some(message)) => message,
            Ok(None) => {
                tracing::trace!(event, "Ignoring unhandled event");
                return;
            }
            Err(e) => {
                tracing::warn!(event, error = %e, "Malformed push");
                self.publish(SessionEvent::Error(e.into()));
                return;
            }
        };

        let topic = message.topic();
        if !self.shared.store().contains(&topic) {
            tracing::trace!(topic = %topic, "Ignoring push for untracked topic");
            return;
        }

        match message {
            InboundMessage::Operations(event) => self.on_operations(topic, event),
            InboundMessage::Assignment(event) => self.on_assignment(topic, event.new_value),
        }
    }

    fn on_operations(&mut self, topic: TopicKey, event: OperationsEvent) {
        if self.phase(&topic) != Some(SyncPhase::Synced) {
            tracing::debug!(
                topic = %topic,
                revision = event.revision,
                "Dropping batch for topic that is not synced"
            );
            return;
        }

        if let Some(refetch) = self.refetches.get_mut(&topic) {
            refetch.target = refetch.target.max(event.revision);
            refetch.dirty = true;
            return;
        }

        let outcome =
            self.shared
                .store_mut()
                .apply_operation_batch(&topic, &event.operations, event.revision);

        match outcome {
            Ok(BatchOutcome::Applied { .. }) => self.topic_changed(&topic),
            Ok(BatchOutcome::Gap { expected, received }) => {
                tracing::warn!(topic = %topic, expected, received, "Revision gap, refetching");
                self.start_refetch(topic, received, None);
            }
            Err(StoreError::Patch { source, .. }) if source.is_protocol_mismatch() => {
                tracing::error!(
                    topic = %topic,
                    error = %source,
                    "Server sent an operation this client cannot apply"
                );
                self.publish(SessionEvent::Error(
                    StoreError::Patch { topic, source }.into(),
                ));
            }
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "Operation batch failed, refetching");
                self.start_refetch(topic, event.revision, None);
            }
        }
    }

    fn on_assignment(&mut self, topic: TopicKey, value: Value) {
        if self.phase(&topic) != Some(SyncPhase::Synced) {
            tracing::debug!(topic = %topic, "Dropping assignment for topic that is not synced");
            return;
        }
        if let Some(refetch) = self.refetches.get_mut(&topic) {
            refetch.dirty = true;
        }

        let assigned = self.shared.store_mut().assign(&topic, value);
        match assigned {
            Ok(()) => {
                tracing::debug!(topic = %topic, "Applied assignment");
                self.topic_changed(&topic);
            }
            Err(err) => tracing::warn!(topic = %topic, error = %err, "Assignment failed"),
        }
    }

    fn on_completion(&mut self, tagged: Tagged) {
        if tagged.generation != self.generation {
            tracing::debug!(
                generation = tagged.generation,
                current = self.generation,
                "Discarding completion from a previous connection"
            );
            if let Completion::Proposed { reply, .. } = tagged.completion {
                let _ = reply.send(Err(SyncError::NotConnected));
            }
            return;
        }

        match tagged.completion {
            Completion::Joined { topic, result } => self.on_joined(topic, result),
            Completion::Declared { topic, result } => self.on_declared(topic, result),
            Completion::Read { topic, result } => self.on_read(topic, result),
            Completion::Proposed {
                topic,
                result,
                reply,
            } => self.on_proposed(&topic, result, reply),
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Fetch { topic, reply } => match self.check_ready(&topic) {
                Ok(()) => self.start_refetch(topic, 0, Some(reply)),
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
            Command::Propose {
                topic,
                operations,
                reply,
            } => match self.check_ready(&topic) {
                Ok(()) => self.propose(topic, operations, reply),
                Err(err) => {
                    let _ = reply.send(Err(err));
                }
            },
        }
    }

    fn check_ready(&self, topic: &TopicKey) -> Result<(), SyncError> {
        match self.phase(topic) {
            None => Err(SyncError::UnknownTopic(topic.clone())),
            Some(_) if !self.shared.is_connected() => Err(SyncError::NotConnected),
            Some(SyncPhase::Synced) => Ok(()),
            Some(_) => Err(SyncError::NotSynced(topic.clone())),
        }
    }

    // Declaration

    fn begin_declaration(&mut self, topic: TopicKey) {
        let begun = self
            .shared
            .store_mut()
            .advance_phase(&topic, PhaseEvent::Begin);
        if let Err(err) = begun {
            tracing::debug!(topic = %topic, error = %err, "Not starting declaration");
            return;
        }

        tracing::debug!(topic = %topic, "Joining room");
        let transport = Arc::clone(&self.transport);
        self.run_request(async move {
            let result = remote::join(transport.as_ref(), &topic.namespace).await;
            Completion::Joined { topic, result }
        });
    }

    fn on_joined(&mut self, topic: TopicKey, result: Result<(), SyncError>) {
        if self.phase(&topic) != Some(SyncPhase::Joining) {
            return;
        }
        if let Err(err) = result {
            self.fail_declaration(topic, &err);
            return;
        }

        let metadata = {
            let mut store = self.shared.store_mut();
            store
                .advance_phase(&topic, PhaseEvent::Joined)
                .ok()
                .and_then(|_| store.metadata(&topic).cloned())
        };
        let Some(metadata) = metadata else {
            return;
        };

        tracing::debug!(topic = %topic, revision = metadata.revision, "Declaring replicant");
        let transport = Arc::clone(&self.transport);
        self.run_request(async move {
            let result = remote::declare(transport.as_ref(), &topic, metadata).await;
            Completion::Declared { topic, result }
        });
    }

    fn on_declared(&mut self, topic: TopicKey, result: Result<Snapshot, SyncError>) {
        if self.phase(&topic) != Some(SyncPhase::Declaring) {
            return;
        }
        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(err) => {
                self.fail_declaration(topic, &err);
                return;
            }
        };

        let revision = snapshot.revision;
        let adopted = {
            let mut store = self.shared.store_mut();
            store
                .adopt_snapshot(&topic, snapshot)
                .and_then(|()| store.advance_phase(&topic, PhaseEvent::Declared))
        };

        match adopted {
            Ok(_) => {
                tracing::info!(topic = %topic, revision, "Replicant synced");
                self.topic_changed(&topic);
            }
            Err(err) => tracing::warn!(topic = %topic, error = %err, "Could not adopt snapshot"),
        }
    }

    fn fail_declaration(&mut self, topic: TopicKey, error: &SyncError) {
        tracing::error!(topic = %topic, error = %error, "Declaration failed");
        let failed = self
            .shared
            .store_mut()
            .advance_phase(&topic, PhaseEvent::Failed);
        if let Err(err) = failed {
            tracing::debug!(topic = %topic, error = %err, "Phase not updated");
        }
        self.publish(SessionEvent::Error(SyncError::Declaration {
            topic,
            reason: error.to_string(),
        }));
    }

    // Full reads

    fn start_refetch(&mut self, topic: TopicKey, target: u64, waiter: Option<Reply<Value>>) {
        let held = self.shared.store().revision(&topic).unwrap_or_default();
        let target = target.max(held);

        if let Some(refetch) = self.refetches.get_mut(&topic) {
            refetch.target = refetch.target.max(target);
            refetch.dirty = true;
            refetch.waiters.extend(waiter);
            return;
        }

        self.refetches.insert(
            topic.clone(),
            Refetch {
                target,
                dirty: false,
                waiters: waiter.into_iter().collect(),
            },
        );
        self.spawn_read(topic);
    }

    fn spawn_read(&self, topic: TopicKey) {
        tracing::debug!(topic = %topic, "Reading full value");
        let transport = Arc::clone(&self.transport);
        self.run_request(async move {
            let result = remote::read(transport.as_ref(), &topic).await;
            Completion::Read { topic, result }
        });
    }

    fn on_read(&mut self, topic: TopicKey, result: Result<Value, SyncError>) {
        let Some(mut refetch) = self.refetches.remove(&topic) else {
            return;
        };
        if self.phase(&topic) != Some(SyncPhase::Synced) {
            refetch.fail(&SyncError::NotSynced(topic));
            return;
        }

        let value = match result {
            Ok(value) => value,
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "Full read failed");
                self.publish(SessionEvent::Error(err.clone()));
                refetch.fail(&err);
                return;
            }
        };

        if refetch.dirty {
            tracing::debug!(topic = %topic, "Updates arrived during read, reading again");
            refetch.dirty = false;
            self.refetches.insert(topic.clone(), refetch);
            self.spawn_read(topic);
            return;
        }

        let revision = refetch.target;
        let replaced = self
            .shared
            .store_mut()
            .replace_value(&topic, value.clone(), revision);
        if let Err(err) = replaced {
            tracing::warn!(topic = %topic, error = %err, "Could not store full read");
            refetch.fail(&err.into());
            return;
        }

        tracing::info!(topic = %topic, revision, "Replicant refetched");
        for waiter in refetch.waiters {
            let _ = waiter.send(Ok(value.clone()));
        }
        self.topic_changed(&topic);
    }

    fn abandon_refetches(&mut self, error: &SyncError) {
        for (_, refetch) in self.refetches.drain() {
            refetch.fail(error);
        }
    }

    // Proposals

    fn propose(&mut self, topic: TopicKey, operations: Vec<Operation>, reply: Reply<ProposeOutcome>) {
        let metadata = self.shared.store().metadata(&topic).cloned();
        let Some(metadata) = metadata else {
            let _ = reply.send(Err(SyncError::UnknownTopic(topic)));
            return;
        };

        let request = ProposeOperationsRequest::new(&topic, operations, &metadata);
        tracing::debug!(
            topic = %topic,
            revision = request.revision,
            operations = request.operations.len(),
            "Proposing operations"
        );

        let transport = Arc::clone(&self.transport);
        self.run_request(async move {
            let result = remote::propose_operations(transport.as_ref(), &request).await;
            Completion::Proposed {
                topic,
                result,
                reply,
            }
        });
    }

    fn on_proposed(
        &mut self,
        topic: &TopicKey,
        result: Result<ProposeResponse, SyncError>,
        reply: Reply<ProposeOutcome>,
    ) {
        let response = match result {
            Ok(response) => response,
            Err(err) => {
                tracing::warn!(topic = %topic, error = %err, "Proposal failed");
                let _ = reply.send(Err(err));
                return;
            }
        };

        if let Some(reason) = response.reject_reason {
            tracing::warn!(topic = %topic, reason = %reason, "Proposal rejected");
            let _ = reply.send(Ok(ProposeOutcome::Rejected { reason }));
            return;
        }

        let adopted = self.shared.store_mut().adopt_confirmed(
            topic,
            response.value,
            response.revision,
            response.schema_sum,
        );
        let changed = match adopted {
            Ok(changed) => changed,
            Err(err) => {
                let _ = reply.send(Err(err.into()));
                return;
            }
        };

        if let Some(refetch) = self.refetches.get_mut(topic) {
            refetch.dirty = true;
        }
        let revision = self.shared.store().revision(topic).unwrap_or_default();
        tracing::debug!(topic = %topic, revision, "Proposal accepted");
        let _ = reply.send(Ok(ProposeOutcome::Accepted { revision }));

        if changed {
            self.topic_changed(topic);
        }
    }

    // Gating

    fn apply_gating(&mut self) {
        let Some(gate) = self.gate.clone() else {
            return;
        };

        let installed = self
            .shared
            .store()
            .value(&gate.packages_topic)
            .map(BundleGate::installed_bundles)
            .unwrap_or_default();
        let gated: Vec<(TopicKey, SyncPhase)> = self
            .shared
            .store()
            .iter()
            .filter(|(key, _)| gate.is_gated(key))
            .map(|(key, entry)| (key.clone(), entry.phase))
            .collect();

        let namespaces: BTreeSet<&str> = gated.iter().map(|(key, _)| key.namespace.as_str()).collect();
        let mut statuses = BTreeMap::new();
        for namespace in namespaces {
            let status = gate.evaluate(namespace, &installed);
            let previous = self.shared.set_gate_status(namespace, status.clone());
            if previous.as_ref() != Some(&status) {
                self.report_gate_status(namespace, &status);
            }
            statuses.insert(namespace.to_string(), status);
        }

        for (topic, phase) in gated {
            let allowed = statuses
                .get(&topic.namespace)
                .is_some_and(GateStatus::allows_declaration);
            if allowed {
                if phase.can_begin() {
                    self.begin_declaration(topic);
                }
            } else if phase != SyncPhase::Unavailable {
                self.mark_unavailable(topic);
            }
        }
    }

    fn report_gate_status(&self, namespace: &str, status: &GateStatus) {
        match status {
            GateStatus::Available => tracing::info!(namespace, "Bundle available"),
            GateStatus::Missing => tracing::info!(namespace, "Bundle not installed"),
            GateStatus::Incompatible {
                installed,
                required,
            } => {
                tracing::warn!(
                    namespace,
                    installed = %installed,
                    required = %required,
                    "Installed bundle does not satisfy version requirement"
                );
                self.publish(SessionEvent::BundleIncompatible {
                    namespace: namespace.to_string(),
                    installed: installed.clone(),
                    required: required.clone(),
                });
            }
        }
    }

    fn mark_unavailable(&mut self, topic: TopicKey) {
        if let Some(refetch) = self.refetches.remove(&topic) {
            refetch.fail(&SyncError::NotSynced(topic.clone()));
        }

        let gated = {
            let mut store = self.shared.store_mut();
            store
                .reset(&topic)
                .and_then(|()| store.advance_phase(&topic, PhaseEvent::Gated))
        };
        if let Err(err) = gated {
            tracing::warn!(topic = %topic, error = %err, "Could not mark topic unavailable");
            return;
        }

        tracing::info!(topic = %topic, "Topic unavailable");
        self.publish(SessionEvent::TopicUnavailable(topic));
    }

    // Helpers

    fn topic_changed(&mut self, topic: &TopicKey) {
        self.publish(SessionEvent::TopicUpdated(topic.clone()));
        if self
            .gate
            .as_ref()
            .is_some_and(|gate| gate.packages_topic == *topic)
        {
            self.apply_gating();
        }
    }

    fn phase(&self, topic: &TopicKey) -> Option<SyncPhase> {
        self.shared.store().phase(topic)
    }

    fn publish(&self, event: SessionEvent) {
        // No subscribers is fine.
        let _ = self.events.send(event);
    }

    fn run_request<F>(&self, request: F)
    where
        F: Future<Output = Completion> + Send + 'static,
    {
        let completions = self.completions.clone();
        let generation = self.generation;
        tokio::spawn(async move {
            let completion = request.await;
            let _ = completions.send(Tagged {
                generation,
                completion,
            });
        });
    }
}
