//! The replicant store: a local mirror of remote replicant values.
//!
//! Each tracked topic holds its value, its metadata, and its declaration
//! phase. The stored revision always equals the revision of the value
//! currently held: batches are applied only when they continue the revision
//! sequence exactly, and anything else is reported as a gap for the caller to
//! repair with a full read.

use crate::declaration::{PhaseError, PhaseEvent, SyncPhase};
use crate::operation::Operation;
use crate::patch::{apply_operation, PatchError};
use crate::topic::{TopicKey, TopicRegistry};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;

/// Replicant options sent along with declarations and proposals.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicantOptions {
    /// Server-side schema location
    pub schema_path: String,
    /// Whether the server persists the replicant
    pub persistent: bool,
    /// Server persistence interval in milliseconds
    pub persistence_interval: u64,
}

impl ReplicantOptions {
    /// Default options for a topic, pointing at the bundle's schema directory.
    #[must_use]
    pub fn for_topic(key: &TopicKey) -> Self {
        Self {
            schema_path: format!("bundles/{}/schemas/{}.json", key.namespace, key.name),
            persistent: true,
            persistence_interval: 100,
        }
    }
}

/// Per-topic metadata tracked alongside the value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReplicantMetadata {
    /// Revision of the value currently held
    pub revision: u64,
    /// Server schema checksum the value was validated against
    pub schema_sum: Option<String>,
    /// Options sent to the server
    pub opts: ReplicantOptions,
    /// When the value last changed locally
    #[serde(skip)]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReplicantMetadata {
    fn initial(key: &TopicKey) -> Self {
        Self {
            revision: 0,
            schema_sum: None,
            opts: ReplicantOptions::for_topic(key),
            updated_at: None,
        }
    }
}

/// Cached value of a topic.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum ReplicantState {
    /// No value has been received since the last reset
    #[default]
    NotYetSynced,
    /// Value received from the server
    Synced(Value),
}

impl ReplicantState {
    /// The value, if one has been received.
    #[must_use]
    pub fn value(&self) -> Option<&Value> {
        match self {
            Self::NotYetSynced => None,
            Self::Synced(value) => Some(value),
        }
    }

    /// Whether a value has been received.
    #[must_use]
    pub fn is_synced(&self) -> bool {
        matches!(self, Self::Synced(_))
    }
}

/// A store slot.
#[derive(Debug, Clone, PartialEq)]
pub struct ReplicantEntry {
    /// Cached value
    pub state: ReplicantState,
    /// Revision, checksum and options
    pub metadata: ReplicantMetadata,
    /// Declaration phase
    pub phase: SyncPhase,
}

impl ReplicantEntry {
    fn new(key: &TopicKey) -> Self {
        Self {
            state: ReplicantState::NotYetSynced,
            metadata: ReplicantMetadata::initial(key),
            phase: SyncPhase::Undeclared,
        }
    }

    fn reset(&mut self) {
        self.state = ReplicantState::NotYetSynced;
        self.metadata.revision = 0;
        self.metadata.schema_sum = None;
        self.metadata.updated_at = None;
    }

    fn touch(&mut self) {
        self.metadata.updated_at = Some(Utc::now());
    }
}

/// A complete server-side state of a topic.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// Replicant value
    pub value: Value,
    /// Revision of that value
    pub revision: u64,
    /// Schema checksum in effect
    pub schema_sum: Option<String>,
}

/// Result of offering an operation batch to the store.
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// The batch continued the revision sequence and was applied
    Applied {
        /// Revision now held
        revision: u64,
        /// Per-operation results, in batch order
        results: Vec<Value>,
    },
    /// The batch did not continue the sequence; nothing was applied
    Gap {
        /// Revision the store was waiting for
        expected: u64,
        /// Revision the batch carried
        received: u64,
    },
}

/// In-memory mirror of every tracked topic.
#[derive(Debug, Clone, Default)]
pub struct ReplicantStore {
    entries: BTreeMap<TopicKey, ReplicantEntry>,
}

impl ReplicantStore {
    /// Create a store with an empty slot for every registered topic.
    #[must_use]
    pub fn new(registry: &TopicRegistry) -> Self {
        let entries = registry
            .topics()
            .map(|key| {
                let entry = ReplicantEntry::new(&key);
                (key, entry)
            })
            .collect();
        Self { entries }
    }

    /// Whether the topic has a slot.
    #[must_use]
    pub fn contains(&self, key: &TopicKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Cached state of a topic.
    #[must_use]
    pub fn read(&self, key: &TopicKey) -> Option<&ReplicantState> {
        self.entries.get(key).map(|entry| &entry.state)
    }

    /// Cached value of a topic, if synced.
    #[must_use]
    pub fn value(&self, key: &TopicKey) -> Option<&Value> {
        self.read(key).and_then(ReplicantState::value)
    }

    /// Full slot of a topic.
    #[must_use]
    pub fn entry(&self, key: &TopicKey) -> Option<&ReplicantEntry> {
        self.entries.get(key)
    }

    /// Metadata of a topic.
    #[must_use]
    pub fn metadata(&self, key: &TopicKey) -> Option<&ReplicantMetadata> {
        self.entries.get(key).map(|entry| &entry.metadata)
    }

    /// Revision currently held for a topic.
    #[must_use]
    pub fn revision(&self, key: &TopicKey) -> Option<u64> {
        self.metadata(key).map(|metadata| metadata.revision)
    }

    /// Declaration phase of a topic.
    #[must_use]
    pub fn phase(&self, key: &TopicKey) -> Option<SyncPhase> {
        self.entries.get(key).map(|entry| entry.phase)
    }

    /// Every slot, ordered by topic.
    pub fn iter(&self) -> impl Iterator<Item = (&TopicKey, &ReplicantEntry)> {
        self.entries.iter()
    }

    /// Cached states of every topic in `namespace`, keyed by name.
    pub fn namespace<'a>(
        &'a self,
        namespace: &'a str,
    ) -> impl Iterator<Item = (&'a str, &'a ReplicantState)> + 'a {
        self.entries
            .iter()
            .filter(move |(key, _)| key.namespace == namespace)
            .map(|(key, entry)| (key.name.as_str(), &entry.state))
    }

    /// Drive the declaration state machine of a topic.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown or the transition is not allowed.
    pub fn advance_phase(
        &mut self,
        key: &TopicKey,
        event: PhaseEvent,
    ) -> Result<SyncPhase, StoreError> {
        let entry = self.entry_mut(key)?;
        let next = entry.phase.advance(event).map_err(|source| StoreError::Phase {
            topic: key.clone(),
            source,
        })?;
        entry.phase = next;
        Ok(next)
    }

    /// Adopt a declare response: value, revision and checksum together.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown.
    pub fn adopt_snapshot(&mut self, key: &TopicKey, snapshot: Snapshot) -> Result<(), StoreError> {
        let entry = self.entry_mut(key)?;
        entry.state = ReplicantState::Synced(snapshot.value);
        entry.metadata.revision = snapshot.revision;
        entry.metadata.schema_sum = snapshot.schema_sum;
        entry.touch();
        tracing::debug!(topic = %key, revision = snapshot.revision, "Adopted snapshot");
        Ok(())
    }

    /// Offer an operation batch that results in `new_revision`.
    ///
    /// When `new_revision` is exactly one past the held revision, each
    /// operation is applied in order to the live value and the revision is
    /// advanced. Otherwise nothing is touched and [`BatchOutcome::Gap`] is
    /// returned.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown or not synced, if the batch holds
    /// an unsupported operation (checked before anything is applied), or if an
    /// operation fails midway. In the last case earlier operations have
    /// already been applied and the revision is left unchanged, so the value
    /// must be refetched.
    pub fn apply_operation_batch(
        &mut self,
        key: &TopicKey,
        operations: &[Operation],
        new_revision: u64,
    ) -> Result<BatchOutcome, StoreError> {
        let entry = self.entry_mut(key)?;

        let ReplicantState::Synced(value) = &mut entry.state else {
            return Err(StoreError::NotSynced(key.clone()));
        };

        let expected = entry.metadata.revision.saturating_add(1);
        if new_revision != expected {
            tracing::debug!(
                topic = %key,
                expected,
                received = new_revision,
                "Operation batch does not continue revision sequence"
            );
            return Ok(BatchOutcome::Gap {
                expected,
                received: new_revision,
            });
        }

        if let Some(op) = operations.iter().find(|op| op.is_unsupported()) {
            return Err(StoreError::Patch {
                topic: key.clone(),
                source: PatchError::UnsupportedOperation(op.method_name().to_string()),
            });
        }

        let mut results = Vec::with_capacity(operations.len());
        for op in operations {
            let result = apply_operation(value, op).map_err(|source| StoreError::Patch {
                topic: key.clone(),
                source,
            })?;
            results.push(result);
        }

        entry.metadata.revision = new_revision;
        entry.touch();
        tracing::debug!(
            topic = %key,
            revision = new_revision,
            operations = operations.len(),
            "Applied operation batch"
        );

        Ok(BatchOutcome::Applied {
            revision: new_revision,
            results,
        })
    }

    /// Replace the value after a full read, recording `revision` as current.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown.
    pub fn replace_value(
        &mut self,
        key: &TopicKey,
        value: Value,
        revision: u64,
    ) -> Result<(), StoreError> {
        let entry = self.entry_mut(key)?;
        entry.state = ReplicantState::Synced(value);
        entry.metadata.revision = revision;
        entry.touch();
        tracing::debug!(topic = %key, revision, "Replaced value from full read");
        Ok(())
    }

    /// Replace the value without touching the revision (legacy assignment push).
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown.
    pub fn assign(&mut self, key: &TopicKey, value: Value) -> Result<(), StoreError> {
        let entry = self.entry_mut(key)?;
        entry.state = ReplicantState::Synced(value);
        entry.touch();
        Ok(())
    }

    /// Adopt whatever parts of a server-confirmed state were returned.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown.
    pub fn adopt_confirmed(
        &mut self,
        key: &TopicKey,
        value: Option<Value>,
        revision: Option<u64>,
        schema_sum: Option<String>,
    ) -> Result<bool, StoreError> {
        let entry = self.entry_mut(key)?;
        let changed = value.is_some() || revision.is_some() || schema_sum.is_some();
        if let Some(value) = value {
            entry.state = ReplicantState::Synced(value);
        }
        if let Some(revision) = revision {
            entry.metadata.revision = revision;
        }
        if schema_sum.is_some() {
            entry.metadata.schema_sum = schema_sum;
        }
        if changed {
            entry.touch();
        }
        Ok(changed)
    }

    /// Clear a topic's value and metadata. The phase is left as is.
    ///
    /// # Errors
    ///
    /// Returns error if the topic is unknown.
    pub fn reset(&mut self, key: &TopicKey) -> Result<(), StoreError> {
        self.entry_mut(key)?.reset();
        Ok(())
    }

    /// Clear every slot and return all topics to [`SyncPhase::Undeclared`].
    pub fn reset_all(&mut self) {
        for entry in self.entries.values_mut() {
            entry.reset();
            entry.phase = SyncPhase::Undeclared;
        }
    }

    fn entry_mut(&mut self, key: &TopicKey) -> Result<&mut ReplicantEntry, StoreError> {
        self.entries
            .get_mut(key)
            .ok_or_else(|| StoreError::UnknownTopic(key.clone()))
    }
}

/// Errors raised by the store.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// The topic is not registered
    #[error("unknown topic {0}")]
    UnknownTopic(TopicKey),
    /// The topic has no value yet
    #[error("topic {0} is not synced")]
    NotSynced(TopicKey),
    /// The declaration state machine refused a transition
    #[error("topic {topic}: {source}")]
    Phase {
        /// Topic concerned
        topic: TopicKey,
        /// Refused transition
        source: PhaseError,
    },
    /// Applying an operation failed
    #[error("topic {topic}: {source}")]
    Patch {
        /// Topic concerned
        topic: TopicKey,
        /// Patch engine failure
        source: PatchError,
    },
}
