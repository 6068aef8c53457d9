//! Protocol messages for replicant synchronization.

use crate::events::{ASSIGNMENT, OPERATIONS};
use replicant_sync_core::{Operation, ReplicantMetadata, ReplicantOptions, Snapshot, TopicKey};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Declare a replicant and request its current snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclareRequest {
    /// Replicant name
    pub name: String,
    /// Owning bundle
    pub namespace: String,
    /// Locally held metadata
    pub opts: ReplicantMetadata,
}

impl DeclareRequest {
    /// Create a declare request for `key`.
    #[must_use]
    pub fn new(key: &TopicKey, opts: ReplicantMetadata) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            opts,
        }
    }
}

/// Snapshot returned by a declare request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeclareResponse {
    /// Current value
    #[serde(default)]
    pub value: Value,
    /// Revision of that value
    pub revision: u64,
    /// Schema checksum in effect
    #[serde(default)]
    pub schema_sum: Option<String>,
}

impl From<DeclareResponse> for Snapshot {
    fn from(response: DeclareResponse) -> Self {
        Self {
            value: response.value,
            revision: response.revision,
            schema_sum: response.schema_sum,
        }
    }
}

/// Read a replicant's full value.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadRequest {
    /// Replicant name
    pub name: String,
    /// Owning bundle
    pub namespace: String,
}

impl ReadRequest {
    /// Create a read request for `key`.
    #[must_use]
    pub fn new(key: &TopicKey) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
        }
    }
}

/// Propose an operation batch based on the locally known revision.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeOperationsRequest {
    /// Replicant name
    pub name: String,
    /// Owning bundle
    pub namespace: String,
    /// Operations to apply, in order
    pub operations: Vec<Operation>,
    /// Revision the proposal is based on
    pub revision: u64,
    /// Schema checksum the proposal is based on
    pub schema_sum: Option<String>,
    /// Replicant options
    pub opts: ReplicantOptions,
}

impl ProposeOperationsRequest {
    /// Create a proposal for `key` based on `metadata`.
    #[must_use]
    pub fn new(key: &TopicKey, operations: Vec<Operation>, metadata: &ReplicantMetadata) -> Self {
        Self {
            name: key.name.clone(),
            namespace: key.namespace.clone(),
            operations,
            revision: metadata.revision,
            schema_sum: metadata.schema_sum.clone(),
            opts: metadata.opts.clone(),
        }
    }
}

/// Server verdict on a proposal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProposeResponse {
    /// Authoritative value after acceptance
    #[serde(default)]
    pub value: Option<Value>,
    /// Authoritative revision after acceptance
    #[serde(default)]
    pub revision: Option<u64>,
    /// Schema checksum in effect
    #[serde(default)]
    pub schema_sum: Option<String>,
    /// Why the proposal was rejected
    #[serde(default)]
    pub reject_reason: Option<String>,
}

impl ProposeResponse {
    /// Decode a proposal ack.
    ///
    /// A non-null leading argument in the `(error, data)` shape is taken as
    /// the rejection reason.
    ///
    /// # Errors
    ///
    /// Returns error if the data argument does not deserialize.
    pub fn from_ack(mut args: Vec<Value>) -> Result<Self, MessageError> {
        if args.len() >= 2 {
            let data = args.swap_remove(1);
            let error = args.swap_remove(0);
            let mut response: Self = if data.is_null() {
                Self::default()
            } else {
                serde_json::from_value(data)
                    .map_err(|e| MessageError::Deserialize(e.to_string()))?
            };
            if !error.is_null() {
                response.reject_reason = Some(error_text(&error));
            }
            return Ok(response);
        }

        match args.pop() {
            None | Some(Value::Null) => Ok(Self::default()),
            Some(Value::String(reason)) => Ok(Self {
                reject_reason: Some(reason),
                ..Self::default()
            }),
            Some(data) => {
                serde_json::from_value(data).map_err(|e| MessageError::Deserialize(e.to_string()))
            }
        }
    }

    /// Whether the server refused the proposal.
    #[must_use]
    pub fn is_rejected(&self) -> bool {
        self.reject_reason.is_some()
    }
}

/// Revisioned operation batch pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OperationsEvent {
    /// Replicant name
    pub name: String,
    /// Owning bundle
    pub namespace: String,
    /// Revision after the whole batch
    pub revision: u64,
    /// Operations, in application order
    pub operations: Vec<Operation>,
}

impl OperationsEvent {
    /// Topic the batch targets.
    #[must_use]
    pub fn topic(&self) -> TopicKey {
        TopicKey::new(&self.namespace, &self.name)
    }
}

/// Whole-value replacement pushed by the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentEvent {
    /// Replicant name
    pub name: String,
    /// Owning bundle
    pub namespace: String,
    /// Replacement value
    #[serde(default)]
    pub new_value: Value,
}

impl AssignmentEvent {
    /// Topic the assignment targets.
    #[must_use]
    pub fn topic(&self) -> TopicKey {
        TopicKey::new(&self.namespace, &self.name)
    }
}

/// Message addressed to a bundle's message handlers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageRequest {
    /// Target bundle
    pub bundle_name: String,
    /// Message name
    pub message_name: String,
    /// Message payload
    pub content: Value,
}

/// A decoded server push.
#[derive(Debug, Clone, PartialEq)]
pub enum InboundMessage {
    /// Operation batch
    Operations(OperationsEvent),
    /// Whole-value assignment
    Assignment(AssignmentEvent),
}

impl InboundMessage {
    /// Decode a server push by event name.
    ///
    /// Returns `Ok(None)` for events this client does not handle.
    ///
    /// # Errors
    ///
    /// Returns error if the payload does not match the event.
    pub fn decode(event: &str, mut args: Vec<Value>) -> Result<Option<Self>, MessageError> {
        let payload = if args.is_empty() {
            Value::Null
        } else {
            args.swap_remove(0)
        };

        let message = match event {
            OPERATIONS => Self::Operations(
                serde_json::from_value(payload)
                    .map_err(|e| MessageError::Deserialize(e.to_string()))?,
            ),
            ASSIGNMENT => Self::Assignment(
                serde_json::from_value(payload)
                    .map_err(|e| MessageError::Deserialize(e.to_string()))?,
            ),
            _ => return Ok(None),
        };

        Ok(Some(message))
    }

    /// Topic the push targets.
    #[must_use]
    pub fn topic(&self) -> TopicKey {
        match self {
            Self::Operations(event) => event.topic(),
            Self::Assignment(event) => event.topic(),
        }
    }
}

/// Serialize a request payload.
///
/// # Errors
///
/// Returns error if serialization fails.
pub fn encode<T: Serialize>(message: &T) -> Result<Value, MessageError> {
    serde_json::to_value(message).map_err(|e| MessageError::Serialize(e.to_string()))
}

/// Decode the data carried by an ack.
///
/// `(data)` yields `data`; `(error, data)` yields `data` when `error` is null
/// and [`MessageError::Remote`] otherwise. An empty ack decodes from `null`.
///
/// # Errors
///
/// Returns error if the server reported one or the data does not deserialize.
pub fn decode_ack<T: DeserializeOwned>(mut args: Vec<Value>) -> Result<T, MessageError> {
    let data = match args.len() {
        0 => Value::Null,
        1 => args.swap_remove(0),
        _ => {
            let data = args.swap_remove(1);
            let error = args.swap_remove(0);
            if !error.is_null() {
                return Err(MessageError::Remote(error_text(&error)));
            }
            data
        }
    };

    serde_json::from_value(data).map_err(|e| MessageError::Deserialize(e.to_string()))
}

/// Decode the reply to a bundle message.
///
/// A reply shaped `{ name: "Error", message }` is a remote error; anything
/// else is returned as the reply payload.
///
/// # Errors
///
/// Returns error if the bundle answered with an error.
pub fn decode_message_reply(args: Vec<Value>) -> Result<Option<Value>, MessageError> {
    let reply: Value = decode_ack(args)?;
    if reply.is_null() {
        return Ok(None);
    }
    if reply.get("name").and_then(Value::as_str) == Some("Error") {
        return Err(MessageError::Remote(error_text(&reply)));
    }
    Ok(Some(reply))
}

fn error_text(error: &Value) -> String {
    match error {
        Value::String(text) => text.clone(),
        Value::Object(map) => map
            .get("message")
            .and_then(Value::as_str)
            .map_or_else(|| error.to_string(), str::to_string),
        other => other.to_string(),
    }
}

/// Errors for message encoding and decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MessageError {
    /// Serialization failed
    #[error("serialization failed: {0}")]
    Serialize(String),
    /// Deserialization failed
    #[error("deserialization failed: {0}")]
    Deserialize(String),
    /// The server answered with an error
    #[error("remote error: {0}")]
    Remote(String),
}
