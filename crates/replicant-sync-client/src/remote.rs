//! Typed replicant requests over a [`Transport`].

use crate::error::SyncError;
use crate::transport::Transport;
use replicant_sync_core::{ReplicantMetadata, Snapshot, TopicKey};
use replicant_sync_proto::{
    decode_ack, decode_message_reply, encode, events, DeclareRequest, DeclareResponse,
    MessageRequest, ProposeOperationsRequest, ProposeResponse, ReadRequest,
};
use serde_json::Value;

/// Join the room of `namespace`.
///
/// # Errors
///
/// Returns error if the request fails or the server refuses it.
pub async fn join<T: Transport>(transport: &T, namespace: &str) -> Result<(), SyncError> {
    let ack = transport
        .request(
            events::JOIN_ROOM,
            Value::String(replicant_sync_proto::room_name(namespace)),
        )
        .await?;
    let _: Value = decode_ack(ack)?;
    Ok(())
}

/// Declare `key` and fetch its snapshot.
///
/// # Errors
///
/// Returns error if the request fails or the ack is not a snapshot.
pub async fn declare<T: Transport>(
    transport: &T,
    key: &TopicKey,
    metadata: ReplicantMetadata,
) -> Result<Snapshot, SyncError> {
    let payload = encode(&DeclareRequest::new(key, metadata))?;
    let ack = transport.request(events::DECLARE, payload).await?;
    let response: DeclareResponse = decode_ack(ack)?;
    Ok(response.into())
}

/// Read the full value of `key`.
///
/// # Errors
///
/// Returns error if the request fails or the server reports one.
pub async fn read<T: Transport>(transport: &T, key: &TopicKey) -> Result<Value, SyncError> {
    let payload = encode(&ReadRequest::new(key))?;
    let ack = transport.request(events::READ, payload).await?;
    Ok(decode_ack(ack)?)
}

/// Propose an operation batch.
///
/// # Errors
///
/// Returns error if the request fails or the ack is malformed. A rejection is
/// not an error; it is reported in the response.
pub async fn propose_operations<T: Transport>(
    transport: &T,
    request: &ProposeOperationsRequest,
) -> Result<ProposeResponse, SyncError> {
    let payload = encode(request)?;
    let ack = transport.request(events::PROPOSE_OPERATIONS, payload).await?;
    Ok(ProposeResponse::from_ack(ack)?)
}

/// Send a message to a bundle and wait for its reply.
///
/// # Errors
///
/// Returns error if the request fails or the bundle answers with an error.
pub async fn send_message<T: Transport>(
    transport: &T,
    message: &MessageRequest,
) -> Result<Option<Value>, SyncError> {
    let payload = encode(message)?;
    let ack = transport.request(events::MESSAGE, payload).await?;
    Ok(decode_message_reply(ack)?)
}

/// Send a message to a bundle without waiting for a reply.
///
/// # Errors
///
/// Returns error if the message could not be sent.
pub async fn notify<T: Transport>(transport: &T, message: &MessageRequest) -> Result<(), SyncError> {
    let payload = encode(message)?;
    transport.emit(events::MESSAGE, payload).await?;
    Ok(())
}
