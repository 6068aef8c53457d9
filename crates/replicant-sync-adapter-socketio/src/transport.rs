//! Socket.IO client transport.

use futures_util::FutureExt;
use replicant_sync_client::{DisconnectReason, Endpoint, Transport, TransportError, TransportEvent};
use replicant_sync_proto::EventKind;
use rust_socketio::asynchronous::{Client, ClientBuilder};
use rust_socketio::{Payload, TransportType};
use serde_json::Value;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;

/// Configuration for the Socket.IO transport.
#[derive(Debug, Clone)]
pub struct SocketIoConfig {
    /// How long to wait for a request acknowledgement
    pub ack_timeout: Duration,
    /// Let the client reconnect after a dropped connection
    pub reconnect: bool,
    /// Let the client also reconnect after a server-initiated disconnect.
    /// Off by default: the session asks for that reconnect explicitly.
    pub reconnect_on_disconnect: bool,
    /// Delay between attempts while the first connection fails
    pub retry_delay: Duration,
    /// Capacity of the transport event channel
    pub event_capacity: usize,
}

impl Default for SocketIoConfig {
    fn default() -> Self {
        Self {
            ack_timeout: Duration::from_secs(30),
            reconnect: true,
            reconnect_on_disconnect: false,
            retry_delay: Duration::from_secs(5),
            event_capacity: 256,
        }
    }
}

#[derive(Default)]
struct Inner {
    client: Mutex<Option<Client>>,
    events: Mutex<Option<mpsc::Sender<TransportEvent>>>,
    endpoint: Mutex<Option<Endpoint>>,
    connector: Mutex<Option<JoinHandle<()>>>,
    connected: AtomicBool,
}

/// Socket.IO transport.
#[derive(Clone)]
pub struct SocketIoTransport {
    config: SocketIoConfig,
    inner: Arc<Inner>,
}

impl SocketIoTransport {
    /// Create a transport; nothing connects until [`Transport::open`].
    #[must_use]
    pub fn new(config: SocketIoConfig) -> Self {
        Self {
            config,
            inner: Arc::new(Inner::default()),
        }
    }

    fn client(&self) -> Option<Client> {
        lock(&self.inner.client).clone()
    }

    /// Spawn the connect loop for the stored endpoint.
    fn spawn_connector(&self) {
        let endpoint = lock(&self.inner.endpoint).clone();
        let events = lock(&self.inner.events).clone();
        let (Some(endpoint), Some(events)) = (endpoint, events) else {
            return;
        };

        let transport = self.clone();
        let task = tokio::spawn(async move {
            let url = format!("http://{}:{}/", endpoint.host, endpoint.port);
            loop {
                let error = match transport.builder(&url, &events).connect().await {
                    Ok(client) => {
                        tracing::info!(endpoint = %endpoint, "Socket.IO client connected");
                        *lock(&transport.inner.client) = Some(client);
                        break;
                    }
                    Err(e) => e.to_string(),
                };

                tracing::warn!(endpoint = %endpoint, error = %error, "Socket.IO connection failed");
                if events.send(TransportEvent::Error(error)).await.is_err() {
                    break;
                }
                tokio::time::sleep(transport.config.retry_delay).await;
            }
        });

        if let Some(previous) = lock(&self.inner.connector).replace(task) {
            previous.abort();
        }
    }

    fn builder(&self, url: &str, events: &mpsc::Sender<TransportEvent>) -> ClientBuilder {
        let mut builder = ClientBuilder::new(url)
            .transport_type(TransportType::Websocket)
            .reconnect(self.config.reconnect)
            .reconnect_on_disconnect(self.config.reconnect_on_disconnect);

        let (tx, inner) = (events.clone(), Arc::clone(&self.inner));
        builder = builder.on("open", move |_payload: Payload, _client: Client| {
            inner.connected.store(true, Ordering::Release);
            let tx = tx.clone();
            async move {
                let _ = tx.send(TransportEvent::Connected).await;
            }
            .boxed()
        });

        let (tx, inner) = (events.clone(), Arc::clone(&self.inner));
        builder = builder.on("close", move |payload: Payload, _client: Client| {
            // Cleared already when the close came from our own disconnect.
            let was_connected = inner.connected.swap(false, Ordering::AcqRel);
            let reason = close_reason(&payload_args(payload));
            let tx = tx.clone();
            async move {
                if was_connected {
                    let _ = tx.send(TransportEvent::Disconnected(reason)).await;
                }
            }
            .boxed()
        });

        let tx = events.clone();
        builder = builder.on("error", move |payload: Payload, _client: Client| {
            let message = payload_args(payload)
                .first()
                .map_or_else(String::new, |value| {
                    value.as_str().map_or_else(|| value.to_string(), str::to_string)
                });
            let tx = tx.clone();
            async move {
                let _ = tx.send(TransportEvent::Error(message)).await;
            }
            .boxed()
        });

        for kind in EventKind::ALL {
            let tx = events.clone();
            builder = builder.on(kind.as_str(), move |payload: Payload, _client: Client| {
                let message = TransportEvent::Message {
                    event: kind.as_str().to_string(),
                    args: payload_args(payload),
                };
                let tx = tx.clone();
                async move {
                    if tx.send(message).await.is_err() {
                        tracing::debug!("Transport event receiver dropped");
                    }
                }
                .boxed()
            });
        }

        builder
    }

    fn take_client(&self) {
        self.inner.connected.store(false, Ordering::Release);
        let Some(client) = lock(&self.inner.client).take() else {
            return;
        };
        // close() may run outside a runtime, e.g. while dropping a session.
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            handle.spawn(async move {
                if let Err(e) = client.disconnect().await {
                    tracing::debug!(error = %e, "Socket.IO disconnect failed");
                }
            });
        }
    }
}

impl Transport for SocketIoTransport {
    fn open(&self, endpoint: &Endpoint) -> mpsc::Receiver<TransportEvent> {
        self.close();

        let (tx, rx) = mpsc::channel(self.config.event_capacity.max(1));
        *lock(&self.inner.endpoint) = Some(endpoint.clone());
        *lock(&self.inner.events) = Some(tx);

        tracing::info!(endpoint = %endpoint, "Opening Socket.IO connection");
        self.spawn_connector();
        rx
    }

    fn close(&self) {
        if let Some(connector) = lock(&self.inner.connector).take() {
            connector.abort();
        }
        lock(&self.inner.events).take();
        self.take_client();
    }

    fn reconnect(&self) {
        if self.config.reconnect_on_disconnect {
            tracing::debug!("Socket.IO client reconnects on its own");
            return;
        }
        tracing::info!("Reconnecting Socket.IO client");
        self.take_client();
        self.spawn_connector();
    }

    fn is_connected(&self) -> bool {
        self.inner.connected.load(Ordering::Acquire)
    }

    fn emit(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        let client = self.client();
        async move {
            let client = client.ok_or(TransportError::NotConnected)?;
            client
                .emit(event, Payload::Text(vec![payload]))
                .await
                .map_err(|e| TransportError::Emit(e.to_string()))
        }
    }

    fn request(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send {
        let client = self.client();
        let ack_timeout = self.config.ack_timeout;
        async move {
            let client = client.ok_or(TransportError::NotConnected)?;

            let (tx, rx) = oneshot::channel();
            let slot = Arc::new(Mutex::new(Some(tx)));
            let callback = move |payload: Payload, _client: Client| {
                if let Some(tx) = lock(&slot).take() {
                    let _ = tx.send(payload_args(payload));
                }
                async {}.boxed()
            };

            client
                .emit_with_ack(event, Payload::Text(vec![payload]), ack_timeout, callback)
                .await
                .map_err(|e| TransportError::Emit(e.to_string()))?;

            match tokio::time::timeout(ack_timeout, rx).await {
                Ok(Ok(args)) => Ok(args),
                Ok(Err(_)) | Err(_) => {
                    tracing::warn!(event, "No acknowledgement received");
                    Err(TransportError::Timeout(event.to_string()))
                }
            }
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// The async client fires `close` with an empty payload when the server
/// sends a disconnect packet.
fn close_reason(args: &[Value]) -> DisconnectReason {
    match args.first().and_then(Value::as_str) {
        None | Some("") => DisconnectReason::ServerInitiated,
        Some(reason) => DisconnectReason::from_reason(reason),
    }
}

/// Flatten a Socket.IO payload into event arguments.
#[allow(deprecated)]
fn payload_args(payload: Payload) -> Vec<Value> {
    match payload {
        Payload::Text(values) => values,
        Payload::String(text) => {
            vec![serde_json::from_str::<Value>(&text).unwrap_or(Value::String(text))]
        }
        Payload::Binary(bytes) => vec![Value::Array(
            bytes.iter().map(|byte| Value::from(*byte)).collect(),
        )],
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn text_payload_is_passed_through() {
        let args = payload_args(Payload::Text(vec![Value::Null, json!({"revision": 3})]));
        assert_eq!(args, vec![Value::Null, json!({"revision": 3})]);
    }

    #[test]
    #[allow(deprecated)]
    fn string_payload_is_parsed_when_possible() {
        assert_eq!(
            payload_args(Payload::String("{\"a\":1}".to_string())),
            vec![json!({"a": 1})]
        );
        assert_eq!(
            payload_args(Payload::String("plain".to_string())),
            vec![json!("plain")]
        );
    }

    #[test]
    fn empty_close_payload_is_a_server_disconnect() {
        assert_eq!(
            close_reason(&payload_args(Payload::from(""))),
            DisconnectReason::ServerInitiated
        );
        assert_eq!(close_reason(&[]), DisconnectReason::ServerInitiated);
        assert_eq!(
            close_reason(&[json!("ping timeout")]),
            DisconnectReason::TransportClosed
        );
    }

    #[test]
    fn default_config() {
        let config = SocketIoConfig::default();
        assert_eq!(config.ack_timeout, Duration::from_secs(30));
        assert!(config.reconnect);
        assert!(!config.reconnect_on_disconnect);
    }

    #[tokio::test]
    async fn requests_without_connection_fail() {
        let transport = SocketIoTransport::new(SocketIoConfig::default());
        transport.close();

        assert!(!transport.is_connected());
        let err = tokio_test::assert_err!(transport.request("replicant:read", json!({})).await);
        assert_eq!(err, TransportError::NotConnected);
        let err = tokio_test::assert_err!(transport.emit("message", json!({})).await);
        assert_eq!(err, TransportError::NotConnected);
    }
}
