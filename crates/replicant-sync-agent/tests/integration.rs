use replicant_sync_adapter_socketio::{SocketIoConfig, SocketIoTransport};
use replicant_sync_client::{ConnectionConfig, ReplicantSession, SessionEvent, SessionOptions};
use replicant_sync_core::{BundleGate, SyncPhase, TopicRegistry};
use std::time::Duration;
use tokio::time::timeout;

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn declares_installed_bundles_topic() {
    if std::env::var("REPLICANT_SYNC_INTEGRATION").is_err() {
        eprintln!("Skipping integration test; set REPLICANT_SYNC_INTEGRATION=1 to run");
        return;
    }

    let host = std::env::var("REPLICANT_SYNC_HOST").unwrap_or_else(|_| "localhost".to_string());
    let port = std::env::var("REPLICANT_SYNC_PORT").unwrap_or_else(|_| "9090".to_string());
    let packages = BundleGate::default().packages_topic;

    let transport = SocketIoTransport::new(SocketIoConfig {
        ack_timeout: Duration::from_secs(5),
        ..SocketIoConfig::default()
    });
    let registry: TopicRegistry = std::iter::once(packages.clone()).collect();
    let mut session = ReplicantSession::new(transport, registry, SessionOptions::default());
    let mut events = session.subscribe();

    session.start(ConnectionConfig::new(host, port)).unwrap();

    timeout(Duration::from_secs(10), async {
        loop {
            match events.recv().await.unwrap() {
                SessionEvent::TopicUpdated(topic) if topic == packages => break,
                SessionEvent::Error(err) => panic!("session error: {err}"),
                _ => {}
            }
        }
    })
    .await
    .expect("packages topic was not synced");

    assert_eq!(session.phase(&packages), Some(SyncPhase::Synced));
    assert!(session.value(&packages).is_some_and(|value| value.is_array()));

    let fetched = session.fetch(&packages).await.unwrap();
    assert!(fetched.is_array());

    session.disconnect();
}
