//! Session tests against an in-memory transport.

use replicant_sync_client::{
    ConnectionConfig, DisconnectReason, Endpoint, ProposeOutcome, ReplicantSession,
    SessionEvent, SessionOptions, SyncError, Transport, TransportError, TransportEvent,
};
use replicant_sync_core::{
    BundleGate, GateStatus, Operation, PatchError, ReplicantState, StoreError, SyncPhase,
    TopicKey, TopicRegistry,
};
use replicant_sync_proto::MessageError;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, Notify};
use tokio::time::timeout;

#[derive(Default)]
struct State {
    sender: Option<mpsc::Sender<TransportEvent>>,
    connected: bool,
    opens: usize,
    closes: usize,
    reconnects: usize,
    requests: Vec<(String, Value)>,
    emitted: Vec<(String, Value)>,
    snapshots: HashMap<String, Value>,
    reads: HashMap<String, Value>,
    propose_ack: Vec<Value>,
    message_ack: Vec<Value>,
    read_gate: Option<Arc<Notify>>,
}

#[derive(Clone, Default)]
struct FakeTransport {
    state: Arc<Mutex<State>>,
}

impl FakeTransport {
    fn serve_snapshot(&self, namespace: &str, name: &str, value: Value, revision: u64) {
        self.state.lock().unwrap().snapshots.insert(
            format!("{namespace}/{name}"),
            json!({"value": value, "revision": revision, "schemaSum": "sum"}),
        );
    }

    fn serve_read(&self, namespace: &str, name: &str, value: Value) {
        self.state
            .lock()
            .unwrap()
            .reads
            .insert(format!("{namespace}/{name}"), value);
    }

    /// Hold the next read acknowledgement until the returned handle is notified.
    fn hold_next_read(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        self.state.lock().unwrap().read_gate = Some(Arc::clone(&gate));
        gate
    }

    fn answer_proposals(&self, ack: Vec<Value>) {
        self.state.lock().unwrap().propose_ack = ack;
    }

    fn answer_messages(&self, ack: Vec<Value>) {
        self.state.lock().unwrap().message_ack = ack;
    }

    fn requests(&self, event: &str) -> Vec<Value> {
        self.state
            .lock()
            .unwrap()
            .requests
            .iter()
            .filter(|(name, _)| name == event)
            .map(|(_, payload)| payload.clone())
            .collect()
    }

    async fn connect(&self) {
        self.state.lock().unwrap().connected = true;
        self.push(TransportEvent::Connected).await;
    }

    async fn push(&self, event: TransportEvent) {
        let sender = self
            .state
            .lock()
            .unwrap()
            .sender
            .clone()
            .expect("transport not opened");
        sender.send(event).await.unwrap();
    }

    async fn push_operations(&self, namespace: &str, name: &str, revision: u64, operations: Value) {
        self.push(TransportEvent::Message {
            event: "replicant:operations".to_string(),
            args: vec![json!({
                "name": name,
                "namespace": namespace,
                "revision": revision,
                "operations": operations,
            })],
        })
        .await;
    }

    async fn push_assignment(&self, namespace: &str, name: &str, value: Value) {
        self.push(TransportEvent::Message {
            event: "replicant:assignment".to_string(),
            args: vec![json!({"name": name, "namespace": namespace, "newValue": value})],
        })
        .await;
    }

    fn respond(&self, event: &str, payload: Value) -> Result<Vec<Value>, TransportError> {
        let mut state = self.state.lock().unwrap();
        state.requests.push((event.to_string(), payload.clone()));
        if !state.connected {
            return Err(TransportError::NotConnected);
        }

        let key = format!(
            "{}/{}",
            payload["namespace"].as_str().unwrap_or_default(),
            payload["name"].as_str().unwrap_or_default()
        );
        let missing = || vec![json!("no such replicant"), Value::Null];
        let ack = match event {
            "joinRoom" => vec![Value::Null],
            "replicant:declare" => state
                .snapshots
                .get(&key)
                .map_or_else(missing, |data| vec![Value::Null, data.clone()]),
            "replicant:read" => state
                .reads
                .get(&key)
                .map_or_else(missing, |data| vec![Value::Null, data.clone()]),
            "replicant:proposeOperations" => state.propose_ack.clone(),
            "message" => state.message_ack.clone(),
            other => panic!("unexpected request {other}"),
        };
        Ok(ack)
    }
}

impl Transport for FakeTransport {
    fn open(&self, _endpoint: &Endpoint) -> mpsc::Receiver<TransportEvent> {
        let (sender, receiver) = mpsc::channel(64);
        let mut state = self.state.lock().unwrap();
        state.opens += 1;
        state.sender = Some(sender);
        receiver
    }

    fn close(&self) {
        let mut state = self.state.lock().unwrap();
        state.closes += 1;
        state.connected = false;
        state.sender = None;
    }

    fn reconnect(&self) {
        self.state.lock().unwrap().reconnects += 1;
    }

    fn is_connected(&self) -> bool {
        self.state.lock().unwrap().connected
    }

    fn emit(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<(), TransportError>> + Send {
        self.state
            .lock()
            .unwrap()
            .emitted
            .push((event.to_string(), payload));
        async { Ok(()) }
    }

    fn request(
        &self,
        event: &'static str,
        payload: Value,
    ) -> impl Future<Output = Result<Vec<Value>, TransportError>> + Send {
        let gate = if event == "replicant:read" {
            self.state.lock().unwrap().read_gate.take()
        } else {
            None
        };
        let result = self.respond(event, payload);
        async move {
            if let Some(gate) = gate {
                gate.notified().await;
            }
            result
        }
    }
}

fn score() -> TopicKey {
    TopicKey::new("pkgA", "score")
}

fn config() -> ConnectionConfig {
    ConnectionConfig::new("localhost", "9090")
}

async fn wait_for<F>(events: &mut broadcast::Receiver<SessionEvent>, mut predicate: F) -> SessionEvent
where
    F: FnMut(&SessionEvent) -> bool,
{
    timeout(Duration::from_secs(2), async {
        loop {
            let event = events.recv().await.expect("event channel closed");
            if predicate(&event) {
                return event;
            }
        }
    })
    .await
    .expect("timed out waiting for session event")
}

async fn wait_updated(events: &mut broadcast::Receiver<SessionEvent>, topic: &TopicKey) {
    wait_for(events, |event| *event == SessionEvent::TopicUpdated(topic.clone())).await;
}

/// Start a session on pkgA/score and wait until it is synced at `revision`.
async fn synced_session(
    fake: &FakeTransport,
    value: Value,
    revision: u64,
) -> (
    ReplicantSession<FakeTransport>,
    broadcast::Receiver<SessionEvent>,
) {
    fake.serve_snapshot("pkgA", "score", value, revision);
    let registry = TopicRegistry::new().with_namespace("pkgA", ["score"]);
    let mut session = ReplicantSession::new(fake.clone(), registry, SessionOptions::default());
    let mut events = session.subscribe();

    session.start(config()).unwrap();
    fake.connect().await;
    wait_updated(&mut events, &score()).await;

    (session, events)
}

#[tokio::test]
async fn declares_applies_batches_and_repairs_gaps() {
    let fake = FakeTransport::default();
    let (session, mut events) = synced_session(&fake, json!({"a": 0, "b": 0}), 5).await;

    assert!(session.is_connected());
    assert_eq!(session.phase(&score()), Some(SyncPhase::Synced));
    assert_eq!(session.revision(&score()), Some(5));
    assert_eq!(fake.requests("joinRoom"), vec![json!("replicant:pkgA")]);
    assert_eq!(
        fake.requests("replicant:declare")[0]["opts"]["opts"]["schemaPath"],
        json!("bundles/pkgA/schemas/score.json")
    );

    fake.push_operations(
        "pkgA",
        "score",
        6,
        json!([{"path": "/", "method": "update", "args": {"prop": "a", "newValue": 1}}]),
    )
    .await;
    wait_updated(&mut events, &score()).await;
    assert_eq!(session.value(&score()), Some(json!({"a": 1, "b": 0})));
    assert_eq!(session.revision(&score()), Some(6));

    fake.serve_read("pkgA", "score", json!({"a": 3, "b": 2}));
    fake.push_operations(
        "pkgA",
        "score",
        9,
        json!([{"path": "/", "method": "update", "args": {"prop": "b", "newValue": 2}}]),
    )
    .await;
    wait_updated(&mut events, &score()).await;

    assert_eq!(session.value(&score()), Some(json!({"a": 3, "b": 2})));
    assert_eq!(session.revision(&score()), Some(9));
    assert_eq!(fake.requests("replicant:read").len(), 1);
}

#[tokio::test]
async fn updates_during_full_read_trigger_another_read() {
    let fake = FakeTransport::default();
    let (session, mut events) = synced_session(&fake, json!({"a": 0, "b": 0}), 5).await;

    let gate = fake.hold_next_read();
    fake.serve_read("pkgA", "score", json!({"a": 1, "b": 0}));
    fake.push_operations(
        "pkgA",
        "score",
        9,
        json!([{"path": "/", "method": "update", "args": {"prop": "a", "newValue": 1}}]),
    )
    .await;
    timeout(Duration::from_secs(2), async {
        while fake.requests("replicant:read").is_empty() {
            tokio::task::yield_now().await;
        }
    })
    .await
    .expect("no full read requested");

    fake.serve_read("pkgA", "score", json!({"a": 1, "b": 4}));
    fake.push_operations(
        "pkgA",
        "score",
        10,
        json!([{"path": "/", "method": "update", "args": {"prop": "b", "newValue": 4}}]),
    )
    .await;
    // Inbound events are handled in order; once this one surfaces the
    // batch above has been seen.
    fake.push(TransportEvent::Error("marker".to_string())).await;
    wait_for(&mut events, |event| matches!(event, SessionEvent::Error(_))).await;
    assert_eq!(session.revision(&score()), Some(5));

    gate.notify_one();
    wait_updated(&mut events, &score()).await;

    assert_eq!(fake.requests("replicant:read").len(), 2);
    assert_eq!(session.value(&score()), Some(json!({"a": 1, "b": 4})));
    assert_eq!(session.revision(&score()), Some(10));
}

#[tokio::test]
async fn start_rejects_incomplete_config() {
    let fake = FakeTransport::default();
    let mut session = ReplicantSession::new(
        fake.clone(),
        TopicRegistry::new().with_namespace("pkgA", ["score"]),
        SessionOptions::default(),
    );

    let err = session
        .start(ConnectionConfig::new("", "9090"))
        .unwrap_err();

    assert!(matches!(err, SyncError::Config(_)));
    assert_eq!(fake.state.lock().unwrap().opens, 0);
    assert!(!session.is_connected());
}

#[tokio::test]
async fn calls_before_start_are_refused() {
    let fake = FakeTransport::default();
    let session = ReplicantSession::new(
        fake,
        TopicRegistry::new().with_namespace("pkgA", ["score"]),
        SessionOptions::default(),
    );

    let err = tokio_test::assert_err!(session.propose_assignment(&score(), json!(1)).await);
    assert_eq!(err, SyncError::NotConnected);

    let unknown = TopicKey::new("pkgA", "nope");
    let err = tokio_test::assert_err!(session.fetch(&unknown).await);
    assert_eq!(err, SyncError::UnknownTopic(unknown.clone()));
    assert!(session.read(&unknown).is_err());
    assert_eq!(session.read(&score()).unwrap(), ReplicantState::NotYetSynced);
}

#[tokio::test]
async fn rejected_proposal_leaves_mirror_unchanged() {
    let fake = FakeTransport::default();
    let (session, _events) = synced_session(&fake, json!({"a": 0}), 5).await;
    fake.answer_proposals(vec![json!({"rejectReason": "stale revision"})]);

    let outcome = tokio_test::assert_ok!(
        session
            .propose_operations(&score(), vec![Operation::update("/", "a", json!(7))])
            .await
    );

    assert_eq!(
        outcome,
        ProposeOutcome::Rejected {
            reason: "stale revision".to_string()
        }
    );
    assert_eq!(session.value(&score()), Some(json!({"a": 0})));
    assert_eq!(session.revision(&score()), Some(5));

    let proposal = &fake.requests("replicant:proposeOperations")[0];
    assert_eq!(proposal["revision"], json!(5));
    assert_eq!(proposal["schemaSum"], json!("sum"));
}

#[tokio::test]
async fn accepted_proposal_adopts_confirmed_state() {
    let fake = FakeTransport::default();
    let (session, _events) = synced_session(&fake, json!({"a": 0}), 5).await;
    fake.answer_proposals(vec![Value::Null, json!({"value": {"a": 7}, "revision": 6})]);

    let outcome =
        tokio_test::assert_ok!(session.propose_assignment(&score(), json!({"a": 7})).await);

    assert_eq!(outcome, ProposeOutcome::Accepted { revision: 6 });
    assert_eq!(session.value(&score()), Some(json!({"a": 7})));

    let proposal = &fake.requests("replicant:proposeOperations")[0];
    assert_eq!(
        proposal["operations"],
        json!([{"path": "/", "method": "overwrite", "args": {"newValue": {"a": 7}}}])
    );
}

#[tokio::test]
async fn fetch_replaces_value_at_held_revision() {
    let fake = FakeTransport::default();
    let (session, _events) = synced_session(&fake, json!([1]), 3).await;
    fake.serve_read("pkgA", "score", json!([1, 2]));

    let value = tokio_test::assert_ok!(session.fetch(&score()).await);

    assert_eq!(value, json!([1, 2]));
    assert_eq!(session.value(&score()), Some(json!([1, 2])));
    assert_eq!(session.revision(&score()), Some(3));
}

#[tokio::test]
async fn unsupported_operation_is_reported_and_not_applied() {
    let fake = FakeTransport::default();
    let (session, mut events) = synced_session(&fake, json!({"a": 0}), 1).await;

    fake.push_operations(
        "pkgA",
        "score",
        2,
        json!([{"path": "/", "method": "explode", "args": {}}]),
    )
    .await;

    let event = wait_for(&mut events, |event| matches!(event, SessionEvent::Error(_))).await;
    assert!(matches!(
        event,
        SessionEvent::Error(SyncError::Store(StoreError::Patch {
            source: PatchError::UnsupportedOperation(_),
            ..
        }))
    ));
    assert_eq!(session.value(&score()), Some(json!({"a": 0})));
    assert_eq!(session.revision(&score()), Some(1));
    assert!(fake.requests("replicant:read").is_empty());
}

#[tokio::test]
async fn assignment_replaces_value_and_keeps_revision() {
    let fake = FakeTransport::default();
    let (session, mut events) = synced_session(&fake, json!({"a": 0}), 4).await;

    fake.push_assignment("pkgA", "score", json!({"a": 9})).await;
    fake.push_assignment("pkgZ", "other", json!(true)).await;
    wait_updated(&mut events, &score()).await;

    assert_eq!(session.value(&score()), Some(json!({"a": 9})));
    assert_eq!(session.revision(&score()), Some(4));
}

#[tokio::test]
async fn failed_declaration_does_not_affect_other_topics() {
    let fake = FakeTransport::default();
    fake.serve_snapshot("pkgA", "score", json!(1), 1);
    let missing = TopicKey::new("pkgA", "missing");
    let registry = TopicRegistry::new().with_namespace("pkgA", ["score", "missing"]);
    let mut session = ReplicantSession::new(fake.clone(), registry, SessionOptions::default());
    let mut events = session.subscribe();

    session.start(config()).unwrap();
    fake.connect().await;

    let event = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::Error(SyncError::Declaration { .. }))
    })
    .await;
    let SessionEvent::Error(SyncError::Declaration { topic, reason }) = event else {
        unreachable!();
    };
    assert_eq!(topic, missing);
    assert!(reason.contains("no such replicant"));

    timeout(Duration::from_secs(2), async {
        while session.phase(&score()) != Some(SyncPhase::Synced) {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();
    assert_eq!(session.phase(&missing), Some(SyncPhase::Failed));
    assert_eq!(session.value(&score()), Some(json!(1)));
}

#[tokio::test]
async fn server_disconnect_reconnects_and_redeclares() {
    let fake = FakeTransport::default();
    let (session, mut events) = synced_session(&fake, json!({"a": 0}), 5).await;

    fake.push(TransportEvent::Disconnected(DisconnectReason::ServerInitiated))
        .await;
    wait_for(&mut events, |event| {
        matches!(event, SessionEvent::Disconnected { .. })
    })
    .await;
    assert_eq!(fake.state.lock().unwrap().reconnects, 1);
    assert!(!session.is_connected());

    fake.serve_snapshot("pkgA", "score", json!({"a": 4}), 12);
    fake.connect().await;
    wait_updated(&mut events, &score()).await;

    assert_eq!(session.value(&score()), Some(json!({"a": 4})));
    assert_eq!(session.revision(&score()), Some(12));
    assert_eq!(fake.requests("replicant:declare").len(), 2);
}

#[tokio::test]
async fn gating_waits_for_installed_bundles() {
    let fake = FakeTransport::default();
    fake.serve_snapshot(
        "nodecg",
        "bundles",
        json!([{"name": "pkgA", "version": "1.0.0"}]),
        1,
    );
    fake.serve_snapshot("pkgA", "score", json!(1), 1);
    fake.serve_snapshot("pkgB", "teams", json!([]), 1);
    let teams = TopicKey::new("pkgB", "teams");
    let registry = TopicRegistry::new()
        .with_namespace("pkgA", ["score"])
        .with_namespace("pkgB", ["teams"]);
    let options = SessionOptions::default().with_gate(BundleGate::default());
    let mut session = ReplicantSession::new(fake.clone(), registry, options);
    let mut events = session.subscribe();

    session.start(config()).unwrap();
    fake.connect().await;

    wait_for(&mut events, |event| {
        *event == SessionEvent::TopicUnavailable(teams.clone())
    })
    .await;
    wait_updated(&mut events, &score()).await;
    assert_eq!(session.phase(&teams), Some(SyncPhase::Unavailable));
    assert_eq!(session.value(&teams), None);
    assert_eq!(session.bundle_status("pkgB"), Some(GateStatus::Missing));
    assert!(fake
        .requests("replicant:declare")
        .iter()
        .all(|payload| payload["namespace"] != json!("pkgB")));

    fake.push_assignment(
        "nodecg",
        "bundles",
        json!([
            {"name": "pkgA", "version": "1.0.0"},
            {"name": "pkgB", "version": "2.0.0"}
        ]),
    )
    .await;
    wait_updated(&mut events, &teams).await;

    assert_eq!(session.phase(&teams), Some(SyncPhase::Synced));
    assert_eq!(session.bundle_status("pkgB"), Some(GateStatus::Available));
}

#[tokio::test]
async fn removed_bundle_clears_synced_topic() {
    let fake = FakeTransport::default();
    fake.serve_snapshot(
        "nodecg",
        "bundles",
        json!([{"name": "pkgA", "version": "1.0.0"}]),
        1,
    );
    fake.serve_snapshot("pkgA", "score", json!({"a": 1}), 3);
    let registry = TopicRegistry::new().with_namespace("pkgA", ["score"]);
    let options = SessionOptions::default().with_gate(BundleGate::default());
    let mut session = ReplicantSession::new(fake.clone(), registry, options);
    let mut events = session.subscribe();

    session.start(config()).unwrap();
    fake.connect().await;
    wait_updated(&mut events, &score()).await;
    assert_eq!(session.phase(&score()), Some(SyncPhase::Synced));

    fake.push_assignment("nodecg", "bundles", json!([])).await;
    wait_for(&mut events, |event| {
        *event == SessionEvent::TopicUnavailable(score())
    })
    .await;

    assert_eq!(session.value(&score()), None);
    assert_eq!(session.phase(&score()), Some(SyncPhase::Unavailable));
    assert_eq!(session.bundle_status("pkgA"), Some(GateStatus::Missing));
    assert_eq!(session.read(&score()).unwrap(), ReplicantState::NotYetSynced);
}

#[tokio::test]
async fn incompatible_bundle_is_reported_but_declared() {
    let fake = FakeTransport::default();
    fake.serve_snapshot(
        "nodecg",
        "bundles",
        json!([{"name": "pkgA", "version": "4.7.2"}]),
        1,
    );
    fake.serve_snapshot("pkgA", "score", json!(1), 1);
    let gate = BundleGate::default().require("pkgA", ">=4.8.0").unwrap();
    let mut session = ReplicantSession::new(
        fake.clone(),
        TopicRegistry::new().with_namespace("pkgA", ["score"]),
        SessionOptions::default().with_gate(gate),
    );
    let mut events = session.subscribe();

    session.start(config()).unwrap();
    fake.connect().await;

    let event = wait_for(&mut events, |event| {
        matches!(event, SessionEvent::BundleIncompatible { .. })
    })
    .await;
    assert_eq!(
        event,
        SessionEvent::BundleIncompatible {
            namespace: "pkgA".to_string(),
            installed: "4.7.2".to_string(),
            required: ">=4.8.0".to_string(),
        }
    );
    wait_updated(&mut events, &score()).await;
    assert_eq!(session.phase(&score()), Some(SyncPhase::Synced));
}

#[tokio::test]
async fn bundle_messages() {
    let fake = FakeTransport::default();
    let (session, _events) = synced_session(&fake, json!(null), 1).await;

    fake.answer_messages(vec![json!({"name": "Error", "message": "no round"})]);
    let err = tokio_test::assert_err!(
        session
            .send_message("pkgA", "startRound", json!({"id": 1}))
            .await
    );
    assert_eq!(
        err,
        SyncError::Protocol(MessageError::Remote("no round".to_string()))
    );

    fake.answer_messages(vec![Value::Null, json!({"ok": true})]);
    let reply = tokio_test::assert_ok!(session.send_message("pkgA", "startRound", json!(1)).await);
    assert_eq!(reply, Some(json!({"ok": true})));

    tokio_test::assert_ok!(session.notify("pkgA", "ping", json!(null)).await);
    let emitted = fake.state.lock().unwrap().emitted.clone();
    assert_eq!(
        emitted,
        vec![(
            "message".to_string(),
            json!({"bundleName": "pkgA", "messageName": "ping", "content": null})
        )]
    );
}

#[tokio::test]
async fn disconnect_is_idempotent() {
    let fake = FakeTransport::default();
    let (mut session, mut events) = synced_session(&fake, json!(1), 1).await;

    session.disconnect();
    session.disconnect();

    assert!(!session.is_connected());
    assert!(fake.state.lock().unwrap().closes >= 2);
    assert_eq!(
        wait_for(&mut events, |event| matches!(event, SessionEvent::Disconnected { .. })).await,
        SessionEvent::Disconnected {
            reason: DisconnectReason::ClientInitiated
        }
    );
    let err = tokio_test::assert_err!(session.fetch(&score()).await);
    assert_eq!(err, SyncError::NotConnected);
    // The mirror stays readable.
    assert_eq!(session.value(&score()), Some(json!(1)));
}
