//! End-to-end engine scenarios against in-process fakes.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::mpsc;

use pocket_core::types::{ActionKind, ChangeEvent, ChannelStatus, ConnectionState};
use pocket_store::{Store, StoreConfig};
use pocket_sync::{
    connectivity_channel, ChannelEvents, ChannelTransport, DrainSkipped, OfflineActionQueue,
    RemoteError, RemoteResult, RemoteStore, SubscriptionManager, SyncAgent, SyncConfig,
};

// =============================================================================
// Fakes
// =============================================================================

/// Scripted remote: records every call, optionally failing or conflicting.
#[derive(Default)]
struct FakeRemote {
    /// Call log: (operation, target, record key).
    calls: Mutex<Vec<(String, String, String)>>,
    /// Transient failures remaining per record key.
    transient_failures: Mutex<HashMap<String, u32>>,
    /// One-shot conflict payloads per record key.
    conflicts: Mutex<HashMap<String, Value>>,
    /// Record keys the remote rejects permanently.
    rejected: Mutex<Vec<String>>,
    /// Artificial latency per call.
    latency: Option<Duration>,
}

impl FakeRemote {
    fn new() -> Self {
        Self::default()
    }

    fn fail_transiently(&self, key: &str, times: u32) {
        self.transient_failures
            .lock()
            .unwrap()
            .insert(key.to_string(), times);
    }

    fn conflict_once(&self, key: &str, remote_payload: Value) {
        self.conflicts
            .lock()
            .unwrap()
            .insert(key.to_string(), remote_payload);
    }

    fn reject(&self, key: &str) {
        self.rejected.lock().unwrap().push(key.to_string());
    }

    fn call_log(&self) -> Vec<(String, String, String)> {
        self.calls.lock().unwrap().clone()
    }

    async fn apply(&self, op: &str, target: &str, key: &str) -> RemoteResult<()> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.calls
            .lock()
            .unwrap()
            .push((op.to_string(), target.to_string(), key.to_string()));

        if self.rejected.lock().unwrap().iter().any(|k| k == key) {
            return Err(RemoteError::Permanent("rejected by schema".into()));
        }

        {
            let mut failures = self.transient_failures.lock().unwrap();
            if let Some(remaining) = failures.get_mut(key) {
                if *remaining > 0 {
                    *remaining -= 1;
                    return Err(RemoteError::Transient("503 service unavailable".into()));
                }
            }
        }

        if let Some(remote) = self.conflicts.lock().unwrap().remove(key) {
            return Err(RemoteError::Conflict { remote });
        }

        Ok(())
    }
}

#[async_trait]
impl RemoteStore for FakeRemote {
    async fn insert(&self, target: &str, payload: &Value) -> RemoteResult<()> {
        let key = payload.get("id").and_then(Value::as_str).unwrap_or("");
        self.apply("insert", target, key).await
    }

    async fn update(&self, target: &str, key: &str, _payload: &Value) -> RemoteResult<()> {
        self.apply("update", target, key).await
    }

    async fn delete(&self, target: &str, key: &str) -> RemoteResult<()> {
        self.apply("delete", target, key).await
    }
}

/// Scripted channel transport: fails the first N opens, then hands out
/// event feeds backed by senders the test controls.
struct FakeTransport {
    fail_opens: AtomicU32,
    opens: AtomicU32,
    senders: Mutex<HashMap<String, mpsc::Sender<ChangeEvent>>>,
}

impl FakeTransport {
    fn new(fail_opens: u32) -> Self {
        FakeTransport {
            fail_opens: AtomicU32::new(fail_opens),
            opens: AtomicU32::new(0),
            senders: Mutex::new(HashMap::new()),
        }
    }

    fn open_count(&self) -> u32 {
        self.opens.load(Ordering::SeqCst)
    }

    fn sender_for(&self, channel_id: &str) -> mpsc::Sender<ChangeEvent> {
        self.senders
            .lock()
            .unwrap()
            .get(channel_id)
            .expect("channel opened")
            .clone()
    }

    /// Simulates the feed dropping by forgetting the sender.
    fn drop_feed(&self, channel_id: &str) {
        self.senders.lock().unwrap().remove(channel_id);
    }
}

#[async_trait]
impl ChannelTransport for FakeTransport {
    async fn open(
        &self,
        channel_id: &str,
        _target: &str,
        _filter: Option<&str>,
    ) -> RemoteResult<ChannelEvents> {
        self.opens.fetch_add(1, Ordering::SeqCst);
        let remaining = self.fail_opens.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_opens.store(remaining - 1, Ordering::SeqCst);
            return Err(RemoteError::Transient("connection refused".into()));
        }

        let (tx, rx) = mpsc::channel(64);
        self.senders
            .lock()
            .unwrap()
            .insert(channel_id.to_string(), tx);
        Ok(ChannelEvents { receiver: rx })
    }
}

fn event(channel_id: &str, n: u64) -> ChangeEvent {
    ChangeEvent {
        channel_id: channel_id.to_string(),
        target: "notes".to_string(),
        payload: json!({"seq": n}),
        received_at: chrono::Utc::now(),
    }
}

// =============================================================================
// Queue Scenario Helpers
// =============================================================================

/// Routes engine tracing into the test harness when `RUST_LOG` asks for it.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

fn test_config() -> SyncConfig {
    init_tracing();
    let mut config = SyncConfig::default();
    // Keep retry scheduling in the single-digit-millisecond range so the
    // tests can wait it out on the wall clock.
    config.queue.retry_base_delay_ms = 1;
    config.queue.max_retry_delay_ms = 2;
    config
}

async fn queue_with(
    remote: Arc<FakeRemote>,
    config: SyncConfig,
    reachable: bool,
) -> Arc<OfflineActionQueue> {
    let store = Store::open(StoreConfig::in_memory()).await.unwrap();
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(reachable);
    Arc::new(OfflineActionQueue::new(
        store,
        remote,
        Arc::new(config),
        rx,
    ))
}

async fn drain_until_idle(queue: &OfflineActionQueue) {
    // Retry-scheduled actions become eligible within a few milliseconds
    // under the test config; keep draining until the queue settles.
    for _ in 0..200 {
        queue.process_queue().await.unwrap();
        if queue.pending_count().await.unwrap() == 0 {
            return;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("queue never settled");
}

// =============================================================================
// Queue Scenarios
// =============================================================================

#[tokio::test]
async fn drains_in_creation_order() {
    let remote = Arc::new(FakeRemote::new());
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    for key in ["a", "b", "c"] {
        queue
            .enqueue(ActionKind::Insert, "notes", json!({"id": key}), None, "u1")
            .await
            .unwrap();
    }

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.completed, 3);
    assert!(summary.is_clean());
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    let keys: Vec<String> = remote.call_log().into_iter().map(|(_, _, k)| k).collect();
    assert_eq!(keys, ["a", "b", "c"]);
}

#[tokio::test]
async fn offline_drain_is_a_no_op() {
    let remote = Arc::new(FakeRemote::new());
    let queue = queue_with(Arc::clone(&remote), test_config(), false).await;

    queue
        .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.skipped, Some(DrainSkipped::Offline));
    assert!(remote.call_log().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 1);
}

#[tokio::test]
async fn concurrent_drains_collapse_to_one() {
    let remote = Arc::new(FakeRemote {
        latency: Some(Duration::from_millis(20)),
        ..FakeRemote::default()
    });
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    queue
        .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
        .await
        .unwrap();

    let (first, second) = tokio::join!(queue.process_queue(), queue.process_queue());
    let (first, second) = (first.unwrap(), second.unwrap());

    let skipped = [&first, &second]
        .iter()
        .filter(|s| s.skipped == Some(DrainSkipped::AlreadyRunning))
        .count();
    assert_eq!(skipped, 1);
    assert_eq!(first.completed + second.completed, 1);
    assert_eq!(remote.call_log().len(), 1);
}

#[tokio::test]
async fn transient_failures_retry_then_succeed() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail_transiently("a", 2);
    // A 50ms base keeps the first drain to exactly one attempt.
    let mut config = test_config();
    config.queue.retry_base_delay_ms = 50;
    config.queue.max_retry_delay_ms = 100;
    let queue = queue_with(Arc::clone(&remote), config, true).await;

    queue
        .enqueue(ActionKind::Update, "notes", json!({"id": "a", "body": "x"}), None, "u1")
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.retried, 1);
    assert_eq!(summary.completed, 0);

    drain_until_idle(&queue).await;
    assert_eq!(queue.failed_count().await.unwrap(), 0);
    // Two transient failures plus the final success.
    assert_eq!(remote.call_log().len(), 3);
}

#[tokio::test]
async fn exhausted_retries_mark_failed_and_can_be_revived() {
    let remote = Arc::new(FakeRemote::new());
    remote.fail_transiently("a", 10);
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    let action = queue
        .enqueue(ActionKind::Update, "notes", json!({"id": "a", "body": "x"}), None, "u1")
        .await
        .unwrap();

    // Default attempt limit is 3; drive all attempts through.
    for _ in 0..5 {
        queue.process_queue().await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    assert_eq!(queue.failed_count().await.unwrap(), 1);
    let failed = queue.list_failed().await.unwrap();
    assert_eq!(failed[0].id, action.id);
    assert_eq!(failed[0].attempts, 3);

    // Revive with a now-healthy remote.
    remote.fail_transiently("a", 0);
    queue.re_enqueue_failed(&action.id).await.unwrap();
    drain_until_idle(&queue).await;
    assert_eq!(queue.failed_count().await.unwrap(), 0);
}

#[tokio::test]
async fn permanent_rejection_fails_without_retries() {
    let remote = Arc::new(FakeRemote::new());
    remote.reject("a");
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    let action = queue
        .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
        .await
        .unwrap();

    queue.process_queue().await.unwrap();
    assert_eq!(queue.failed_count().await.unwrap(), 1);
    assert_eq!(remote.call_log().len(), 1);

    queue.discard_failed(&action.id).await.unwrap();
    assert_eq!(queue.failed_count().await.unwrap(), 0);
}

#[tokio::test]
async fn enqueue_rejects_update_without_record_key() {
    let remote = Arc::new(FakeRemote::new());
    let queue = queue_with(remote, test_config(), true).await;

    let err = queue
        .enqueue(ActionKind::Update, "notes", json!({"body": "x"}), None, "u1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("id"));

    let err = queue
        .enqueue(ActionKind::Insert, "notes", json!("not an object"), None, "u1")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("object"));
}

// =============================================================================
// Conflict Scenarios
// =============================================================================

#[tokio::test]
async fn last_write_wins_keeps_newer_local() {
    let remote = Arc::new(FakeRemote::new());
    remote.conflict_once("a", json!({"id": "a", "body": "remote", "updatedAt": 1_000}));
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    queue
        .enqueue(
            ActionKind::Update,
            "notes",
            json!({"id": "a", "body": "local", "updatedAt": 2_000}),
            None,
            "u1",
        )
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(summary.conflicts, 0);
    assert_eq!(queue.pending_count().await.unwrap(), 0);

    // The losing first update, then the resolved re-apply.
    let ops: Vec<String> = remote.call_log().into_iter().map(|(op, _, _)| op).collect();
    assert_eq!(ops, ["update", "update"]);
}

#[tokio::test]
async fn last_write_wins_tie_favors_remote() {
    let remote = Arc::new(FakeRemote::new());
    remote.conflict_once("a", json!({"id": "a", "body": "remote", "updatedAt": 2_000}));
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;

    queue
        .enqueue(
            ActionKind::Update,
            "notes",
            json!({"id": "a", "body": "local", "updatedAt": 2_000}),
            None,
            "u1",
        )
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert!(queue.list_conflicts().await.unwrap().is_empty());
}

#[tokio::test]
async fn manual_strategy_records_conflict_and_waits() {
    let remote = Arc::new(FakeRemote::new());
    remote.conflict_once("a", json!({"id": "a", "body": "remote"}));
    let mut config = test_config();
    config.conflict.strategy = "manual".parse().unwrap();
    let queue = queue_with(Arc::clone(&remote), config, true).await;

    let action = queue
        .enqueue(ActionKind::Update, "notes", json!({"id": "a", "body": "local"}), None, "u1")
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.conflicts, 1);

    let conflicts = queue.list_conflicts().await.unwrap();
    assert_eq!(conflicts.len(), 1);
    assert_eq!(conflicts[0].action_id, action.id);
    assert_eq!(conflicts[0].local_payload["body"], "local");
    assert_eq!(conflicts[0].remote_payload["body"], "remote");

    // The conflicted action is held back from further drains.
    let calls_before = remote.call_log().len();
    queue.process_queue().await.unwrap();
    assert_eq!(remote.call_log().len(), calls_before);

    // Caller decides; the decision is pushed to the remote right away and
    // the action leaves the queue.
    queue
        .resolve_conflict(&action.id, json!({"id": "a", "body": "decided"}))
        .await
        .unwrap();
    assert!(queue.list_conflicts().await.unwrap().is_empty());
    assert_eq!(queue.pending_count().await.unwrap(), 0);
    let last = remote.call_log().into_iter().last().unwrap();
    assert_eq!((last.0.as_str(), last.2.as_str()), ("update", "a"));
}

#[tokio::test]
async fn merge_fields_overlays_allow_listed_fields() {
    let remote = Arc::new(FakeRemote::new());
    remote.conflict_once(
        "a",
        json!({"id": "a", "body": "remote", "tags": ["r"], "color": "blue"}),
    );
    let mut config = test_config();
    config.conflict.strategy = "merge-fields".parse().unwrap();
    config
        .conflict
        .merge_fields
        .insert("notes".to_string(), vec!["body".to_string()]);
    let queue = queue_with(Arc::clone(&remote), config, true).await;

    queue
        .enqueue(
            ActionKind::Update,
            "notes",
            json!({"id": "a", "body": "local", "tags": ["l"]}),
            None,
            "u1",
        )
        .await
        .unwrap();

    let summary = queue.process_queue().await.unwrap();
    assert_eq!(summary.resolved, 1);
    assert_eq!(queue.pending_count().await.unwrap(), 0);
}

#[tokio::test]
async fn status_reads_never_steal_the_drain_slot() {
    let remote = Arc::new(FakeRemote {
        latency: Some(Duration::from_millis(50)),
        ..FakeRemote::default()
    });
    let queue = queue_with(Arc::clone(&remote), test_config(), true).await;
    queue
        .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
        .await
        .unwrap();

    let drainer = {
        let queue = Arc::clone(&queue);
        tokio::spawn(async move { queue.process_queue().await.unwrap() })
    };

    // Hammer the flag while the drain is mid-flight; none of these reads
    // may cause the real drain to report AlreadyRunning.
    let mut saw_draining = false;
    for _ in 0..200 {
        saw_draining |= queue.is_draining();
        if drainer.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }

    let summary = drainer.await.unwrap();
    assert!(saw_draining, "flag visible during the drain");
    assert_eq!(summary.skipped, None);
    assert_eq!(summary.completed, 1);
    assert!(!queue.is_draining());
}

// =============================================================================
// Subscription Scenarios
// =============================================================================

fn collecting_callback() -> (pocket_sync::ChangeCallback, Arc<Mutex<Vec<Vec<u64>>>>) {
    init_tracing();
    let batches: Arc<Mutex<Vec<Vec<u64>>>> = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&batches);
    let callback: pocket_sync::ChangeCallback = Arc::new(move |events: Vec<ChangeEvent>| {
        let seqs = events
            .iter()
            .map(|e| e.payload["seq"].as_u64().unwrap())
            .collect();
        sink.lock().unwrap().push(seqs);
    });
    (callback, batches)
}

#[tokio::test(start_paused = true)]
async fn subscribe_connects_and_delivers_batched_events() {
    let transport = Arc::new(FakeTransport::new(0));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    let (callback, batches) = collecting_callback();
    let ch = handle.subscribe("notes", None, callback).await.unwrap();
    assert_eq!(handle.connection_state(), ConnectionState::Online);

    let sender = transport.sender_for(&ch);
    for n in 1..=3 {
        sender.send(event(&ch, n)).await.unwrap();
    }

    // One flush interval later the whole batch arrives in order.
    tokio::time::sleep(Duration::from_millis(250)).await;
    let delivered = batches.lock().unwrap().clone();
    assert_eq!(delivered.concat(), [1, 2, 3]);
    assert_eq!(delivered.len(), 1, "events coalesce into one batch");
}

#[tokio::test(start_paused = true)]
async fn reconnect_backs_off_then_recovers() {
    let transport = Arc::new(FakeTransport::new(2));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    let (callback, _batches) = collecting_callback();
    let started = tokio::time::Instant::now();
    let ch = handle.subscribe("notes", None, callback).await.unwrap();

    // First open fails inline with the subscribe.
    assert_eq!(handle.connection_state(), ConnectionState::Reconnecting);

    let mut watch = handle.watch_connection();
    while *watch.borrow() != ConnectionState::Online {
        watch.changed().await.unwrap();
    }

    // Delays: 1s after the first failure, 2s after the second.
    assert_eq!(started.elapsed(), Duration::from_secs(3));
    assert_eq!(transport.open_count(), 3);

    // A later feed drop reconnects with a fresh backoff.
    transport.drop_feed(&ch);
    let mut watch = handle.watch_connection();
    while *watch.borrow() != ConnectionState::Reconnecting {
        watch.changed().await.unwrap();
    }
    while *watch.borrow() != ConnectionState::Online {
        watch.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn reconnect_ceiling_waits_for_explicit_trigger() {
    let transport = Arc::new(FakeTransport::new(10));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let mut config = SyncConfig::default();
    config.channels.reconnect_ceiling = 2;
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(config), rx);
    tokio::spawn(manager.run());

    let (callback, _batches) = collecting_callback();
    handle.subscribe("notes", None, callback).await.unwrap();

    // Give the backoff timers room; attempts must stop at the ceiling and
    // the machine must fall back to Offline.
    tokio::time::sleep(Duration::from_secs(120)).await;
    assert_eq!(transport.open_count(), 3, "initial try plus two retries");
    assert_eq!(handle.connection_state(), ConnectionState::Offline);

    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.channels[0].1, ChannelStatus::Errored);

    // An explicit trigger starts a fresh round, which now succeeds.
    transport.fail_opens.store(0, Ordering::SeqCst);
    handle.force_reconnect().await.unwrap();
    let mut watch = handle.watch_connection();
    while *watch.borrow() != ConnectionState::Online {
        watch.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn background_closes_and_foreground_reopens() {
    let transport = Arc::new(FakeTransport::new(0));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    let (callback, _batches) = collecting_callback();
    handle.subscribe("notes", None, callback).await.unwrap();
    assert_eq!(handle.connection_state(), ConnectionState::Online);

    handle.set_background().await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Offline);
    assert_eq!(snapshot.channels.len(), 1, "channel stays registered");
    assert_eq!(snapshot.channels[0].1, ChannelStatus::Closed);

    handle.set_foreground().await.unwrap();
    let mut watch = handle.watch_connection();
    while *watch.borrow() != ConnectionState::Online {
        watch.changed().await.unwrap();
    }
    assert_eq!(transport.open_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn unreachable_closes_channels_and_recovery_reopens() {
    let transport = Arc::new(FakeTransport::new(0));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    let (callback, _batches) = collecting_callback();
    handle.subscribe("notes", None, callback).await.unwrap();

    connectivity.set_reachable(false);
    let mut watch = handle.watch_connection();
    while *watch.borrow() != ConnectionState::Offline {
        watch.changed().await.unwrap();
    }

    connectivity.set_reachable(true);
    while *watch.borrow() != ConnectionState::Online {
        watch.changed().await.unwrap();
    }
}

#[tokio::test(start_paused = true)]
async fn force_reconnect_without_channels_stays_offline() {
    let transport = Arc::new(FakeTransport::new(0));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    // Nothing subscribed: a reconnect trigger must not fabricate an
    // Online transition out of zero channels.
    handle.force_reconnect().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(handle.connection_state(), ConnectionState::Offline);
    assert_eq!(transport.open_count(), 0);

    // The first real subscription still connects normally.
    let (callback, _batches) = collecting_callback();
    handle.subscribe("notes", None, callback).await.unwrap();
    assert_eq!(handle.connection_state(), ConnectionState::Online);
}

#[tokio::test(start_paused = true)]
async fn unsubscribe_all_goes_offline() {
    let transport = Arc::new(FakeTransport::new(0));
    let (connectivity, rx) = connectivity_channel();
    connectivity.set_reachable(true);
    let (manager, handle) =
        SubscriptionManager::new(transport.clone(), Arc::new(SyncConfig::default()), rx);
    tokio::spawn(manager.run());

    let (cb1, _) = collecting_callback();
    let (cb2, _) = collecting_callback();
    let ch1 = handle.subscribe("notes", None, cb1).await.unwrap();
    let ch2 = handle.subscribe("todos", None, cb2).await.unwrap();
    assert_ne!(ch1, ch2, "each subscription gets its own id");
    assert_eq!(handle.connection_state(), ConnectionState::Online);

    handle.unsubscribe_all().await.unwrap();
    let snapshot = handle.snapshot().await.unwrap();
    assert_eq!(snapshot.connection, ConnectionState::Offline);
    assert!(snapshot.channels.is_empty());
}

// =============================================================================
// Agent Scenarios
// =============================================================================

#[tokio::test]
async fn agent_drains_when_reachability_returns() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = test_config();
    config.store.path = dir.path().join("agent.db");

    let remote = Arc::new(FakeRemote::new());
    let transport = Arc::new(FakeTransport::new(0));
    let agent = SyncAgent::start(config, remote.clone(), transport)
        .await
        .unwrap();

    agent
        .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
        .await
        .unwrap();

    let diag = agent.diagnostics().await.unwrap();
    assert_eq!(diag.status, pocket_core::status::SyncStatus::Offline);
    assert_eq!(diag.pending, 1);
    assert!(diag.last_sync_time.is_none());
    assert_eq!(
        agent.status().await.unwrap(),
        pocket_core::status::SyncStatus::Offline,
        "status() folds the same snapshot as diagnostics()"
    );

    agent.set_reachable(true);
    // The reachability-triggered drain runs in the background.
    for _ in 0..50 {
        if agent.diagnostics().await.unwrap().pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    let diag = agent.diagnostics().await.unwrap();
    assert_eq!(diag.pending, 0);
    assert!(diag.last_sync_time.is_some());
    assert_eq!(remote.call_log().len(), 1);
    assert_eq!(agent.status().await.unwrap(), diag.status);

    agent.shutdown().await;
}

#[tokio::test]
async fn agent_queue_survives_restart() {
    let dir = tempfile::tempdir().unwrap();
    let db_path = dir.path().join("agent.db");

    let remote = Arc::new(FakeRemote::new());
    {
        let mut config = test_config();
        config.store.path = db_path.clone();
        let agent = SyncAgent::start(
            config,
            remote.clone(),
            Arc::new(FakeTransport::new(0)),
        )
        .await
        .unwrap();
        agent
            .enqueue(ActionKind::Insert, "notes", json!({"id": "a"}), None, "u1")
            .await
            .unwrap();
        agent.shutdown().await;
    }

    let mut config = test_config();
    config.store.path = db_path;
    let agent = SyncAgent::start(
        config,
        remote.clone(),
        Arc::new(FakeTransport::new(0)),
    )
    .await
    .unwrap();

    agent.set_reachable(true);
    // Either the explicit drain or the reachability trigger applies it.
    for _ in 0..50 {
        agent.process_queue().await.unwrap();
        if agent.diagnostics().await.unwrap().pending == 0 {
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    assert_eq!(agent.diagnostics().await.unwrap().pending, 0);
    assert_eq!(remote.call_log().len(), 1);
    agent.shutdown().await;
}
