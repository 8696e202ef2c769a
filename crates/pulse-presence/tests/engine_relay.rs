//! Integration tests: the full engine against an in-process relay on
//! ephemeral loopback ports.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use futures_util::StreamExt;
use pulse_common::Envelope;
use pulse_presence::{
    Identity, PresenceTuning, RetryPolicy, Status, StatusStore, StoredStatus, SyncConfig,
    SyncEngine, SyncError, SyncEvent, SyncHandle, TransportConfig, PRESENCE_CHANNEL,
};
use pulse_relay::RelayServer;
use tokio::sync::mpsc;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

async fn start_relay(api_key: Option<&str>) -> SocketAddr {
    let server = RelayServer::bind("127.0.0.1:0", api_key.map(String::from))
        .await
        .unwrap();
    let addr = server.local_addr().unwrap();
    tokio::spawn(server.run());
    addr
}

/// A WebSocket server that accepts connections but never acknowledges
/// any channel operation. Forwards every presence-channel frame it
/// receives, with its arrival time, so tests can observe entry attempts.
async fn start_unresponsive_server() -> (
    SocketAddr,
    mpsc::UnboundedReceiver<(String, tokio::time::Instant)>,
) {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (tx, rx) = mpsc::unbounded_channel();

    tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
            let tx = tx.clone();
            tokio::spawn(async move {
                let mut ws = match tokio_tungstenite::accept_async(stream).await {
                    Ok(ws) => ws,
                    Err(_) => return,
                };
                while let Some(Ok(frame)) = ws.next().await {
                    if let tokio_tungstenite::tungstenite::Message::Text(text) = frame {
                        if let Ok(envelope) = serde_json::from_str::<Envelope>(&text) {
                            if envelope.channel == PRESENCE_CHANNEL {
                                let _ = tx.send((envelope.event, tokio::time::Instant::now()));
                            }
                        }
                    }
                }
            });
        }
    });
    (addr, rx)
}

fn test_config(addr: SocketAddr, api_key: &str) -> SyncConfig {
    SyncConfig {
        transport: TransportConfig {
            endpoint: format!("ws://{addr}"),
            api_key: api_key.to_string(),
            user_id: String::new(),
            heartbeat_interval: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(5),
        },
        retry: RetryPolicy {
            delay: Duration::from_millis(100),
            max_retries: 2,
        },
        tuning: PresenceTuning {
            enter_timeout: Duration::from_secs(2),
            enter_retries: 2,
            enter_retry_delay: Duration::from_millis(200),
            refresh_delay: Duration::from_millis(100),
            refresh_interval: Duration::from_secs(30),
            leave_grace: Duration::from_millis(500),
        },
        persist_debounce: Duration::from_millis(300),
    }
}

fn identity(id: &str, name: &str) -> Identity {
    Identity {
        user_id: id.to_string(),
        name: name.to_string(),
        contact: None,
        avatar_ref: None,
    }
}

/// Wait until a matching event arrives, discarding others.
async fn wait_event<F>(
    events: &mut mpsc::Receiver<SyncEvent>,
    timeout: Duration,
    mut pred: F,
) -> Option<SyncEvent>
where
    F: FnMut(&SyncEvent) -> bool,
{
    tokio::time::timeout(timeout, async {
        while let Some(event) = events.recv().await {
            if pred(&event) {
                return Some(event);
            }
        }
        None
    })
    .await
    .ok()
    .flatten()
}

/// Poll the handle's own status until it reaches the expected value.
async fn wait_own_status(handle: &SyncHandle, timeout: Duration, expected: Status) -> bool {
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if handle.own_status().await == expected {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Poll the roster snapshot until a predicate holds.
async fn wait_snapshot<F>(handle: &SyncHandle, timeout: Duration, mut pred: F) -> bool
where
    F: FnMut(&[pulse_presence::PresenceUser]) -> bool,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if pred(&handle.snapshot().await) {
            return true;
        }
        if tokio::time::Instant::now() >= deadline {
            return false;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
}

/// Test double recording every durable write.
struct RecordingStore {
    writes: Mutex<Vec<(String, Status)>>,
    initial: Option<StoredStatus>,
}

impl RecordingStore {
    fn new(initial: Option<StoredStatus>) -> Arc<Self> {
        Arc::new(Self {
            writes: Mutex::new(Vec::new()),
            initial,
        })
    }

    fn writes(&self) -> Vec<(String, Status)> {
        self.writes.lock().unwrap().clone()
    }
}

#[async_trait]
impl StatusStore for RecordingStore {
    async fn persist(&self, user_id: &str, state: Status) -> Result<(), SyncError> {
        self.writes.lock().unwrap().push((user_id.to_string(), state));
        Ok(())
    }

    async fn fetch_initial(&self, _user_id: &str) -> Result<Option<StoredStatus>, SyncError> {
        Ok(self.initial.clone())
    }
}

// ---------------------------------------------------------------------------
// Roster membership
// ---------------------------------------------------------------------------

#[tokio::test]
async fn two_clients_see_each_other() {
    let addr = start_relay(None).await;

    let (a, mut a_events) = SyncEngine::start(identity("a", "Ada"), test_config(addr, ""), None);
    let (b, _b_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);

    assert!(
        wait_event(&mut a_events, Duration::from_secs(5), |e| matches!(
            e,
            SyncEvent::Connected { .. }
        ))
        .await
        .is_some()
    );

    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| {
        users.iter().any(|u| u.id == "b") && users.iter().any(|u| u.id == "a")
    })
    .await);
    assert!(wait_snapshot(&b, Duration::from_secs(5), |users| {
        users.iter().any(|u| u.id == "a")
    })
    .await);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn status_change_propagates_to_other_users() {
    let addr = start_relay(None).await;

    let (a, _a_events) = SyncEngine::start(identity("a", "Ada"), test_config(addr, ""), None);
    let (b, mut b_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);

    assert!(wait_snapshot(&b, Duration::from_secs(5), |users| {
        users.iter().any(|u| u.id == "a")
    })
    .await);

    a.set_status(Status::Busy).await.unwrap();
    assert!(wait_own_status(&a, Duration::from_secs(2), Status::Busy).await);

    let observed = wait_event(&mut b_events, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::StatusChanged(u) if u.id == "a" && u.status == Status::Busy)
    })
    .await;
    assert!(observed.is_some(), "B never observed A as busy");

    assert!(wait_snapshot(&b, Duration::from_secs(5), |users| {
        users
            .iter()
            .any(|u| u.id == "a" && u.status == Status::Busy)
    })
    .await);

    a.shutdown().await;
    b.shutdown().await;
}

#[tokio::test]
async fn leave_then_reenter_updates_roster() {
    let addr = start_relay(None).await;

    let (a, _a_events) = SyncEngine::start(identity("a", "Ada"), test_config(addr, ""), None);
    let (b, _b_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);

    b.set_status(Status::Busy).await.unwrap();
    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| {
        users
            .iter()
            .any(|u| u.id == "b" && u.status == Status::Busy)
    })
    .await);

    // B disconnects: A's snapshot shrinks to just A.
    b.shutdown().await;
    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| {
        users.len() == 1 && users[0].id == "a"
    })
    .await);

    // B re-enters with a fresh default status.
    let (b2, _b2_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);
    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| {
        users
            .iter()
            .any(|u| u.id == "b" && u.status == Status::Available)
    })
    .await);

    a.shutdown().await;
    b2.shutdown().await;
}

#[tokio::test]
async fn double_shutdown_is_idempotent() {
    let addr = start_relay(None).await;
    let (a, _events) = SyncEngine::start(identity("a", "Ada"), test_config(addr, ""), None);

    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| !users.is_empty()).await);

    a.shutdown().await;
    a.shutdown().await; // second teardown is a no-op

    // The engine is gone; commands now fail cleanly.
    assert!(a.set_status(Status::Busy).await.is_err());
}

// ---------------------------------------------------------------------------
// Failure classification and retries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn config_failure_is_fatal_with_zero_retries() {
    let addr = start_relay(Some("sk_required")).await;

    // Wrong key: the relay rejects the upgrade with HTTP 403.
    let (_a, mut events) =
        SyncEngine::start(identity("a", "Ada"), test_config(addr, "wrong"), None);

    let fatal = wait_event(&mut events, Duration::from_secs(5), |e| {
        matches!(e, SyncEvent::Fatal(_))
    })
    .await;
    match fatal {
        Some(SyncEvent::Fatal(SyncError::Transport(message))) => {
            assert!(message.contains("403"), "unexpected reason: {message}");
        }
        other => panic!("expected a fatal transport failure, got {other:?}"),
    }

    // No retry is ever scheduled for a configuration failure.
    let retry = wait_event(&mut events, Duration::from_millis(500), |e| {
        matches!(e, SyncEvent::ReconnectScheduled { .. })
    })
    .await;
    assert!(retry.is_none(), "config failure must not be retried");
}

#[tokio::test]
async fn correct_api_key_connects() {
    let addr = start_relay(Some("sk_required")).await;

    let (a, mut events) =
        SyncEngine::start(identity("a", "Ada"), test_config(addr, "sk_required"), None);

    assert!(
        wait_event(&mut events, Duration::from_secs(5), |e| matches!(
            e,
            SyncEvent::Connected { .. }
        ))
        .await
        .is_some()
    );
    a.shutdown().await;
}

#[tokio::test]
async fn transient_failure_retries_then_exhausts() {
    // Nothing is listening on this port.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (_a, mut events) = SyncEngine::start(identity("a", "Ada"), test_config(addr, ""), None);

    let mut attempts = 0;
    let exhausted = loop {
        match wait_event(&mut events, Duration::from_secs(5), |e| {
            matches!(
                e,
                SyncEvent::ReconnectScheduled { .. } | SyncEvent::RetriesExhausted
            )
        })
        .await
        {
            Some(SyncEvent::ReconnectScheduled { .. }) => attempts += 1,
            Some(SyncEvent::RetriesExhausted) => break true,
            _ => break false,
        }
    };

    assert!(exhausted, "expected retries to exhaust");
    assert_eq!(attempts, 2, "configured maximum is two retries");
}

#[tokio::test]
async fn unacknowledged_entry_retries_with_backoff_then_gives_up() {
    let (addr, mut frames) = start_unresponsive_server().await;

    let mut config = test_config(addr, "");
    config.tuning.enter_timeout = Duration::from_millis(300);
    config.tuning.enter_retry_delay = Duration::from_millis(200);
    config.tuning.enter_retries = 2;

    let (a, mut events) = SyncEngine::start(identity("a", "Ada"), config, None);

    // Initial attempt plus two retries, each a fresh join frame.
    let mut attempts = Vec::new();
    for n in 1..=3 {
        let (event, at) = tokio::time::timeout(Duration::from_secs(5), frames.recv())
            .await
            .unwrap_or_else(|_| panic!("entry attempt {n} never arrived"))
            .unwrap();
        assert_eq!(event, "join", "attempt {n} sent an unexpected frame");
        attempts.push(at);
    }

    // Linear backoff: each gap is enter_timeout + enter_retry_delay * n,
    // so 500ms then 700ms (deadlines never fire early; small receive
    // margin allowed).
    assert!(attempts[1] - attempts[0] >= Duration::from_millis(450));
    assert!(attempts[2] - attempts[1] >= Duration::from_millis(650));

    // Exhausted: no fourth attempt, and no track/sync ever went out.
    if let Ok(Some((event, _))) =
        tokio::time::timeout(Duration::from_millis(1500), frames.recv()).await
    {
        panic!("unexpected frame after entry was abandoned: {event}");
    }

    // Not entered: the roster stays empty and entry was never announced.
    assert!(a.snapshot().await.is_empty());
    let connected = wait_event(&mut events, Duration::from_millis(200), |e| {
        matches!(e, SyncEvent::Connected { .. })
    })
    .await;
    assert!(connected.is_none(), "entry must not be announced");
}

// ---------------------------------------------------------------------------
// Offline edits and reconnection
// ---------------------------------------------------------------------------

#[tokio::test]
async fn offline_status_survives_reconnect() {
    // Reserve a port with nothing listening yet.
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let mut config = test_config(addr, "");
    config.retry.max_retries = 0; // fail fast, reconnect manually

    let (a, mut a_events) = SyncEngine::start(identity("a", "Ada"), config, None);
    assert!(
        wait_event(&mut a_events, Duration::from_secs(5), |e| matches!(
            e,
            SyncEvent::RetriesExhausted
        ))
        .await
        .is_some()
    );

    // Set status while offline: cached locally.
    a.set_status(Status::Busy).await.unwrap();
    assert!(wait_own_status(&a, Duration::from_secs(2), Status::Busy).await);

    // Bring the relay up on the reserved port and reconnect.
    let server = RelayServer::bind(&addr.to_string(), None).await.unwrap();
    tokio::spawn(server.run());
    a.reconnect().await.unwrap();

    assert!(
        wait_event(&mut a_events, Duration::from_secs(5), |e| matches!(
            e,
            SyncEvent::Connected { .. }
        ))
        .await
        .is_some()
    );
    assert_eq!(a.own_status().await, Status::Busy);

    // A fresh entry was performed and other users observe the cached
    // status.
    let (b, _b_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);
    assert!(wait_snapshot(&b, Duration::from_secs(5), |users| {
        users
            .iter()
            .any(|u| u.id == "a" && u.status == Status::Busy)
    })
    .await);

    a.shutdown().await;
    b.shutdown().await;
}

// ---------------------------------------------------------------------------
// Durable persistence
// ---------------------------------------------------------------------------

#[tokio::test]
async fn debounce_coalesces_rapid_status_edits() {
    let addr = start_relay(None).await;
    let store = RecordingStore::new(None);

    let (a, _events) = SyncEngine::start(
        identity("a", "Ada"),
        test_config(addr, ""),
        Some(store.clone() as Arc<dyn StatusStore>),
    );

    assert!(wait_snapshot(&a, Duration::from_secs(5), |users| !users.is_empty()).await);

    // Two edits 50ms apart, well inside the 300ms debounce window.
    a.set_status(Status::Focused).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    a.set_status(Status::Available).await.unwrap();

    tokio::time::sleep(Duration::from_millis(600)).await;

    let writes = store.writes();
    assert_eq!(writes.len(), 1, "exactly one durable write per window");
    assert_eq!(writes[0], ("a".to_string(), Status::Available));

    a.shutdown().await;
}

#[tokio::test]
async fn separate_windows_persist_separately() {
    let addr = start_relay(None).await;
    let store = RecordingStore::new(None);

    let (a, _events) = SyncEngine::start(
        identity("a", "Ada"),
        test_config(addr, ""),
        Some(store.clone() as Arc<dyn StatusStore>),
    );

    a.set_status(Status::Busy).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;
    a.set_status(Status::Focused).await.unwrap();
    tokio::time::sleep(Duration::from_millis(600)).await;

    let writes = store.writes();
    assert_eq!(writes.len(), 2);
    assert_eq!(writes[0].1, Status::Busy);
    assert_eq!(writes[1].1, Status::Focused);

    a.shutdown().await;
}

#[tokio::test]
async fn initial_status_is_seeded_from_store() {
    let addr = start_relay(None).await;
    let store = RecordingStore::new(Some(StoredStatus {
        state: Status::Focused,
        updated_at: Utc.with_ymd_and_hms(2026, 2, 1, 8, 0, 0).unwrap(),
    }));

    let (a, _events) = SyncEngine::start(
        identity("a", "Ada"),
        test_config(addr, ""),
        Some(store.clone() as Arc<dyn StatusStore>),
    );

    assert!(wait_own_status(&a, Duration::from_secs(2), Status::Focused).await);

    // Other users see the seeded status once A enters the roster.
    let (b, _b_events) = SyncEngine::start(identity("b", "Bob"), test_config(addr, ""), None);
    assert!(wait_snapshot(&b, Duration::from_secs(5), |users| {
        users
            .iter()
            .any(|u| u.id == "a" && u.status == Status::Focused)
    })
    .await);

    a.shutdown().await;
    b.shutdown().await;
}
