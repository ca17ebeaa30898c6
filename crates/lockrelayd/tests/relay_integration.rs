//! Integration tests for the relay actor.
//!
//! These drive the real actor through its handle and observe the outboxes
//! and the notification dispatcher, without any sockets.
//!
//! Tests CAN use `.unwrap()` and `.expect()`.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use lockrelay_core::{Connectivity, ConnectionId, ControlCommand, LockStatus, Notification, PinState, Telegram};
use lockrelay_protocol::ServerMessage;
use lockrelayd::notify::{spawn_dispatcher, Notifier, NotifyError};
use lockrelayd::relay::{spawn_relay, RelayHandle, OUTBOX_CAPACITY};
use serde_json::json;
use tokio::sync::mpsc;
use tokio::time::timeout;

// ============================================================================
// Test Helpers
// ============================================================================

const RECV_TIMEOUT: Duration = Duration::from_secs(1);

/// Notifier that records every dispatched notification.
#[derive(Default)]
struct RecordingNotifier {
    seen: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    fn titles(&self) -> Vec<String> {
        self.seen
            .lock()
            .unwrap()
            .iter()
            .map(|n| n.title.clone())
            .collect()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn dispatch(&self, notification: &Notification) -> Result<(), NotifyError> {
        self.seen.lock().unwrap().push(notification.clone());
        Ok(())
    }
}

fn setup() -> (RelayHandle, Arc<RecordingNotifier>) {
    let notifier = Arc::new(RecordingNotifier::default());
    let queue = spawn_dispatcher(notifier.clone(), 16);
    (spawn_relay(queue), notifier)
}

fn id(s: &str) -> ConnectionId {
    ConnectionId::new(s)
}

fn telegram(lock_pin: PinState, unlock_pin: PinState) -> Telegram {
    Telegram {
        lock_id: Some("L1".to_string()),
        lock_pin,
        unlock_pin,
    }
}

async fn attach(relay: &RelayHandle, name: &str) -> mpsc::Receiver<ServerMessage> {
    let (tx, rx) = mpsc::channel(OUTBOX_CAPACITY);
    relay.attach(id(name), tx).await.unwrap();
    rx
}

async fn recv(rx: &mut mpsc::Receiver<ServerMessage>) -> ServerMessage {
    timeout(RECV_TIMEOUT, rx.recv())
        .await
        .expect("message within timeout")
        .expect("outbox open")
}

/// Waits for the actor to drain everything queued so far.
async fn settle(relay: &RelayHandle) {
    relay.status().await.expect("relay running");
}

/// Waits until the dispatcher has seen `count` notifications.
async fn wait_for_notifications(notifier: &RecordingNotifier, count: usize) {
    let start = tokio::time::Instant::now();
    while notifier.seen.lock().unwrap().len() < count {
        assert!(start.elapsed() < RECV_TIMEOUT, "notifications did not arrive");
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}

fn expect_status(msg: ServerMessage) -> lockrelay_core::StatusReport {
    match msg {
        ServerMessage::LockStatusChange(report) => report,
        other => panic!("Expected LockStatusChange, got {other:?}"),
    }
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_full_lifecycle() {
    let (relay, notifier) = setup();
    let _lock_rx = attach(&relay, "lock").await;

    relay.announce_lock(id("lock"), "L1".to_string()).await.unwrap();
    relay
        .telegram(id("lock"), telegram(PinState::Asserted, PinState::Clear))
        .await
        .unwrap();

    // Late joiner gets the current state immediately
    let mut o1 = attach(&relay, "o1").await;
    relay.announce_observer(id("o1")).await.unwrap();

    let snapshot = expect_status(recv(&mut o1).await);
    assert_eq!(snapshot.lock_id.as_deref(), Some("L1"));
    assert_eq!(snapshot.lock_status, LockStatus::Locked);
    assert_eq!(snapshot.connectivity, Connectivity::Online);
    let ts1 = snapshot.updated_at;

    // Contradictory pins: broadcast, no push
    relay
        .telegram(id("lock"), telegram(PinState::Clear, PinState::Clear))
        .await
        .unwrap();
    let stuck = expect_status(recv(&mut o1).await);
    assert_eq!(stuck.lock_status, LockStatus::Stuck);
    assert!(stuck.updated_at > ts1);

    relay.disconnect(id("lock")).await.unwrap();
    let offline = expect_status(recv(&mut o1).await);
    assert_eq!(offline.lock_status, LockStatus::Stuck);
    assert_eq!(offline.connectivity, Connectivity::Offline);

    wait_for_notifications(&notifier, 3).await;
    assert_eq!(
        notifier.titles(),
        vec!["Lock Online", "Lock Status Change", "Lock Offline"]
    );
}

#[tokio::test]
async fn test_control_forwarded_to_lock() {
    let (relay, _notifier) = setup();
    let mut lock_rx = attach(&relay, "lock").await;
    let mut o1 = attach(&relay, "o1").await;

    relay.announce_lock(id("lock"), "L1".to_string()).await.unwrap();
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;

    relay.control(id("o1"), ControlCommand::Unlock).await.unwrap();
    relay.control(id("o1"), ControlCommand::Lock).await.unwrap();

    assert_eq!(recv(&mut lock_rx).await, ServerMessage::UnlockRequest);
    assert_eq!(recv(&mut lock_rx).await, ServerMessage::LockRequest);

    settle(&relay).await;
    assert!(o1.try_recv().is_err(), "observer must not see control requests");
}

#[tokio::test]
async fn test_control_without_lock_is_dropped() {
    let (relay, notifier) = setup();
    let mut o1 = attach(&relay, "o1").await;
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;

    relay.control(id("o1"), ControlCommand::Unlock).await.unwrap();
    settle(&relay).await;

    assert!(o1.try_recv().is_err());
    assert!(notifier.titles().is_empty());
}

#[tokio::test]
async fn test_supersede_routes_to_new_lock() {
    let (relay, _notifier) = setup();
    let mut old = attach(&relay, "old").await;
    let mut new = attach(&relay, "new").await;

    relay.announce_lock(id("old"), "L1".to_string()).await.unwrap();
    relay.announce_lock(id("new"), "L1".to_string()).await.unwrap();
    relay.control(id("new"), ControlCommand::Lock).await.unwrap();

    assert_eq!(recv(&mut new).await, ServerMessage::LockRequest);
    settle(&relay).await;
    assert!(old.try_recv().is_err());

    // The superseded connection leaving does not take the lock offline
    relay.disconnect(id("old")).await.unwrap();
    let summary = relay.summary().await.unwrap();
    assert_eq!(summary.lock_connection, Some(id("new")));
    assert_eq!(
        relay.status().await.unwrap().connectivity,
        Connectivity::Online
    );
}

#[tokio::test]
async fn test_broadcast_reaches_everyone() {
    let (relay, _notifier) = setup();
    let mut lock_rx = attach(&relay, "lock").await;
    let mut o1 = attach(&relay, "o1").await;
    let mut bystander = attach(&relay, "unassigned").await;

    relay.announce_lock(id("lock"), "L1".to_string()).await.unwrap();
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;

    relay.broadcast(id("o1"), json!({"text": "hello"})).await.unwrap();

    let expected = ServerMessage::Message {
        payload: json!({"text": "hello"}),
    };
    assert_eq!(recv(&mut lock_rx).await, expected);
    assert_eq!(recv(&mut o1).await, expected);
    assert_eq!(recv(&mut bystander).await, expected);
}

#[tokio::test]
async fn test_telegram_from_observer_ignored() {
    let (relay, notifier) = setup();
    let _lock_rx = attach(&relay, "lock").await;
    let mut o1 = attach(&relay, "o1").await;

    relay.announce_lock(id("lock"), "L1".to_string()).await.unwrap();
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;

    relay
        .telegram(id("o1"), telegram(PinState::Clear, PinState::Asserted))
        .await
        .unwrap();
    settle(&relay).await;

    assert!(o1.try_recv().is_err());
    assert_eq!(relay.status().await.unwrap().lock_status, LockStatus::Unknown);

    wait_for_notifications(&notifier, 1).await;
    assert_eq!(notifier.titles(), vec!["Lock Online"]);
}

#[tokio::test]
async fn test_repeated_status_pushes_once() {
    let (relay, notifier) = setup();
    let _lock_rx = attach(&relay, "lock").await;
    let mut o1 = attach(&relay, "o1").await;

    relay.announce_lock(id("lock"), "L1".to_string()).await.unwrap();
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;

    for _ in 0..3 {
        relay
            .telegram(id("lock"), telegram(PinState::Clear, PinState::Asserted))
            .await
            .unwrap();
    }

    // Every telegram is broadcast, only the transition is pushed
    for _ in 0..3 {
        let report = expect_status(recv(&mut o1).await);
        assert_eq!(report.lock_status, LockStatus::Unlocked);
    }

    wait_for_notifications(&notifier, 2).await;
    settle(&relay).await;
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(notifier.titles(), vec!["Lock Online", "Lock Status Change"]);
    assert_eq!(
        notifier.seen.lock().unwrap()[1].body,
        "Lock is now UNLOCKED"
    );
}

#[tokio::test]
async fn test_test_notification() {
    let (relay, notifier) = setup();
    relay.test_notification().await.unwrap();

    wait_for_notifications(&notifier, 1).await;
    assert_eq!(notifier.seen.lock().unwrap()[0], Notification::test());
}

#[tokio::test]
async fn test_disconnect_unknown_connection_is_noop() {
    let (relay, notifier) = setup();
    relay.disconnect(id("ghost")).await.unwrap();

    let summary = relay.summary().await.unwrap();
    assert_eq!(summary.connections, 0);
    assert!(notifier.titles().is_empty());
}

#[tokio::test]
async fn test_observer_disconnect_leaves_group() {
    let (relay, _notifier) = setup();
    let mut o1 = attach(&relay, "o1").await;
    relay.announce_observer(id("o1")).await.unwrap();
    relay.announce_observer(id("o1")).await.unwrap();
    let _ = recv(&mut o1).await;
    let _ = recv(&mut o1).await;

    assert_eq!(relay.summary().await.unwrap().observers, 1);

    relay.disconnect(id("o1")).await.unwrap();
    let summary = relay.summary().await.unwrap();
    assert_eq!(summary.observers, 0);
    assert_eq!(summary.connections, 0);
}
