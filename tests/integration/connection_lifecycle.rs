// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for the push channel lifecycle.
//!
//! Drives `ConnectionManager` against the loopback connector with a paused
//! clock, so reconnect timing is exact. These tests validate:
//! - a transport drop schedules exactly one reconnect after the fixed delay
//! - every (re)connect requests a fresh presence snapshot
//! - a deliberate server disconnect and an auth rejection are terminal
//! - `max_reconnect_attempts` bounds consecutive failures
//! - events emitted while the channel is down are dropped, not replayed
//! - `stop` cancels a pending reconnect

use std::time::Duration;

use tokio::sync::watch;
use tokio::time::Instant;

use civchat::bus::EventBus;
use civchat::config::ConnectionConfig;
use civchat::connection::{CloseReason, ConnectionManager, ConnectionState, EventSink};
use civchat::session::AuthSession;
use civchat::transport::ConnectionError;
use civchat::transport::loopback::{ConnectOutcome, LoopbackConnector, LoopbackHarness};
use civchat_proto::event::ClientEvent;
use civchat_proto::message::ChatId;

// =============================================================================
// Helpers
// =============================================================================

fn session() -> AuthSession {
    AuthSession::new("alice", "token-a")
}

fn setup(
    config: ConnectionConfig,
) -> (
    ConnectionManager<LoopbackConnector>,
    LoopbackHarness,
    watch::Receiver<ConnectionState>,
) {
    let (connector, harness) = LoopbackConnector::new(32);
    let mgr = ConnectionManager::new(connector, config, EventBus::new(32));
    let state = mgr.watch_state();
    (mgr, harness, state)
}

async fn wait_for(
    rx: &mut watch::Receiver<ConnectionState>,
    pred: impl Fn(&ConnectionState) -> bool,
) -> ConnectionState {
    tokio::time::timeout(Duration::from_secs(120), async {
        loop {
            if pred(&*rx.borrow_and_update()) {
                return rx.borrow().clone();
            }
            rx.changed().await.expect("state sender dropped");
        }
    })
    .await
    .expect("state not reached")
}

fn is_pending(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::ReconnectPending { .. })
}

fn is_closed(state: &ConnectionState) -> bool {
    matches!(state, ConnectionState::Closed { .. })
}

// =============================================================================
// Reconnect
// =============================================================================

#[tokio::test(start_paused = true)]
async fn transport_drop_reconnects_after_fixed_delay() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;

    let first = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(first.recv().await, Some(ClientEvent::GetOnlineUsers));

    let dropped_at = Instant::now();
    first.drop_transport().await;
    let pending = wait_for(&mut state, is_pending).await;
    assert_eq!(pending, ConnectionState::ReconnectPending { attempt: 1 });

    let second = harness.next_server().await.unwrap();
    let elapsed = dropped_at.elapsed();
    assert!(elapsed >= Duration::from_millis(5000), "reconnected after {elapsed:?}");
    assert!(elapsed < Duration::from_millis(5100), "reconnected after {elapsed:?}");

    // Presence is rebuilt on the new channel.
    assert_eq!(second.recv().await, Some(ClientEvent::GetOnlineUsers));
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(mgr.socket_id().as_deref(), Some("loop-2"));
    assert_eq!(harness.attempts(), 2);
    mgr.stop().await;
}

#[tokio::test(start_paused = true)]
async fn no_reconnect_before_delay_elapses() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let first = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;

    first.drop_transport().await;
    wait_for(&mut state, is_pending).await;
    tokio::time::sleep(Duration::from_millis(4999)).await;
    assert_eq!(harness.attempts(), 1);
    assert!(harness.try_next_server().is_none());

    let _second = harness.next_server().await.unwrap();
    assert_eq!(harness.attempts(), 2);
    mgr.stop().await;
}

#[tokio::test(start_paused = true)]
async fn failed_reconnect_schedules_another_attempt() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let first = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;

    mgr.connector().push_outcome(ConnectOutcome::Refuse);
    first.drop_transport().await;
    wait_for(&mut state, |s| *s == ConnectionState::ReconnectPending { attempt: 1 }).await;
    wait_for(&mut state, |s| *s == ConnectionState::ReconnectPending { attempt: 2 }).await;

    let third = harness.next_server().await.unwrap();
    assert_eq!(third.socket_id(), "loop-3");
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(harness.attempts(), 3);
    mgr.stop().await;
}

#[tokio::test(start_paused = true)]
async fn reconnect_attempts_are_bounded_when_configured() {
    let config = ConnectionConfig {
        max_reconnect_attempts: Some(2),
        ..ConnectionConfig::default()
    };
    let (mgr, harness, mut state) = setup(config);
    mgr.connector().push_outcome(ConnectOutcome::Refuse);
    mgr.connector().push_outcome(ConnectOutcome::Refuse);
    mgr.connector().push_outcome(ConnectOutcome::Refuse);
    mgr.start(session()).await;

    // The manager starts out `Closed { Stopped }`; wait for the exhausted close.
    wait_for(&mut state, |s| {
        matches!(
            s,
            ConnectionState::Closed {
                reason: CloseReason::ReconnectExhausted
            }
        )
    })
    .await;
    assert_eq!(harness.attempts(), 3);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.attempts(), 3);
}

// =============================================================================
// Terminal closes
// =============================================================================

#[tokio::test(start_paused = true)]
async fn server_disconnect_is_terminal() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let server = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;

    server.disconnect().await;
    let closed = wait_for(&mut state, is_closed).await;
    assert_eq!(
        closed,
        ConnectionState::Closed {
            reason: CloseReason::ServerDisconnect
        }
    );

    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.attempts(), 1);
    assert!(!mgr.is_open());
}

#[tokio::test(start_paused = true)]
async fn auth_rejection_on_reconnect_is_terminal() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let server = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;

    mgr.connector()
        .push_outcome(ConnectOutcome::RejectAuth("token expired".into()));
    server.drop_transport().await;

    let closed = wait_for(&mut state, is_closed).await;
    assert_eq!(
        closed,
        ConnectionState::Closed {
            reason: CloseReason::AuthRejected("token expired".into())
        }
    );
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(harness.attempts(), 2);
}

#[tokio::test(start_paused = true)]
async fn start_after_terminal_close_opens_new_channel() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let server = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;
    server.disconnect().await;
    wait_for(&mut state, is_closed).await;

    mgr.start(session()).await;
    let _again = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(harness.attempts(), 2);
    mgr.stop().await;
}

// =============================================================================
// Emission while down
// =============================================================================

#[tokio::test(start_paused = true)]
async fn events_emitted_while_down_are_dropped() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let first = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(first.recv().await, Some(ClientEvent::GetOnlineUsers));

    first.drop_transport().await;
    wait_for(&mut state, is_pending).await;
    assert!(matches!(
        mgr.emit(ClientEvent::JoinChat(ChatId::new("c1"))),
        Err(ConnectionError::NotOpen)
    ));

    let second = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;
    assert_eq!(second.recv().await, Some(ClientEvent::GetOnlineUsers));
    tokio::task::yield_now().await;
    assert_eq!(second.try_recv(), None);
    mgr.stop().await;
}

#[tokio::test(start_paused = true)]
async fn stop_cancels_pending_reconnect() {
    let (mgr, mut harness, mut state) = setup(ConnectionConfig::default());
    mgr.start(session()).await;
    let first = harness.next_server().await.unwrap();
    wait_for(&mut state, ConnectionState::is_open).await;

    first.drop_transport().await;
    wait_for(&mut state, is_pending).await;
    mgr.stop().await;

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(harness.attempts(), 1);
    assert_eq!(
        mgr.state(),
        ConnectionState::Closed {
            reason: CloseReason::Stopped
        }
    );
}
