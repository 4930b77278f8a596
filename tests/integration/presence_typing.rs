// Test-specific lint overrides: integration tests use unwrap/expect freely,
// and some pedantic/nursery lints are not appropriate for test code.
#![allow(
    clippy::unwrap_used,
    clippy::expect_used,
    clippy::doc_markdown,
    clippy::future_not_send,
    clippy::missing_panics_doc
)]

//! Integration tests for presence tracking and typing indicators.
//!
//! These tests validate:
//! - the online set is rebuilt from each `online_users` snapshot
//! - `user_online` / `user_offline` deltas are idempotent
//! - a reconnect requests and applies a fresh snapshot
//! - a burst of keystrokes yields exactly one `typing_start` and one
//!   `typing_stop`
//! - remote typing ignores the local user, expires a lost stop, and is
//!   cleared when the channel drops

use std::collections::BTreeSet;
use std::time::Duration;

use tokio::sync::mpsc;

use civchat::api::{ApiError, ChatApi};
use civchat::chat::view::ViewEvent;
use civchat::client::{ChatClient, ClientUpdate};
use civchat::config::ClientConfig;
use civchat::session::AuthSession;
use civchat::transport::loopback::{LoopbackConnector, LoopbackHarness, LoopbackServer};
use civchat_proto::chat::{Chat, ChatPage, MessagePage, Pagination};
use civchat_proto::event::{ChatRef, ClientEvent, ServerEvent};
use civchat_proto::message::{ChatId, Message, UserId};
use civchat_proto::presence::{PresenceEntry, UserOffline};
use civchat_proto::typing::UserTyping;

// =============================================================================
// Helpers
// =============================================================================

/// REST backend with no history.
struct EmptyApi;

impl ChatApi for EmptyApi {
    async fn list_chats(&self, _: &AuthSession, _: u32, _: u32) -> Result<ChatPage, ApiError> {
        Ok(ChatPage {
            chats: Vec::new(),
            pagination: None,
        })
    }

    async fn get_or_create_chat(&self, _: &AuthSession, _: &UserId) -> Result<Chat, ApiError> {
        Err(ApiError::NotFound)
    }

    async fn get_messages(
        &self,
        _: &AuthSession,
        _: &ChatId,
        page: u32,
        _: u32,
    ) -> Result<MessagePage, ApiError> {
        Ok(MessagePage {
            messages: Vec::new(),
            pagination: Pagination {
                page,
                pages: 1,
                total: None,
                limit: None,
            },
        })
    }

    async fn send_message(
        &self,
        _: &AuthSession,
        _: &ChatId,
        _: &str,
    ) -> Result<Message, ApiError> {
        Err(ApiError::NotFound)
    }

    async fn unread_count(&self, _: &AuthSession) -> Result<u64, ApiError> {
        Ok(0)
    }
}

type Client = ChatClient<LoopbackConnector, EmptyApi>;

fn config() -> ClientConfig {
    let mut config = ClientConfig::default();
    config.connection.reconnect_delay = Duration::from_millis(50);
    config.chat.unread_poll = Duration::from_secs(3600);
    config
}

async fn connected() -> (Client, mpsc::Receiver<ClientUpdate>, LoopbackHarness, LoopbackServer) {
    let (connector, mut harness) = LoopbackConnector::new(64);
    let (client, updates) = ChatClient::new(connector, EmptyApi, &config());
    client.start(AuthSession::new("me", "token")).await;
    let server = harness.next_server().await.unwrap();
    assert_eq!(server.recv().await, Some(ClientEvent::GetOnlineUsers));
    (client, updates, harness, server)
}

fn online(ids: &[&str]) -> ServerEvent {
    ServerEvent::OnlineUsers(ids.iter().map(|id| PresenceEntry::new(UserId::new(*id))).collect())
}

fn set(ids: &[&str]) -> BTreeSet<UserId> {
    ids.iter().map(|id| UserId::new(*id)).collect()
}

/// Next presence update, skipping inbox updates.
async fn next_presence(updates: &mut mpsc::Receiver<ClientUpdate>) -> BTreeSet<UserId> {
    tokio::time::timeout(Duration::from_secs(10), async {
        loop {
            match updates.recv().await.expect("client dropped") {
                ClientUpdate::Presence(set) => return set,
                ClientUpdate::Inbox { .. } => {}
            }
        }
    })
    .await
    .expect("no presence update")
}

/// Next emitted typing signal, skipping everything else.
async fn next_typing_signal(server: &LoopbackServer) -> ClientEvent {
    tokio::time::timeout(Duration::from_secs(30), async {
        loop {
            match server.recv().await.expect("client side closed") {
                event @ (ClientEvent::TypingStart(_) | ClientEvent::TypingStop(_)) => return event,
                _ => {}
            }
        }
    })
    .await
    .expect("no typing signal")
}

fn typing(user: &str, is_typing: bool) -> ServerEvent {
    ServerEvent::UserTyping(UserTyping {
        user_id: UserId::new(user),
        chat_id: ChatId::new("c1"),
        is_typing,
    })
}

async fn next_view_event(rx: &mut mpsc::Receiver<ViewEvent>) -> ViewEvent {
    tokio::time::timeout(Duration::from_secs(10), rx.recv())
        .await
        .expect("no view event")
        .expect("view closed")
}

// =============================================================================
// Presence
// =============================================================================

#[tokio::test]
async fn snapshot_then_deltas_are_idempotent() {
    let (client, mut updates, _harness, server) = connected().await;

    server.push(online(&["bob", "carol"])).await;
    assert_eq!(next_presence(&mut updates).await, set(&["bob", "carol"]));

    let dave = ServerEvent::UserOnline(PresenceEntry::new(UserId::new("dave")));
    server.push(dave.clone()).await;
    server.push(dave).await;
    let carol_off = ServerEvent::UserOffline(UserOffline {
        user_id: UserId::new("carol"),
    });
    server.push(carol_off.clone()).await;
    server.push(carol_off).await;
    server.push(online(&["bob", "dave", "erin"])).await;

    // Duplicates produce no update of their own.
    assert_eq!(next_presence(&mut updates).await, set(&["bob", "carol", "dave"]));
    assert_eq!(next_presence(&mut updates).await, set(&["bob", "dave"]));
    assert_eq!(next_presence(&mut updates).await, set(&["bob", "dave", "erin"]));
    assert!(client.presence().is_online(&UserId::new("erin")));
    assert!(!client.presence().is_online(&UserId::new("carol")));
}

#[tokio::test]
async fn snapshot_replaces_stale_entries_after_reconnect() {
    let (client, mut updates, mut harness, server) = connected().await;
    server.push(online(&["bob", "carol"])).await;
    assert_eq!(next_presence(&mut updates).await, set(&["bob", "carol"]));

    server.drop_transport().await;
    let second = harness.next_server().await.unwrap();
    assert_eq!(second.recv().await, Some(ClientEvent::GetOnlineUsers));
    second.push(online(&["carol"])).await;
    assert_eq!(next_presence(&mut updates).await, set(&["carol"]));
    assert_eq!(client.online_users(), set(&["carol"]));
}

#[tokio::test]
async fn stop_clears_presence() {
    let (client, mut updates, _harness, server) = connected().await;
    server.push(online(&["bob"])).await;
    next_presence(&mut updates).await;

    client.stop().await;
    assert!(client.presence().is_empty());
}

// =============================================================================
// Typing
// =============================================================================

#[tokio::test(start_paused = true)]
async fn keystroke_burst_emits_one_start_and_one_stop() {
    let (client, _updates, _harness, server) = connected().await;
    let (view, _rx) = client.open_chat(ChatId::new("c1")).await.unwrap();

    for _ in 0..10 {
        view.keystroke();
        tokio::time::sleep(Duration::from_millis(300)).await;
    }
    let c1 = ChatRef {
        chat_id: ChatId::new("c1"),
    };
    assert_eq!(next_typing_signal(&server).await, ClientEvent::TypingStart(c1.clone()));
    assert_eq!(next_typing_signal(&server).await, ClientEvent::TypingStop(c1));

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(server.try_recv(), None);
}

#[tokio::test]
async fn remote_typing_ignores_self_and_clears_on_stop() {
    let (client, _updates, _harness, server) = connected().await;
    let (view, mut rx) = client.open_chat(ChatId::new("c1")).await.unwrap();
    assert_eq!(next_view_event(&mut rx).await, ViewEvent::Messages);

    server.push(typing("me", true)).await;
    server.push(typing("bob", true)).await;
    assert_eq!(
        next_view_event(&mut rx).await,
        ViewEvent::Typing(vec![UserId::new("bob")])
    );
    server.push(typing("bob", false)).await;
    assert_eq!(next_view_event(&mut rx).await, ViewEvent::Typing(Vec::new()));
    assert!(view.typing_users().is_empty());
}

#[tokio::test(start_paused = true)]
async fn lost_typing_stop_expires() {
    let (client, _updates, _harness, server) = connected().await;
    let (view, mut rx) = client.open_chat(ChatId::new("c1")).await.unwrap();
    assert_eq!(next_view_event(&mut rx).await, ViewEvent::Messages);

    server.push(typing("bob", true)).await;
    assert_eq!(
        next_view_event(&mut rx).await,
        ViewEvent::Typing(vec![UserId::new("bob")])
    );
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert!(view.typing_users().is_empty());
}

#[tokio::test]
async fn remote_typing_clears_when_channel_drops() {
    let (client, _updates, mut harness, server) = connected().await;
    let (view, mut rx) = client.open_chat(ChatId::new("c1")).await.unwrap();
    assert_eq!(next_view_event(&mut rx).await, ViewEvent::Messages);

    server.push(typing("bob", true)).await;
    assert_eq!(
        next_view_event(&mut rx).await,
        ViewEvent::Typing(vec![UserId::new("bob")])
    );

    // Bob's stop is lost with the channel.
    server.drop_transport().await;
    assert_eq!(next_view_event(&mut rx).await, ViewEvent::Typing(Vec::new()));
    assert!(view.typing_users().is_empty());

    let _second = harness.next_server().await.unwrap();
}
