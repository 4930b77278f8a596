//! Push channel events.
//!
//! Every frame on the channel is a JSON object `{"event": <name>, "data":
//! <payload>}`. [`ClientEvent`] covers what the client emits and
//! [`ServerEvent`] what the backend pushes.

use serde::{Deserialize, Serialize};

use crate::chat::Chat;
use crate::message::{ChatId, Message, TEXT_MESSAGE_TYPE};
use crate::presence::{PresenceEntry, UserOffline};
use crate::typing::{MessagesRead, UserTyping};

/// Payload naming a single chat (`{chatId}`).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatRef {
    /// Target chat.
    pub chat_id: ChatId,
}

/// Payload of `send_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SendMessage {
    /// Target chat.
    pub chat_id: ChatId,
    /// Trimmed message body.
    pub content: String,
    /// Content kind, normally `"text"`.
    pub message_type: String,
}

impl SendMessage {
    /// A plain text message.
    #[must_use]
    pub fn text(chat_id: ChatId, content: impl Into<String>) -> Self {
        Self {
            chat_id,
            content: content.into(),
            message_type: TEXT_MESSAGE_TYPE.to_string(),
        }
    }
}

/// Events the client emits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Subscribe to a chat room. The payload is the bare chat id.
    JoinChat(ChatId),
    /// Unsubscribe from a chat room.
    LeaveChat(ChatId),
    /// Send a message over the push path.
    SendMessage(SendMessage),
    /// Local user started typing.
    TypingStart(ChatRef),
    /// Local user stopped typing.
    TypingStop(ChatRef),
    /// Local user has seen everything in the chat.
    MarkMessagesRead(ChatRef),
    /// Request a full presence snapshot.
    GetOnlineUsers,
}

impl ClientEvent {
    /// Wire name of the event.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::JoinChat(_) => "join_chat",
            Self::LeaveChat(_) => "leave_chat",
            Self::SendMessage(_) => "send_message",
            Self::TypingStart(_) => "typing_start",
            Self::TypingStop(_) => "typing_stop",
            Self::MarkMessagesRead(_) => "mark_messages_read",
            Self::GetOnlineUsers => "get_online_users",
        }
    }
}

/// Payload of `new_message`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NewMessage {
    /// The delivered message.
    pub message: Message,
    /// Updated chat document, when the backend includes it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chat: Option<Chat>,
}

/// Payload of the handshake acknowledgement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Connected {
    /// Backend-assigned socket id.
    pub socket_id: String,
}

/// Payload of `connect_error` and `error`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerError {
    /// Human-readable reason.
    pub message: String,
}

/// Events the backend pushes.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "snake_case")]
pub enum ServerEvent {
    /// Handshake accepted.
    Connected(Connected),
    /// Handshake rejected (bad or expired token).
    ConnectError(ServerError),
    /// Non-fatal server-side error.
    Error(ServerError),
    /// A message was posted in a joined room.
    NewMessage(NewMessage),
    /// A peer's typing state changed.
    UserTyping(UserTyping),
    /// A peer read a chat.
    MessagesRead(MessagesRead),
    /// Full presence snapshot.
    OnlineUsers(Vec<PresenceEntry>),
    /// A user came online.
    UserOnline(PresenceEntry),
    /// A user went offline.
    UserOffline(UserOffline),
}

/// Discriminant of [`ServerEvent`], used to scope subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    /// See [`ServerEvent::Connected`].
    Connected,
    /// See [`ServerEvent::ConnectError`].
    ConnectError,
    /// See [`ServerEvent::Error`].
    Error,
    /// See [`ServerEvent::NewMessage`].
    NewMessage,
    /// See [`ServerEvent::UserTyping`].
    UserTyping,
    /// See [`ServerEvent::MessagesRead`].
    MessagesRead,
    /// See [`ServerEvent::OnlineUsers`].
    OnlineUsers,
    /// See [`ServerEvent::UserOnline`].
    UserOnline,
    /// See [`ServerEvent::UserOffline`].
    UserOffline,
}

impl ServerEvent {
    /// The event's kind.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::Connected(_) => EventKind::Connected,
            Self::ConnectError(_) => EventKind::ConnectError,
            Self::Error(_) => EventKind::Error,
            Self::NewMessage(_) => EventKind::NewMessage,
            Self::UserTyping(_) => EventKind::UserTyping,
            Self::MessagesRead(_) => EventKind::MessagesRead,
            Self::OnlineUsers(_) => EventKind::OnlineUsers,
            Self::UserOnline(_) => EventKind::UserOnline,
            Self::UserOffline(_) => EventKind::UserOffline,
        }
    }

    /// The chat an event is scoped to, if any.
    #[must_use]
    pub const fn chat_id(&self) -> Option<&ChatId> {
        match self {
            Self::NewMessage(e) => Some(&e.message.chat_id),
            Self::UserTyping(e) => Some(&e.chat_id),
            Self::MessagesRead(e) => Some(&e.chat_id),
            _ => None,
        }
    }
}
