//! Typing and read-receipt payloads.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatId, UserId};

/// Payload of the server's `user_typing` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserTyping {
    /// Who is typing.
    pub user_id: UserId,
    /// In which chat.
    pub chat_id: ChatId,
    /// `true` on start, `false` on stop.
    pub is_typing: bool,
}

/// Payload of the server's `messages_read` event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessagesRead {
    /// Chat that was read.
    pub chat_id: ChatId,
    /// Reader.
    pub user_id: UserId,
    /// When it was read.
    pub read_at: DateTime<Utc>,
}
