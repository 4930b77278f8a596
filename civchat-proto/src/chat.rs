//! Chat (conversation) and pagination wire types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::message::{ChatId, Message, UserId, UserRef};

/// Participant role as reported by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Job seeker.
    Candidate,
    /// Hiring party.
    Employer,
    /// Any role this client does not know about.
    #[serde(untagged)]
    Other(String),
}

/// One side of a two-party chat.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Participant {
    /// The participating user.
    pub user: UserRef,
    /// Their role in the conversation.
    pub role: Role,
}

/// A server-owned two-party conversation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chat {
    /// Server-assigned chat id.
    #[serde(rename = "_id")]
    pub id: ChatId,
    /// Exactly two participants.
    pub participants: Vec<Participant>,
    /// Most recent message, used for list previews.
    #[serde(default)]
    pub last_message: Option<Message>,
    /// Time of the most recent activity; the list sort key.
    pub last_activity: DateTime<Utc>,
}

impl Chat {
    /// The participant that is not `me`.
    #[must_use]
    pub fn other_participant(&self, me: &UserId) -> Option<&Participant> {
        self.participants.iter().find(|p| &p.user.id != me)
    }

    /// Whether the last message was sent by someone else and `me` has not
    /// read it yet.
    #[must_use]
    pub fn is_unread_for(&self, me: &UserId) -> bool {
        self.last_message
            .as_ref()
            .is_some_and(|m| &m.sender.id != me && !m.is_read_by(me))
    }
}

/// Page-number pagination block returned alongside list endpoints.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pagination {
    /// 1-based page number of this response.
    pub page: u32,
    /// Total number of pages.
    pub pages: u32,
    /// Total number of items, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub total: Option<u64>,
    /// Page size, when reported.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub limit: Option<u32>,
}

impl Pagination {
    /// Whether more pages follow this one.
    #[must_use]
    pub const fn has_more(&self) -> bool {
        self.page < self.pages
    }
}

/// Response body of `GET /chats/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessagePage {
    /// Messages in ascending `createdAt` order.
    pub messages: Vec<Message>,
    /// Page position.
    pub pagination: Pagination,
}

/// Response body of `GET /chats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatPage {
    /// Chats, most recent first.
    pub chats: Vec<Chat>,
    /// Page position, when the backend paginates.
    #[serde(default)]
    pub pagination: Option<Pagination>,
}

/// Response body of `POST /chats`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatEnvelope {
    /// The existing or freshly created chat.
    pub chat: Chat,
}

/// Response body of `POST /chats/{id}/messages`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageEnvelope {
    /// The stored message.
    pub message: Message,
}

/// Response body of `GET /chats/unread-count`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UnreadCount {
    /// Authoritative unread count for the session user.
    pub unread_count: u64,
}
