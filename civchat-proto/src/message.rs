//! Chat message wire types.
//!
//! Field names follow the backend's JSON documents (`_id`, `chat`,
//! `createdAt`, `readBy`), so a [`Message`] deserializes identically whether
//! it arrives in a `new_message` push frame or in a REST page.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum accepted message content length in bytes.
pub const MAX_CONTENT_LEN: usize = 4000;

/// Default `messageType` for plain text messages.
pub const TEXT_MESSAGE_TYPE: &str = "text";

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a server-assigned identifier.
            #[must_use]
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Returns the identifier as a string slice.
            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self::new(value)
            }
        }
    };
}

string_id! {
    /// Opaque identifier of a user account.
    UserId
}

string_id! {
    /// Opaque identifier of a two-party chat.
    ChatId
}

string_id! {
    /// Opaque identifier of a message. Also the de-duplication key when the
    /// same message is delivered by both push and pull.
    MessageId
}

/// Minimal user projection embedded in messages and chats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserRef {
    /// Account identifier.
    #[serde(rename = "_id")]
    pub id: UserId,
    /// Display name, when the backend populated it.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Avatar URL, when present.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub avatar: Option<String>,
}

impl UserRef {
    /// A reference carrying only the id.
    #[must_use]
    pub const fn bare(id: UserId) -> Self {
        Self {
            id,
            name: None,
            avatar: None,
        }
    }
}

/// One entry of a message's `readBy` list.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReadReceipt {
    /// The reader.
    pub user: UserId,
    /// When the reader marked the chat read.
    pub read_at: DateTime<Utc>,
}

/// A chat message as stored by the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server-assigned message id.
    #[serde(rename = "_id")]
    pub id: MessageId,
    /// Chat the message belongs to.
    #[serde(rename = "chat")]
    pub chat_id: ChatId,
    /// Author.
    pub sender: UserRef,
    /// Message body.
    pub content: String,
    /// Content kind; `"text"` unless the backend says otherwise.
    #[serde(default = "default_message_type")]
    pub message_type: String,
    /// Server timestamp; the ordering key within a chat.
    pub created_at: DateTime<Utc>,
    /// Readers so far. Only ever appended to.
    #[serde(default)]
    pub read_by: Vec<ReadReceipt>,
}

fn default_message_type() -> String {
    TEXT_MESSAGE_TYPE.to_string()
}

impl Message {
    /// Returns `true` if `user` already has a read receipt on this message.
    #[must_use]
    pub fn is_read_by(&self, user: &UserId) -> bool {
        self.read_by.iter().any(|r| &r.user == user)
    }

    /// Appends a read receipt for `user` unless one already exists.
    ///
    /// Returns `true` if a receipt was added.
    pub fn add_reader(&mut self, user: &UserId, read_at: DateTime<Utc>) -> bool {
        if self.is_read_by(user) {
            return false;
        }
        self.read_by.push(ReadReceipt {
            user: user.clone(),
            read_at,
        });
        true
    }
}

/// Errors from validating outgoing message content.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Content was empty after trimming whitespace.
    #[error("message content is empty")]
    Empty,
    /// Content exceeds [`MAX_CONTENT_LEN`].
    #[error("message content too large: {size} bytes (max {max})")]
    TooLarge {
        /// Actual size in bytes.
        size: usize,
        /// Maximum allowed size in bytes.
        max: usize,
    },
}

/// Trims `content` and checks it is sendable.
///
/// # Errors
///
/// Returns [`ValidationError::Empty`] for blank input and
/// [`ValidationError::TooLarge`] when the trimmed text exceeds
/// [`MAX_CONTENT_LEN`] bytes.
pub fn validate_content(content: &str) -> Result<&str, ValidationError> {
    let trimmed = content.trim();
    if trimmed.is_empty() {
        return Err(ValidationError::Empty);
    }
    if trimmed.len() > MAX_CONTENT_LEN {
        return Err(ValidationError::TooLarge {
            size: trimmed.len(),
            max: MAX_CONTENT_LEN,
        });
    }
    Ok(trimmed)
}
