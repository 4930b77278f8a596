//! Chat state: presence, per-chat views and the cross-chat inbox.
//!
//! - [`presence`]: who is online, fed by push events only.
//! - [`room`]: which room a view has joined.
//! - [`stream`]: pull/push reconciliation for one chat.
//! - [`typing`] and [`receipts`]: ephemeral signals for the visible chat.
//! - [`inbox`]: recency-ordered chat list and unread counter.
//! - [`view`]: bundles the per-chat pieces behind one handle.

pub mod inbox;
pub mod presence;
pub mod receipts;
pub mod room;
pub mod stream;
pub mod typing;
pub mod view;

use civchat_proto::message::{ChatId, ValidationError};

use crate::api::ApiError;

/// Errors surfaced by chat operations.
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    /// A page fetch failed. The sequence keeps its last good value.
    #[error("failed to load messages for chat {chat_id}: {source}")]
    LoadFailure {
        /// Chat whose page failed.
        chat_id: ChatId,
        /// Underlying REST error.
        source: ApiError,
    },

    /// The backup REST send failed after the push emission.
    #[error("backup send failed: {0}")]
    SendFailure(ApiError),

    /// The push channel is not open.
    #[error("not connected")]
    NotConnected,

    /// No session has been started.
    #[error("no active session")]
    NoSession,

    /// The message body was rejected locally.
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Any other REST failure.
    #[error("request failed: {0}")]
    Api(#[from] ApiError),
}

impl ChatError {
    /// Whether the error means the session is no longer valid.
    #[must_use]
    pub const fn is_fatal(&self) -> bool {
        matches!(
            self,
            Self::LoadFailure {
                source: ApiError::Unauthorized,
                ..
            } | Self::SendFailure(ApiError::Unauthorized)
                | Self::Api(ApiError::Unauthorized)
        )
    }
}
