//! Read receipts: emitting `mark_messages_read` and applying `messages_read`.

use std::sync::Arc;

use civchat_proto::event::{ChatRef, ClientEvent};
use civchat_proto::message::ChatId;
use civchat_proto::typing::MessagesRead;

use super::stream::MessageStream;
use crate::connection::EventSink;

/// Read-receipt coordinator for the visible chat.
pub struct ReadReceipts {
    sink: Arc<dyn EventSink>,
}

impl ReadReceipts {
    /// Coordinator emitting through `sink`.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self { sink }
    }

    /// Tell the server the local user has seen `chat`.
    ///
    /// Called when the chat becomes visible and for every message that
    /// arrives while it stays visible. Returns `true` if emitted.
    pub fn mark_read(&self, chat: &ChatId) -> bool {
        match self.sink.emit(ClientEvent::MarkMessagesRead(ChatRef {
            chat_id: chat.clone(),
        })) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(chat = %chat, err = %e, "mark read not sent");
                false
            }
        }
    }

    /// Apply a peer's `messages_read` to `stream`.
    ///
    /// Events for another chat are ignored. Returns the number of messages
    /// that gained a receipt.
    pub fn apply(&self, stream: &mut MessageStream, event: &MessagesRead) -> usize {
        if &event.chat_id != stream.chat_id() {
            return 0;
        }
        let updated = stream.apply_read(&event.user_id, event.read_at);
        if updated > 0 {
            tracing::debug!(chat = %event.chat_id, reader = %event.user_id, updated, "read receipts applied");
        }
        updated
    }
}
