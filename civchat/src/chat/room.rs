//! Room membership for one view.

use std::sync::Arc;

use parking_lot::Mutex;

use civchat_proto::event::ClientEvent;
use civchat_proto::message::ChatId;

use crate::connection::EventSink;

/// Tracks the single room a view has joined.
///
/// `join` while the channel is not open is dropped, not queued: the owner
/// re-invokes it once the connection opens again.
pub struct RoomMembership {
    sink: Arc<dyn EventSink>,
    joined: Mutex<Option<ChatId>>,
}

impl RoomMembership {
    /// Create a controller with no room joined.
    #[must_use]
    pub fn new(sink: Arc<dyn EventSink>) -> Self {
        Self {
            sink,
            joined: Mutex::new(None),
        }
    }

    /// Join `chat`, leaving any other joined room first.
    ///
    /// Returns `true` if `join_chat` was emitted.
    pub fn join(&self, chat: &ChatId) -> bool {
        if !self.sink.is_open() {
            tracing::debug!(chat = %chat, "join dropped, channel not open");
            return false;
        }
        let previous = self.joined.lock().clone();
        if let Some(previous) = previous.filter(|p| p != chat) {
            self.leave(&previous);
        }
        match self.sink.emit(ClientEvent::JoinChat(chat.clone())) {
            Ok(()) => {
                *self.joined.lock() = Some(chat.clone());
                tracing::debug!(chat = %chat, "joined room");
                true
            }
            Err(e) => {
                tracing::debug!(chat = %chat, err = %e, "join dropped");
                false
            }
        }
    }

    /// Leave `chat` if it is the joined room. Idempotent.
    ///
    /// Returns `true` if `leave_chat` was emitted.
    pub fn leave(&self, chat: &ChatId) -> bool {
        {
            let mut joined = self.joined.lock();
            if joined.as_ref() != Some(chat) {
                return false;
            }
            *joined = None;
        }
        // A closed channel already dropped the membership server-side.
        self.sink.emit(ClientEvent::LeaveChat(chat.clone())).is_ok()
    }

    /// The joined room, if any.
    #[must_use]
    pub fn joined(&self) -> Option<ChatId> {
        self.joined.lock().clone()
    }
}
