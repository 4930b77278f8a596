//! Typing indicators: local debounce and remote state.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use civchat_proto::event::{ChatRef, ClientEvent};
use civchat_proto::message::{ChatId, UserId};
use civchat_proto::typing::UserTyping;

use crate::connection::EventSink;

#[derive(Default)]
struct NotifierState {
    typing: bool,
    /// Bumped on every keystroke so a superseded timer does nothing.
    epoch: u64,
    timer: Option<JoinHandle<()>>,
}

/// Debounces local keystrokes into `typing_start` / `typing_stop`.
///
/// The first keystroke after a quiet period emits `typing_start`. Every
/// keystroke restarts an idle timer; when it fires, `typing_stop` is emitted
/// once. Must be used inside a tokio runtime.
pub struct TypingNotifier {
    chat_id: ChatId,
    sink: Arc<dyn EventSink>,
    idle: Duration,
    state: Arc<Mutex<NotifierState>>,
}

impl TypingNotifier {
    /// Notifier for `chat_id` with the given idle timeout.
    #[must_use]
    pub fn new(chat_id: ChatId, sink: Arc<dyn EventSink>, idle: Duration) -> Self {
        Self {
            chat_id,
            sink,
            idle,
            state: Arc::new(Mutex::new(NotifierState::default())),
        }
    }

    /// Record a keystroke.
    pub fn keystroke(&self) {
        let mut state = self.state.lock();
        if !state.typing {
            state.typing = true;
            emit(&*self.sink, ClientEvent::TypingStart(self.chat_ref()));
        }
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.epoch += 1;
        let epoch = state.epoch;

        let shared = Arc::clone(&self.state);
        let sink = Arc::clone(&self.sink);
        let chat = self.chat_ref();
        let idle = self.idle;
        state.timer = Some(tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let mut state = shared.lock();
            if state.epoch == epoch && state.typing {
                state.typing = false;
                state.timer = None;
                emit(&*sink, ClientEvent::TypingStop(chat));
            }
        }));
    }

    /// Stop typing now (message sent, view closing).
    pub fn flush(&self) {
        let mut state = self.state.lock();
        if let Some(timer) = state.timer.take() {
            timer.abort();
        }
        state.epoch += 1;
        if state.typing {
            state.typing = false;
            emit(&*self.sink, ClientEvent::TypingStop(self.chat_ref()));
        }
    }

    /// Whether the local user is currently flagged as typing.
    #[must_use]
    pub fn is_typing(&self) -> bool {
        self.state.lock().typing
    }

    fn chat_ref(&self) -> ChatRef {
        ChatRef {
            chat_id: self.chat_id.clone(),
        }
    }
}

impl Drop for TypingNotifier {
    fn drop(&mut self) {
        self.flush();
    }
}

fn emit(sink: &dyn EventSink, event: ClientEvent) {
    if let Err(e) = sink.emit(event) {
        tracing::debug!(err = %e, "typing signal not sent");
    }
}

/// Remote typing state per chat.
///
/// Entries are added on `isTyping: true` and removed on `false`. With a TTL
/// configured, an entry whose stop event never arrived expires on its own.
/// Events from the local user are ignored.
pub struct RemoteTyping {
    me: UserId,
    ttl: Option<Duration>,
    chats: HashMap<ChatId, HashMap<UserId, Instant>>,
}

impl RemoteTyping {
    /// Tracker for `me` with an optional expiry.
    #[must_use]
    pub fn new(me: UserId, ttl: Option<Duration>) -> Self {
        Self {
            me,
            ttl,
            chats: HashMap::new(),
        }
    }

    /// Apply a `user_typing` event. Returns `true` if the visible set changed.
    pub fn apply(&mut self, event: &UserTyping) -> bool {
        if event.user_id == self.me {
            return false;
        }
        self.prune(&event.chat_id);
        let users = self.chats.entry(event.chat_id.clone()).or_default();
        if event.is_typing {
            users.insert(event.user_id.clone(), Instant::now()).is_none()
        } else {
            users.remove(&event.user_id).is_some()
        }
    }

    /// Users currently typing in `chat`, sorted by id.
    pub fn typing_users(&mut self, chat: &ChatId) -> Vec<UserId> {
        self.prune(chat);
        let mut users: Vec<UserId> = self
            .chats
            .get(chat)
            .map(|u| u.keys().cloned().collect())
            .unwrap_or_default();
        users.sort();
        users
    }

    /// Forget typing state for `chat`.
    pub fn clear_chat(&mut self, chat: &ChatId) {
        self.chats.remove(chat);
    }

    fn prune(&mut self, chat: &ChatId) {
        let Some(ttl) = self.ttl else {
            return;
        };
        if let Some(users) = self.chats.get_mut(chat) {
            users.retain(|_, since| since.elapsed() < ttl);
        }
    }
}
