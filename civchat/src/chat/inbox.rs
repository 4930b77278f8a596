//! Cross-chat summary: recency-ordered chat list and the unread counter.
//!
//! The counter is adjusted incrementally on the hot path and periodically
//! replaced by the server's authoritative count to correct drift.

use std::collections::{HashMap, HashSet, VecDeque};

use civchat_proto::chat::Chat;
use civchat_proto::message::{ChatId, Message, MessageId, UserId};
use civchat_proto::typing::MessagesRead;

/// Message ids remembered for double-count protection.
const SEEN_CAPACITY: usize = 10_000;

/// Chat list plus unread bookkeeping for the session user.
pub struct Inbox {
    me: UserId,
    chats: Vec<Chat>,
    active: Option<ChatId>,
    unread: u64,
    /// Unread messages counted per chat since the last open/resync.
    contributions: HashMap<ChatId, u64>,
    seen: HashSet<MessageId>,
    seen_order: VecDeque<MessageId>,
}

impl Inbox {
    /// Empty inbox for `me`.
    #[must_use]
    pub fn new(me: UserId) -> Self {
        Self {
            me,
            chats: Vec::new(),
            active: None,
            unread: 0,
            contributions: HashMap::new(),
            seen: HashSet::new(),
            seen_order: VecDeque::new(),
        }
    }

    /// The user this inbox belongs to.
    #[must_use]
    pub const fn me(&self) -> &UserId {
        &self.me
    }

    /// Replace the chat list with a fresh server page.
    pub fn load(&mut self, mut chats: Vec<Chat>) {
        chats.sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        self.chats = chats;
    }

    /// Add `chat` if it is not listed yet (a chat just created for a peer).
    /// Returns `true` if it was added.
    pub fn insert_chat(&mut self, chat: Chat) -> bool {
        if self.chat(&chat.id).is_some() {
            return false;
        }
        self.chats.push(chat);
        self.chats
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));
        true
    }

    /// Chats, most recent first.
    #[must_use]
    pub fn chats(&self) -> &[Chat] {
        &self.chats
    }

    /// Look up one chat.
    #[must_use]
    pub fn chat(&self, id: &ChatId) -> Option<&Chat> {
        self.chats.iter().find(|c| &c.id == id)
    }

    /// Chats whose other participant's name contains `term` (case-insensitive).
    #[must_use]
    pub fn search(&self, term: &str) -> Vec<&Chat> {
        let needle = term.to_lowercase();
        self.chats
            .iter()
            .filter(|chat| {
                chat.other_participant(&self.me)
                    .and_then(|p| p.user.name.as_deref())
                    .is_some_and(|name| name.to_lowercase().contains(&needle))
            })
            .collect()
    }

    /// Current unread count.
    #[must_use]
    pub const fn unread_count(&self) -> u64 {
        self.unread
    }

    /// The chat currently visible, if any.
    #[must_use]
    pub const fn active(&self) -> Option<&ChatId> {
        self.active.as_ref()
    }

    /// Apply a `new_message` event.
    ///
    /// Patches the chat's preview and moves it to the front. Counts the
    /// message as unread exactly once if its chat is not the active one and
    /// someone else sent it. `chat` is the updated chat document when the
    /// event carried one; it is used to add chats the list did not know.
    /// Returns `true` if the unread counter changed.
    pub fn apply_new_message(&mut self, message: &Message, chat: Option<&Chat>) -> bool {
        if !self.remember(&message.id) {
            return false;
        }

        if let Some(entry) = self.chats.iter_mut().find(|c| c.id == message.chat_id) {
            entry.last_message = Some(message.clone());
            entry.last_activity = entry.last_activity.max(message.created_at);
        } else if let Some(chat) = chat.filter(|c| c.id == message.chat_id) {
            let mut chat = chat.clone();
            chat.last_message = Some(message.clone());
            chat.last_activity = chat.last_activity.max(message.created_at);
            self.chats.push(chat);
        }
        self.chats
            .sort_by(|a, b| b.last_activity.cmp(&a.last_activity));

        if message.sender.id == self.me {
            return false;
        }
        if self.active.as_ref() == Some(&message.chat_id) {
            // Seen as it arrived: the preview must not read as unread later.
            let me = self.me.clone();
            if let Some(last) = self
                .chats
                .iter_mut()
                .find(|c| c.id == message.chat_id)
                .and_then(|c| c.last_message.as_mut())
            {
                last.add_reader(&me, message.created_at);
            }
            return false;
        }
        self.unread += 1;
        *self.contributions.entry(message.chat_id.clone()).or_default() += 1;
        true
    }

    /// Apply a `messages_read` event. Only the local user's own receipts
    /// (e.g. from another tab) affect the counter.
    pub fn apply_read(&mut self, event: &MessagesRead) -> bool {
        if event.user_id != self.me {
            return false;
        }
        self.clear_chat_unread(&event.chat_id, event.read_at)
    }

    /// The user opened `chat`: it becomes active and its unread share is
    /// subtracted (floored at 0). Returns `true` if the counter changed.
    pub fn open_chat(&mut self, chat: &ChatId) -> bool {
        self.active = Some(chat.clone());
        self.clear_chat_unread(chat, chrono::Utc::now())
    }

    /// The view for `chat` closed.
    pub fn close_chat(&mut self, chat: &ChatId) {
        if self.active.as_ref() == Some(chat) {
            self.active = None;
        }
    }

    /// Replace the counter with the server's authoritative value.
    pub fn resync(&mut self, count: u64) -> bool {
        if count != self.unread {
            tracing::debug!(local = self.unread, server = count, "unread count corrected");
        }
        self.contributions.clear();
        let changed = self.unread != count;
        self.unread = count;
        changed
    }

    /// Forget everything (session ended).
    pub fn reset(&mut self) {
        self.chats.clear();
        self.active = None;
        self.unread = 0;
        self.contributions.clear();
        self.seen.clear();
        self.seen_order.clear();
    }

    fn clear_chat_unread(&mut self, chat: &ChatId, read_at: chrono::DateTime<chrono::Utc>) -> bool {
        let me = self.me.clone();
        let share = self.contributions.remove(chat).unwrap_or(0);
        let entry = self.chats.iter_mut().find(|c| &c.id == chat);
        let decrement = if share > 0 {
            share
        } else {
            u64::from(entry.as_ref().is_some_and(|c| c.is_unread_for(&me)))
        };
        if let Some(last) = entry.and_then(|c| c.last_message.as_mut()) {
            if last.sender.id != me {
                last.add_reader(&me, read_at);
            }
        }
        let before = self.unread;
        self.unread = self.unread.saturating_sub(decrement);
        before != self.unread
    }

    /// Returns `false` if the id was already seen.
    fn remember(&mut self, id: &MessageId) -> bool {
        if !self.seen.insert(id.clone()) {
            return false;
        }
        self.seen_order.push_back(id.clone());
        if self.seen_order.len() > SEEN_CAPACITY {
            if let Some(oldest) = self.seen_order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
        true
    }
}
