//! Message stream reconciler.
//!
//! Merges the two delivery paths for one chat into a single sequence:
//! pulled pages from `GET /chats/{id}/messages` and pushed `new_message`
//! events. The message id is the de-duplication key; `createdAt` is the
//! ordering key, with ties kept in arrival order.
//!
//! ```text
//! Empty --begin_load--> Loading --finish_load--> Loaded
//!                                                  |  ^
//!                                                  +--+ later pages, pushes
//! ```
//!
//! A failed load leaves the sequence untouched and is reported to the
//! caller. Responses for a superseded load (see [`LoadTicket`]) are ignored.

use std::collections::HashSet;

use chrono::{DateTime, Utc};

use civchat_proto::chat::{MessagePage, Pagination};
use civchat_proto::message::{ChatId, Message, MessageId, UserId};

/// Load state of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamState {
    /// Nothing loaded yet.
    Empty,
    /// A load is in flight.
    Loading,
    /// At least one page has been applied.
    Loaded,
}

/// Handle for one in-flight page load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTicket {
    chat_id: ChatId,
    page: u32,
    generation: u64,
}

impl LoadTicket {
    /// Page this ticket loads.
    #[must_use]
    pub const fn page(&self) -> u32 {
        self.page
    }
}

/// Result of applying a load response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The page was merged; `added` messages were new.
    Applied {
        /// Messages not already present.
        added: usize,
    },
    /// The load was superseded; nothing changed.
    Stale,
}

/// Delivery status of one of the local user's own messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageStatus {
    /// Stored by the server, nobody else read it yet.
    Delivered,
    /// Read by at least one other participant.
    Read,
}

/// Ordered, de-duplicated messages of one chat.
pub struct MessageStream {
    chat_id: ChatId,
    state: StreamState,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    pagination: Option<Pagination>,
    /// Highest page applied so far.
    last_page: u32,
    generation: u64,
    /// Pushed messages that arrived while the seeding page was in flight.
    pushed_during_seed: Option<Vec<Message>>,
}

impl MessageStream {
    /// Empty stream for `chat_id`.
    #[must_use]
    pub fn new(chat_id: ChatId) -> Self {
        Self {
            chat_id,
            state: StreamState::Empty,
            messages: Vec::new(),
            ids: HashSet::new(),
            pagination: None,
            last_page: 0,
            generation: 0,
            pushed_during_seed: None,
        }
    }

    /// Chat this stream belongs to.
    #[must_use]
    pub const fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Current load state.
    #[must_use]
    pub const fn state(&self) -> StreamState {
        self.state
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Number of messages held.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the stream holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    /// Whether `id` is present.
    #[must_use]
    pub fn contains(&self, id: &MessageId) -> bool {
        self.ids.contains(id)
    }

    /// Whether the server reported more pages after the last one loaded.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.pagination.is_some_and(|p| p.has_more())
    }

    /// Page to request next: 1 before anything loaded, then one past the
    /// highest page applied.
    #[must_use]
    pub const fn next_page(&self) -> u32 {
        self.last_page + 1
    }

    /// Start loading `page`.
    ///
    /// Page 1 is the seed: when it lands it replaces the sequence, keeping
    /// anything pushed in the meantime.
    pub fn begin_load(&mut self, page: u32) -> LoadTicket {
        let page = page.max(1);
        if page == 1 {
            // Pushes that beat the first page are carried over too.
            let carried = if self.last_page == 0 {
                self.messages.clone()
            } else {
                Vec::new()
            };
            self.pushed_during_seed = Some(carried);
        }
        if self.state == StreamState::Empty {
            self.state = StreamState::Loading;
        }
        LoadTicket {
            chat_id: self.chat_id.clone(),
            page,
            generation: self.generation,
        }
    }

    /// Apply a successful load.
    pub fn finish_load(&mut self, ticket: &LoadTicket, page: MessagePage) -> LoadOutcome {
        if !self.is_current(ticket) {
            tracing::debug!(chat = %ticket.chat_id, page = ticket.page, "stale page response ignored");
            return LoadOutcome::Stale;
        }

        let added = if ticket.page == 1 {
            let pushed = self.pushed_during_seed.take().unwrap_or_default();
            let before = self.ids.clone();
            self.messages.clear();
            self.ids.clear();
            for message in page.messages.into_iter().chain(pushed) {
                if message.chat_id == self.chat_id {
                    self.insert(message);
                }
            }
            self.ids.difference(&before).count()
        } else {
            let mut added = 0;
            for message in page.messages {
                if message.chat_id == self.chat_id && self.insert(message) {
                    added += 1;
                }
            }
            added
        };

        self.last_page = self.last_page.max(ticket.page);
        self.pagination = Some(page.pagination);
        self.state = StreamState::Loaded;
        LoadOutcome::Applied { added }
    }

    /// Record a failed load. The sequence keeps its last good value.
    pub fn fail_load(&mut self, ticket: &LoadTicket) -> LoadOutcome {
        if !self.is_current(ticket) {
            return LoadOutcome::Stale;
        }
        if ticket.page == 1 {
            // Keep what was pushed while waiting.
            self.pushed_during_seed = None;
        }
        if self.state == StreamState::Loading {
            self.state = if self.last_page == 0 {
                StreamState::Empty
            } else {
                StreamState::Loaded
            };
        }
        LoadOutcome::Applied { added: 0 }
    }

    /// Apply a pushed message. Returns `true` if it was new.
    ///
    /// Messages for another chat are ignored.
    pub fn apply_incoming(&mut self, message: Message) -> bool {
        if message.chat_id != self.chat_id || self.ids.contains(&message.id) {
            return false;
        }
        if let Some(pending) = self.pushed_during_seed.as_mut() {
            pending.push(message.clone());
        }
        self.insert(message)
    }

    /// Apply a `messages_read` receipt from `reader`.
    ///
    /// Every message authored by someone other than `reader` gains a
    /// `{reader, read_at}` entry unless it already has one. Returns the
    /// number of messages updated.
    pub fn apply_read(&mut self, reader: &UserId, read_at: DateTime<Utc>) -> usize {
        self.messages
            .iter_mut()
            .filter(|m| &m.sender.id != reader)
            .map(|m| usize::from(m.add_reader(reader, read_at)))
            .sum()
    }

    /// Status of one of `me`'s own messages.
    #[must_use]
    pub fn status_of(&self, id: &MessageId, me: &UserId) -> Option<MessageStatus> {
        let message = self.messages.iter().find(|m| &m.id == id)?;
        if &message.sender.id != me {
            return None;
        }
        Some(if message.read_by.iter().any(|r| &r.user != me) {
            MessageStatus::Read
        } else {
            MessageStatus::Delivered
        })
    }

    /// Drop everything and invalidate in-flight loads.
    pub fn reset(&mut self) {
        self.generation += 1;
        self.state = StreamState::Empty;
        self.messages.clear();
        self.ids.clear();
        self.pagination = None;
        self.last_page = 0;
        self.pushed_during_seed = None;
    }

    fn is_current(&self, ticket: &LoadTicket) -> bool {
        ticket.generation == self.generation && ticket.chat_id == self.chat_id
    }

    /// Stable insert by `createdAt`: equal timestamps go after existing ones.
    fn insert(&mut self, message: Message) -> bool {
        if !self.ids.insert(message.id.clone()) {
            return false;
        }
        let at = self
            .messages
            .partition_point(|m| m.created_at <= message.created_at);
        self.messages.insert(at, message);
        true
    }
}
