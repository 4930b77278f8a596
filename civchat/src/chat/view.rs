//! Per-chat view: the scope that exists while one chat is on screen.
//!
//! A [`ChatView`] owns the room membership, the message stream, typing state
//! and read receipts for one chat. Its pump task consumes the chat-scoped
//! push events and re-joins the room whenever the connection reopens.
//! Dropping the view leaves the room, flushes typing, releases the
//! subscription and marks the chat inactive in the inbox.

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use civchat_proto::event::{ClientEvent, EventKind, NewMessage, SendMessage, ServerEvent};
use civchat_proto::message::{ChatId, Message, MessageId, UserId, validate_content};

use super::ChatError;
use super::inbox::Inbox;
use super::receipts::ReadReceipts;
use super::room::RoomMembership;
use super::stream::{LoadOutcome, MessageStatus, MessageStream, StreamState};
use super::typing::{RemoteTyping, TypingNotifier};
use crate::api::ChatApi;
use crate::bus::{EventBus, Subscription};
use crate::config::ChatConfig;
use crate::connection::{ConnectionState, EventSink};
use crate::session::AuthSession;

/// Change notifications for the UI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ViewEvent {
    /// The message sequence changed; re-read [`ChatView::messages`].
    Messages,
    /// The set of remote users typing changed.
    Typing(Vec<UserId>),
    /// A participant read the chat.
    ReadBy {
        /// Reader.
        user: UserId,
        /// Messages that gained a receipt.
        updated: usize,
    },
    /// A page fetch failed. Not retried.
    LoadFailed {
        /// Page that failed.
        page: u32,
        /// Human-readable cause.
        error: String,
    },
}

/// Collaborators a view needs, shared with the owning client.
pub struct ViewContext<A> {
    /// Outbound push events.
    pub sink: Arc<dyn EventSink>,
    /// Inbound push events.
    pub bus: EventBus,
    /// Connection state, used to re-join after a reconnect.
    pub state: watch::Receiver<ConnectionState>,
    /// REST endpoints.
    pub api: Arc<A>,
    /// Current session.
    pub session: AuthSession,
    /// Cross-chat summary, told which chat is active.
    pub inbox: Arc<Mutex<Inbox>>,
    /// Tunables.
    pub config: ChatConfig,
}

impl<A> Clone for ViewContext<A> {
    fn clone(&self) -> Self {
        Self {
            sink: Arc::clone(&self.sink),
            bus: self.bus.clone(),
            state: self.state.clone(),
            api: Arc::clone(&self.api),
            session: self.session.clone(),
            inbox: Arc::clone(&self.inbox),
            config: self.config.clone(),
        }
    }
}

struct ViewState {
    stream: MessageStream,
    remote: RemoteTyping,
}

/// Handle for one visible chat.
pub struct ChatView<A: ChatApi> {
    chat_id: ChatId,
    ctx: ViewContext<A>,
    state: Arc<Mutex<ViewState>>,
    rooms: Arc<RoomMembership>,
    typing: TypingNotifier,
    updates: mpsc::Sender<ViewEvent>,
    pump: JoinHandle<()>,
}

impl<A: ChatApi> ChatView<A> {
    /// Open `chat_id`: subscribe, join the room, mark it read and load the
    /// first page.
    ///
    /// A failed first load is reported as [`ViewEvent::LoadFailed`]; the view
    /// stays usable and pushed messages still arrive.
    pub async fn open(ctx: ViewContext<A>, chat_id: ChatId) -> (Self, mpsc::Receiver<ViewEvent>) {
        let (updates, rx) = mpsc::channel(ctx.config.event_buffer.max(1));
        let events = ctx.bus.subscribe_chat(
            &[
                EventKind::NewMessage,
                EventKind::UserTyping,
                EventKind::MessagesRead,
            ],
            chat_id.clone(),
        );
        let me = ctx.session.user_id.clone();
        let state = Arc::new(Mutex::new(ViewState {
            stream: MessageStream::new(chat_id.clone()),
            remote: RemoteTyping::new(me.clone(), ctx.config.remote_typing_ttl),
        }));
        let rooms = Arc::new(RoomMembership::new(Arc::clone(&ctx.sink)));
        let receipts = Arc::new(ReadReceipts::new(Arc::clone(&ctx.sink)));
        let typing = TypingNotifier::new(
            chat_id.clone(),
            Arc::clone(&ctx.sink),
            ctx.config.typing_idle,
        );

        ctx.inbox.lock().open_chat(&chat_id);
        let mut conn = ctx.state.clone();
        if conn.borrow_and_update().is_open() {
            rooms.join(&chat_id);
            receipts.mark_read(&chat_id);
        }

        let pump = tokio::spawn(
            Pump {
                chat_id: chat_id.clone(),
                me,
                events,
                conn,
                state: Arc::clone(&state),
                rooms: Arc::clone(&rooms),
                receipts,
                updates: updates.clone(),
            }
            .run(),
        );
        tracing::debug!(chat = %chat_id, "chat view opened");

        let view = Self {
            chat_id,
            ctx,
            state,
            rooms,
            typing,
            updates,
            pump,
        };
        // Already reported through the update channel.
        let _ = view.load(1).await;
        (view, rx)
    }

    /// Chat shown by this view.
    #[must_use]
    pub const fn chat_id(&self) -> &ChatId {
        &self.chat_id
    }

    /// Messages in display order.
    #[must_use]
    pub fn messages(&self) -> Vec<Message> {
        self.state.lock().stream.messages().to_vec()
    }

    /// Load state of the stream.
    #[must_use]
    pub fn stream_state(&self) -> StreamState {
        self.state.lock().stream.state()
    }

    /// Whether older pages remain.
    #[must_use]
    pub fn has_more(&self) -> bool {
        self.state.lock().stream.has_more()
    }

    /// Remote users typing in this chat.
    #[must_use]
    pub fn typing_users(&self) -> Vec<UserId> {
        self.state.lock().remote.typing_users(&self.chat_id)
    }

    /// Delivery status of one of the local user's messages.
    #[must_use]
    pub fn status_of(&self, id: &MessageId) -> Option<MessageStatus> {
        self.state
            .lock()
            .stream
            .status_of(id, &self.ctx.session.user_id)
    }

    /// The room currently joined, if any.
    #[must_use]
    pub fn joined(&self) -> Option<ChatId> {
        self.rooms.joined()
    }

    /// Record a local keystroke for the typing indicator.
    pub fn keystroke(&self) {
        self.typing.keystroke();
    }

    /// Drop the sequence and fetch the first page again.
    ///
    /// # Errors
    ///
    /// [`ChatError::LoadFailure`] if the fetch fails.
    pub async fn reload(&self) -> Result<LoadOutcome, ChatError> {
        self.state.lock().stream.reset();
        self.load(1).await
    }

    /// Fetch the next older page. Returns `None` when there is nothing more.
    ///
    /// # Errors
    ///
    /// [`ChatError::LoadFailure`] if the fetch fails.
    pub async fn load_more(&self) -> Result<Option<LoadOutcome>, ChatError> {
        let next = {
            let state = self.state.lock();
            if !state.stream.has_more() {
                return Ok(None);
            }
            state.stream.next_page()
        };
        self.load(next).await.map(Some)
    }

    /// Send a text message over both delivery paths.
    ///
    /// The push emission is fire-and-forget. The backup REST call is awaited
    /// and its result merged by id, so a message delivered by both paths
    /// appears once. A backup failure after the push went out is only
    /// logged. Returns the stored message when the backup path succeeded.
    ///
    /// # Errors
    ///
    /// [`ChatError::Validation`] for blank or oversized content, and
    /// [`ChatError::NotConnected`] when neither path delivered the message.
    pub async fn send(&self, content: &str) -> Result<Option<Message>, ChatError> {
        let content = validate_content(content)?;
        self.typing.flush();

        let pushed = match self.ctx.sink.emit(ClientEvent::SendMessage(SendMessage::text(
            self.chat_id.clone(),
            content,
        ))) {
            Ok(()) => true,
            Err(e) => {
                tracing::debug!(chat = %self.chat_id, err = %e, "push send not emitted");
                false
            }
        };

        match self
            .ctx
            .api
            .send_message(&self.ctx.session, &self.chat_id, content)
            .await
        {
            Ok(message) => {
                if self.state.lock().stream.apply_incoming(message.clone()) {
                    self.notify(ViewEvent::Messages);
                }
                Ok(Some(message))
            }
            Err(e) if pushed => {
                let err = ChatError::SendFailure(e);
                tracing::warn!(chat = %self.chat_id, err = %err, "backup send failed");
                Ok(None)
            }
            Err(e) => {
                tracing::warn!(chat = %self.chat_id, err = %e, "message not delivered");
                Err(ChatError::NotConnected)
            }
        }
    }

    async fn load(&self, page: u32) -> Result<LoadOutcome, ChatError> {
        let ticket = self.state.lock().stream.begin_load(page);
        let result = self
            .ctx
            .api
            .get_messages(
                &self.ctx.session,
                &self.chat_id,
                ticket.page(),
                self.ctx.config.page_size,
            )
            .await;

        match result {
            Ok(body) => {
                let outcome = self.state.lock().stream.finish_load(&ticket, body);
                if matches!(outcome, LoadOutcome::Applied { .. }) {
                    self.notify(ViewEvent::Messages);
                }
                Ok(outcome)
            }
            Err(source) => {
                let outcome = self.state.lock().stream.fail_load(&ticket);
                tracing::warn!(chat = %self.chat_id, page = ticket.page(), err = %source, "message page failed to load");
                if outcome != LoadOutcome::Stale {
                    self.notify(ViewEvent::LoadFailed {
                        page: ticket.page(),
                        error: source.to_string(),
                    });
                }
                Err(ChatError::LoadFailure {
                    chat_id: self.chat_id.clone(),
                    source,
                })
            }
        }
    }

    fn notify(&self, event: ViewEvent) {
        notify(&self.updates, event);
    }
}

impl<A: ChatApi> Drop for ChatView<A> {
    fn drop(&mut self) {
        self.pump.abort();
        self.typing.flush();
        self.rooms.leave(&self.chat_id);
        self.state.lock().stream.reset();
        self.ctx.inbox.lock().close_chat(&self.chat_id);
        tracing::debug!(chat = %self.chat_id, "chat view closed");
    }
}

fn notify(updates: &mpsc::Sender<ViewEvent>, event: ViewEvent) {
    if let Err(mpsc::error::TrySendError::Full(event)) = updates.try_send(event) {
        tracing::debug!(?event, "view update dropped, receiver lagging");
    }
}

/// Background consumer of the view's push events.
struct Pump {
    chat_id: ChatId,
    me: UserId,
    events: Subscription,
    conn: watch::Receiver<ConnectionState>,
    state: Arc<Mutex<ViewState>>,
    rooms: Arc<RoomMembership>,
    receipts: Arc<ReadReceipts>,
    updates: mpsc::Sender<ViewEvent>,
}

impl Pump {
    async fn run(mut self) {
        loop {
            tokio::select! {
                event = self.events.recv() => {
                    let Some(event) = event else { break };
                    self.handle(event);
                }
                changed = self.conn.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let open = self.conn.borrow_and_update().is_open();
                    if open {
                        // Membership is lost with the old channel.
                        self.rooms.join(&self.chat_id);
                        self.receipts.mark_read(&self.chat_id);
                    } else {
                        self.clear_remote_typing();
                    }
                }
            }
        }
    }

    /// Stop events sent while the channel is down never arrive.
    fn clear_remote_typing(&self) {
        let had_typing = {
            let mut state = self.state.lock();
            let had_typing = !state.remote.typing_users(&self.chat_id).is_empty();
            state.remote.clear_chat(&self.chat_id);
            had_typing
        };
        if had_typing {
            notify(&self.updates, ViewEvent::Typing(Vec::new()));
        }
    }

    fn handle(&self, event: ServerEvent) {
        match event {
            ServerEvent::NewMessage(NewMessage { message, .. }) => {
                let from_peer = message.sender.id != self.me;
                let added = self.state.lock().stream.apply_incoming(message);
                if added {
                    notify(&self.updates, ViewEvent::Messages);
                    if from_peer {
                        self.receipts.mark_read(&self.chat_id);
                    }
                }
            }
            ServerEvent::UserTyping(typing) => {
                let users = {
                    let mut state = self.state.lock();
                    if !state.remote.apply(&typing) {
                        return;
                    }
                    state.remote.typing_users(&self.chat_id)
                };
                notify(&self.updates, ViewEvent::Typing(users));
            }
            ServerEvent::MessagesRead(read) => {
                let updated = {
                    let mut state = self.state.lock();
                    self.receipts.apply(&mut state.stream, &read)
                };
                if updated > 0 {
                    notify(
                        &self.updates,
                        ViewEvent::ReadBy {
                            user: read.user_id,
                            updated,
                        },
                    );
                }
            }
            other => {
                tracing::trace!(kind = ?other.kind(), "unexpected event for chat view");
            }
        }
    }
}
