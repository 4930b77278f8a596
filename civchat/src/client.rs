//! Session-scoped facade over the chat core.
//!
//! [`ChatClient`] owns the single push channel, the presence tracker and the
//! inbox, and hands out [`ChatView`]s. Everything it spawns is torn down on
//! [`stop`](ChatClient::stop) or when a different session starts.

use std::collections::BTreeSet;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use civchat_proto::chat::Chat;
use civchat_proto::event::{EventKind, ServerEvent};
use civchat_proto::message::{ChatId, UserId};

use crate::api::ChatApi;
use crate::bus::{EventBus, Subscription};
use crate::chat::ChatError;
use crate::chat::inbox::Inbox;
use crate::chat::presence::PresenceTracker;
use crate::chat::view::{ChatView, ViewContext, ViewEvent};
use crate::config::{ChatConfig, ClientConfig};
use crate::connection::{ConnectionManager, EventSink};
use crate::session::AuthSession;
use crate::transport::Connector;

/// Client-wide change notifications.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClientUpdate {
    /// The online set changed.
    Presence(BTreeSet<UserId>),
    /// The chat list or unread counter changed.
    Inbox {
        /// Current unread count.
        unread: u64,
    },
}

/// Entry point for the chat core.
pub struct ChatClient<K: Connector, A: ChatApi> {
    connection: Arc<ConnectionManager<K>>,
    api: Arc<A>,
    presence: Arc<PresenceTracker>,
    inbox: Arc<Mutex<Inbox>>,
    config: ChatConfig,
    updates: mpsc::Sender<ClientUpdate>,
    session: Mutex<Option<AuthSession>>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl<K: Connector, A: ChatApi> ChatClient<K, A> {
    /// Build a client. Nothing connects until [`start`](Self::start).
    #[must_use]
    pub fn new(connector: K, api: A, config: &ClientConfig) -> (Self, mpsc::Receiver<ClientUpdate>) {
        let bus = EventBus::new(config.connection.event_buffer);
        let (updates, rx) = mpsc::channel(config.chat.event_buffer.max(1));
        let client = Self {
            connection: Arc::new(ConnectionManager::new(
                connector,
                config.connection.clone(),
                bus,
            )),
            api: Arc::new(api),
            presence: Arc::new(PresenceTracker::new()),
            inbox: Arc::new(Mutex::new(Inbox::new(UserId::new(String::new())))),
            config: config.chat.clone(),
            updates,
            session: Mutex::new(None),
            tasks: Mutex::new(Vec::new()),
        };
        (client, rx)
    }

    /// Start (or keep) the session.
    ///
    /// Starting the session that is already running is a no-op. A different
    /// session replaces the current one: its channel, tasks and state are
    /// dropped first.
    pub async fn start(&self, session: AuthSession) {
        let running = self.session.lock().as_ref() == Some(&session);
        if running {
            // Revives the channel if it reached a terminal state.
            self.connection.start(session).await;
            return;
        }
        self.stop().await;

        *self.inbox.lock() = Inbox::new(session.user_id.clone());
        *self.session.lock() = Some(session.clone());

        // Subscribe before connecting so the first snapshot is not missed.
        let bus = self.connection.bus();
        let presence_events = bus.subscribe(&[
            EventKind::OnlineUsers,
            EventKind::UserOnline,
            EventKind::UserOffline,
        ]);
        let inbox_events = bus.subscribe(&[EventKind::NewMessage, EventKind::MessagesRead]);

        let tasks = vec![
            tokio::spawn(presence_pump(
                presence_events,
                Arc::clone(&self.presence),
                self.updates.clone(),
            )),
            tokio::spawn(inbox_pump(
                inbox_events,
                Arc::clone(&self.inbox),
                self.updates.clone(),
            )),
            tokio::spawn(unread_poll(
                Arc::clone(&self.api),
                session.clone(),
                Arc::clone(&self.inbox),
                self.updates.clone(),
                self.config.unread_poll,
            )),
        ];
        *self.tasks.lock() = tasks;

        self.connection.start(session).await;
        if let Err(e) = self.refresh_chats().await {
            tracing::warn!(err = %e, "chat list not loaded");
        }
    }

    /// End the session: close the channel and forget all session state.
    pub async fn stop(&self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
        self.connection.stop().await;
        self.presence.clear();
        self.inbox.lock().reset();
        if self.session.lock().take().is_some() {
            tracing::info!("chat session stopped");
        }
    }

    /// The current session, if started.
    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.session.lock().clone()
    }

    /// The connection manager.
    #[must_use]
    pub fn connection(&self) -> &ConnectionManager<K> {
        &self.connection
    }

    /// The presence tracker.
    #[must_use]
    pub fn presence(&self) -> &PresenceTracker {
        &self.presence
    }

    /// Users currently online.
    #[must_use]
    pub fn online_users(&self) -> BTreeSet<UserId> {
        self.presence.get_online()
    }

    /// Current unread count.
    #[must_use]
    pub fn unread_count(&self) -> u64 {
        self.inbox.lock().unread_count()
    }

    /// Chats, most recent first.
    #[must_use]
    pub fn chats(&self) -> Vec<Chat> {
        self.inbox.lock().chats().to_vec()
    }

    /// Chats whose peer name contains `term`.
    #[must_use]
    pub fn search(&self, term: &str) -> Vec<Chat> {
        self.inbox
            .lock()
            .search(term)
            .into_iter()
            .cloned()
            .collect()
    }

    /// Reload the chat list from the server. Returns the number of chats.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] before `start`, [`ChatError::Api`] if the
    /// request fails.
    pub async fn refresh_chats(&self) -> Result<usize, ChatError> {
        let session = self.require_session()?;
        let page = self
            .api
            .list_chats(&session, 1, self.config.page_size)
            .await?;
        let count = page.chats.len();
        let unread = {
            let mut inbox = self.inbox.lock();
            inbox.load(page.chats);
            inbox.unread_count()
        };
        tracing::debug!(chats = count, "chat list loaded");
        notify(&self.updates, ClientUpdate::Inbox { unread });
        Ok(count)
    }

    /// Replace the unread counter with the server's count now.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] before `start`, [`ChatError::Api`] if the
    /// request fails.
    pub async fn sync_unread(&self) -> Result<u64, ChatError> {
        let session = self.require_session()?;
        let count = self.api.unread_count(&session).await?;
        if self.inbox.lock().resync(count) {
            notify(&self.updates, ClientUpdate::Inbox { unread: count });
        }
        Ok(count)
    }

    /// Open a view on `chat_id`.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] before `start`.
    pub async fn open_chat(
        &self,
        chat_id: ChatId,
    ) -> Result<(ChatView<A>, mpsc::Receiver<ViewEvent>), ChatError> {
        let session = self.require_session()?;
        let sink: Arc<dyn EventSink> = self.connection.clone();
        let ctx = ViewContext {
            sink,
            bus: self.connection.bus().clone(),
            state: self.connection.watch_state(),
            api: Arc::clone(&self.api),
            session,
            inbox: Arc::clone(&self.inbox),
            config: self.config.clone(),
        };
        let opened = ChatView::open(ctx, chat_id).await;
        let unread = self.inbox.lock().unread_count();
        notify(&self.updates, ClientUpdate::Inbox { unread });
        Ok(opened)
    }

    /// Resolve (or create) the chat with `peer` and open it.
    ///
    /// # Errors
    ///
    /// [`ChatError::NoSession`] before `start`, [`ChatError::Api`] if the
    /// chat cannot be resolved (including `SelfChat`).
    pub async fn open_chat_with(
        &self,
        peer: &UserId,
    ) -> Result<(ChatView<A>, mpsc::Receiver<ViewEvent>), ChatError> {
        let session = self.require_session()?;
        let chat = self.api.get_or_create_chat(&session, peer).await?;
        let chat_id = chat.id.clone();
        self.inbox.lock().insert_chat(chat);
        self.open_chat(chat_id).await
    }

    fn require_session(&self) -> Result<AuthSession, ChatError> {
        self.session.lock().clone().ok_or(ChatError::NoSession)
    }
}

impl<K: Connector, A: ChatApi> Drop for ChatClient<K, A> {
    fn drop(&mut self) {
        for task in self.tasks.lock().drain(..) {
            task.abort();
        }
    }
}

fn notify(updates: &mpsc::Sender<ClientUpdate>, update: ClientUpdate) {
    if let Err(mpsc::error::TrySendError::Full(update)) = updates.try_send(update) {
        tracing::debug!(?update, "client update dropped, receiver lagging");
    }
}

async fn presence_pump(
    mut events: Subscription,
    presence: Arc<PresenceTracker>,
    updates: mpsc::Sender<ClientUpdate>,
) {
    while let Some(event) = events.recv().await {
        if presence.handle(&event) {
            notify(&updates, ClientUpdate::Presence(presence.get_online()));
        }
    }
}

async fn inbox_pump(
    mut events: Subscription,
    inbox: Arc<Mutex<Inbox>>,
    updates: mpsc::Sender<ClientUpdate>,
) {
    while let Some(event) = events.recv().await {
        let unread = {
            let mut inbox = inbox.lock();
            match &event {
                ServerEvent::NewMessage(new) => {
                    inbox.apply_new_message(&new.message, new.chat.as_ref());
                }
                ServerEvent::MessagesRead(read) => {
                    if !inbox.apply_read(read) {
                        continue;
                    }
                }
                _ => continue,
            }
            inbox.unread_count()
        };
        notify(&updates, ClientUpdate::Inbox { unread });
    }
}

/// Periodic resync against the server's authoritative unread count. The
/// first tick fires immediately.
async fn unread_poll<A: ChatApi>(
    api: Arc<A>,
    session: AuthSession,
    inbox: Arc<Mutex<Inbox>>,
    updates: mpsc::Sender<ClientUpdate>,
    period: std::time::Duration,
) {
    let mut ticker = tokio::time::interval(period.max(std::time::Duration::from_secs(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        match api.unread_count(&session).await {
            Ok(count) => {
                if inbox.lock().resync(count) {
                    notify(&updates, ClientUpdate::Inbox { unread: count });
                }
            }
            Err(e) => tracing::warn!(err = %e, "unread count resync failed"),
        }
    }
}
