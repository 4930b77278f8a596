//! Connection manager: one push channel per authenticated session.
//!
//! [`ConnectionManager::start`] spawns a supervisor task that owns the
//! channel. The supervisor connects, pumps events both ways, and decides
//! what happens when the channel ends:
//!
//! - transport drop: `ReconnectPending`, then a single attempt after
//!   `reconnect_delay`
//! - deliberate server disconnect: terminal `Closed`
//! - auth rejection: terminal `Closed`, the auth layer must log in again
//!
//! State is only ever changed by the supervisor (and by `stop`), never by UI
//! code. Observers read it through [`ConnectionManager::watch_state`].

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use uuid::Uuid;

use civchat_proto::event::{ClientEvent, EventKind, ServerEvent};

use crate::bus::{EventBus, Subscription};
use crate::config::ConnectionConfig;
use crate::session::AuthSession;
use crate::transport::{Channel, ConnectionError, Connector};

/// Identifier of one connect attempt, for log correlation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnectionId(Uuid);

impl ConnectionId {
    fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl fmt::Display for ConnectionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Why a connection reached `Closed`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CloseReason {
    /// Stopped by the client (logout, session change) or never started.
    Stopped,
    /// The backend ended the session on purpose. No reconnect.
    ServerDisconnect,
    /// The backend refused the token. The caller must log in again.
    AuthRejected(String),
    /// `max_reconnect_attempts` consecutive reconnects failed.
    ReconnectExhausted,
}

/// Observable connection state.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    /// A connect attempt is in flight.
    Connecting,
    /// Handshake complete; events flow.
    Open {
        /// Backend-assigned socket id.
        socket_id: String,
    },
    /// The transport dropped; one reconnect is scheduled.
    ReconnectPending {
        /// Consecutive failures so far.
        attempt: u32,
    },
    /// No channel, and none will be opened without a new `start`.
    Closed {
        /// How it got here.
        reason: CloseReason,
    },
}

impl ConnectionState {
    /// Whether events can be emitted.
    #[must_use]
    pub const fn is_open(&self) -> bool {
        matches!(self, Self::Open { .. })
    }
}

/// Fire-and-forget emission of client events.
///
/// Implemented by [`ConnectionManager`]; components that only emit (rooms,
/// typing, receipts) depend on this instead of the manager itself.
pub trait EventSink: Send + Sync {
    /// Emit `event` if the channel is open.
    ///
    /// # Errors
    ///
    /// [`ConnectionError::NotOpen`] when the event was dropped because the
    /// channel is not open, [`ConnectionError::QueueFull`] when the outbound
    /// queue is saturated.
    fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError>;

    /// Whether the channel is currently open.
    fn is_open(&self) -> bool;
}

struct Shared<K> {
    connector: K,
    config: ConnectionConfig,
    bus: EventBus,
    state_tx: watch::Sender<ConnectionState>,
}

impl<K> Shared<K> {
    fn set_state(&self, connection: ConnectionId, state: ConnectionState) {
        tracing::info!(connection = %connection, ?state, "connection state changed");
        self.state_tx.send_replace(state);
    }
}

struct ActiveSession {
    session: AuthSession,
    outbound: mpsc::Sender<ClientEvent>,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Owns the push channel for the current session.
pub struct ConnectionManager<K: Connector> {
    shared: Arc<Shared<K>>,
    active: Mutex<Option<ActiveSession>>,
}

impl<K: Connector> ConnectionManager<K> {
    /// Create a manager. No channel is opened until [`start`](Self::start).
    #[must_use]
    pub fn new(connector: K, config: ConnectionConfig, bus: EventBus) -> Self {
        let (state_tx, _) = watch::channel(ConnectionState::Closed {
            reason: CloseReason::Stopped,
        });
        Self {
            shared: Arc::new(Shared {
                connector,
                config,
                bus,
                state_tx,
            }),
            active: Mutex::new(None),
        }
    }

    /// Open the channel for `session`.
    ///
    /// A no-op if the same session is already running. A different session
    /// (or a finished one) is torn down first, so there is never more than
    /// one live channel.
    pub async fn start(&self, session: AuthSession) {
        {
            let active = self.active.lock();
            if let Some(current) = active.as_ref()
                && current.session == session
                && !current.task.is_finished()
            {
                tracing::debug!(user = %session.user_id, "session already running");
                return;
            }
        }
        self.stop().await;

        let (outbound_tx, outbound_rx) = mpsc::channel(self.shared.config.event_buffer);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        tracing::info!(user = %session.user_id, "starting push channel");
        let task = tokio::spawn(supervise(
            Arc::clone(&self.shared),
            session.clone(),
            outbound_rx,
            shutdown_rx,
        ));

        *self.active.lock() = Some(ActiveSession {
            session,
            outbound: outbound_tx,
            shutdown: shutdown_tx,
            task,
        });
    }

    /// Tear down the channel and cancel any pending reconnect.
    ///
    /// Ends in `Closed { Stopped }`. Safe to call when nothing is running.
    pub async fn stop(&self) {
        let taken = self.active.lock().take();
        let Some(active) = taken else {
            return;
        };
        tracing::info!(user = %active.session.user_id, "stopping push channel");
        let _ = active.shutdown.send(());
        if let Err(e) = active.task.await {
            tracing::warn!(err = %e, "connection supervisor ended abnormally");
        }
        self.shared.state_tx.send_replace(ConnectionState::Closed {
            reason: CloseReason::Stopped,
        });
    }

    /// Current state snapshot.
    #[must_use]
    pub fn state(&self) -> ConnectionState {
        self.shared.state_tx.borrow().clone()
    }

    /// Receiver notified on every state change.
    #[must_use]
    pub fn watch_state(&self) -> watch::Receiver<ConnectionState> {
        self.shared.state_tx.subscribe()
    }

    /// Socket id of the open channel, if any.
    #[must_use]
    pub fn socket_id(&self) -> Option<String> {
        match &*self.shared.state_tx.borrow() {
            ConnectionState::Open { socket_id } => Some(socket_id.clone()),
            _ => None,
        }
    }

    /// The session currently running, if any.
    #[must_use]
    pub fn session(&self) -> Option<AuthSession> {
        self.active.lock().as_ref().map(|a| a.session.clone())
    }

    /// The event bus inbound events are published on.
    #[must_use]
    pub fn bus(&self) -> &EventBus {
        &self.shared.bus
    }

    /// Scoped listener for server events.
    #[must_use]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.shared.bus.subscribe(kinds)
    }

    /// The underlying connector.
    #[must_use]
    pub fn connector(&self) -> &K {
        &self.shared.connector
    }
}

impl<K: Connector> EventSink for ConnectionManager<K> {
    fn emit(&self, event: ClientEvent) -> Result<(), ConnectionError> {
        if !self.is_open() {
            tracing::debug!(event = event.name(), "channel not open, event dropped");
            return Err(ConnectionError::NotOpen);
        }
        let active = self.active.lock();
        let Some(active) = active.as_ref() else {
            return Err(ConnectionError::NotOpen);
        };
        active.outbound.try_send(event).map_err(|e| match e {
            mpsc::error::TrySendError::Full(ev) => {
                tracing::warn!(event = ev.name(), "outbound queue full, event dropped");
                ConnectionError::QueueFull
            }
            mpsc::error::TrySendError::Closed(_) => ConnectionError::NotOpen,
        })
    }

    fn is_open(&self) -> bool {
        self.shared.state_tx.borrow().is_open()
    }
}

enum PumpExit {
    Shutdown,
    Disconnected(ConnectionError),
}

/// Supervisor loop for one session.
async fn supervise<K: Connector>(
    shared: Arc<Shared<K>>,
    session: AuthSession,
    mut outbound: mpsc::Receiver<ClientEvent>,
    mut shutdown: oneshot::Receiver<()>,
) {
    let mut failures: u32 = 0;

    loop {
        let connection = ConnectionId::new();
        shared.set_state(connection, ConnectionState::Connecting);

        let result = tokio::select! {
            result = shared.connector.connect(&session) => result,
            _ = &mut shutdown => return,
        };

        let reason = match result {
            Ok(channel) => {
                failures = 0;
                shared.set_state(
                    connection,
                    ConnectionState::Open {
                        socket_id: channel.socket_id().to_string(),
                    },
                );
                // Presence is rebuilt from scratch on every (re)connect.
                if let Err(e) = channel.send(&ClientEvent::GetOnlineUsers).await {
                    tracing::warn!(connection = %connection, err = %e, "presence snapshot request failed");
                }
                match pump(&shared, connection, &channel, &mut outbound, &mut shutdown).await {
                    PumpExit::Shutdown => {
                        channel.close().await;
                        return;
                    }
                    PumpExit::Disconnected(reason) => reason,
                }
            }
            Err(reason) => reason,
        };

        match reason {
            ConnectionError::AuthRejected(message) => {
                tracing::warn!(connection = %connection, reason = %message, "authentication rejected");
                shared.set_state(
                    connection,
                    ConnectionState::Closed {
                        reason: CloseReason::AuthRejected(message),
                    },
                );
                return;
            }
            ConnectionError::ServerDisconnect => {
                shared.set_state(
                    connection,
                    ConnectionState::Closed {
                        reason: CloseReason::ServerDisconnect,
                    },
                );
                return;
            }
            other => {
                tracing::warn!(connection = %connection, err = %other, "push channel lost");
            }
        }

        failures += 1;
        if shared
            .config
            .max_reconnect_attempts
            .is_some_and(|max| failures > max)
        {
            shared.set_state(
                connection,
                ConnectionState::Closed {
                    reason: CloseReason::ReconnectExhausted,
                },
            );
            return;
        }

        // Emits are dropped, not queued, while the channel is down.
        let mut dropped = 0;
        while outbound.try_recv().is_ok() {
            dropped += 1;
        }
        if dropped > 0 {
            tracing::debug!(connection = %connection, dropped, "discarded events queued before the drop");
        }

        shared.set_state(connection, ConnectionState::ReconnectPending { attempt: failures });
        tracing::info!(
            connection = %connection,
            delay_ms = u64::try_from(shared.config.reconnect_delay.as_millis()).unwrap_or(u64::MAX),
            "reconnect scheduled"
        );
        tokio::select! {
            () = tokio::time::sleep(shared.config.reconnect_delay) => {}
            _ = &mut shutdown => return,
        }
    }
}

/// Move events both ways until the channel ends or shutdown is requested.
async fn pump<K: Connector>(
    shared: &Shared<K>,
    connection: ConnectionId,
    channel: &K::Channel,
    outbound: &mut mpsc::Receiver<ClientEvent>,
    shutdown: &mut oneshot::Receiver<()>,
) -> PumpExit {
    loop {
        tokio::select! {
            _ = &mut *shutdown => return PumpExit::Shutdown,
            event = outbound.recv() => {
                let Some(event) = event else {
                    return PumpExit::Shutdown;
                };
                if let Err(e) = channel.send(&event).await {
                    return PumpExit::Disconnected(e);
                }
            }
            incoming = channel.recv() => match incoming {
                Ok(event) => dispatch(shared, connection, &event),
                Err(reason) => return PumpExit::Disconnected(reason),
            },
        }
    }
}

fn dispatch<K>(shared: &Shared<K>, connection: ConnectionId, event: &ServerEvent) {
    match event {
        ServerEvent::Connected(ack) => {
            tracing::debug!(connection = %connection, socket_id = %ack.socket_id, "duplicate handshake ack ignored");
            return;
        }
        ServerEvent::ConnectError(err) | ServerEvent::Error(err) => {
            tracing::warn!(connection = %connection, reason = %err.message, "server reported an error");
        }
        other => {
            tracing::debug!(connection = %connection, kind = ?other.kind(), "event received");
        }
    }
    shared.bus.publish(event);
}
