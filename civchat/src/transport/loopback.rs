//! Loopback push channel for testing.
//!
//! [`LoopbackConnector`] plays the backend in-process. Each accepted
//! connection produces a [`LoopbackServer`] handle that a test uses to push
//! server events, read what the client emitted, and end the channel the way
//! a real backend would (transport drop or deliberate disconnect). Outcomes
//! of future connect attempts can be scripted up front.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};

use tokio::sync::{Mutex, mpsc};

use civchat_proto::event::{ClientEvent, ServerEvent};

use super::{Channel, ConnectionError, Connector};
use crate::session::AuthSession;

/// Outcome of one scripted connect attempt.
#[derive(Debug, Clone)]
pub enum ConnectOutcome {
    /// Accept and acknowledge the session.
    Accept,
    /// Refuse at the transport level.
    Refuse,
    /// Reject the session token.
    RejectAuth(String),
}

type ServerSide = mpsc::Sender<Result<ServerEvent, ConnectionError>>;

/// In-process connector backed by `tokio::sync::mpsc` channels.
pub struct LoopbackConnector {
    script: parking_lot::Mutex<VecDeque<ConnectOutcome>>,
    attempts: Arc<AtomicU32>,
    servers: mpsc::UnboundedSender<LoopbackServer>,
    buffer: usize,
}

/// Test-side view of a [`LoopbackConnector`].
pub struct LoopbackHarness {
    attempts: Arc<AtomicU32>,
    servers: mpsc::UnboundedReceiver<LoopbackServer>,
}

impl LoopbackConnector {
    /// Create a connector and the harness that observes it.
    ///
    /// Attempts with no scripted outcome are accepted.
    #[must_use]
    pub fn new(buffer: usize) -> (Self, LoopbackHarness) {
        let attempts = Arc::new(AtomicU32::new(0));
        let (servers_tx, servers_rx) = mpsc::unbounded_channel();
        (
            Self {
                script: parking_lot::Mutex::new(VecDeque::new()),
                attempts: Arc::clone(&attempts),
                servers: servers_tx,
                buffer,
            },
            LoopbackHarness {
                attempts,
                servers: servers_rx,
            },
        )
    }

    /// Queue the outcome of the next unscripted attempt.
    #[must_use]
    pub fn then(self, outcome: ConnectOutcome) -> Self {
        self.script.lock().push_back(outcome);
        self
    }

    /// Queue an outcome after construction.
    pub fn push_outcome(&self, outcome: ConnectOutcome) {
        self.script.lock().push_back(outcome);
    }
}

impl Connector for LoopbackConnector {
    type Channel = LoopbackChannel;

    async fn connect(&self, session: &AuthSession) -> Result<LoopbackChannel, ConnectionError> {
        let attempt = self.attempts.fetch_add(1, Ordering::SeqCst) + 1;
        let outcome = self
            .script
            .lock()
            .pop_front()
            .unwrap_or(ConnectOutcome::Accept);

        match outcome {
            ConnectOutcome::Refuse => Err(ConnectionError::Transport("connection refused".into())),
            ConnectOutcome::RejectAuth(reason) => Err(ConnectionError::AuthRejected(reason)),
            ConnectOutcome::Accept => {
                let (to_client, from_server) = mpsc::channel(self.buffer);
                let (to_server, from_client) = mpsc::channel(self.buffer);
                let socket_id = format!("loop-{attempt}");

                let server = LoopbackServer {
                    socket_id: socket_id.clone(),
                    user_id: session.user_id.to_string(),
                    tx: to_client,
                    rx: Mutex::new(from_client),
                };
                // Harness dropped: nobody is watching, the channel still works.
                let _ = self.servers.send(server);

                Ok(LoopbackChannel {
                    socket_id,
                    tx: to_server,
                    rx: Mutex::new(from_server),
                })
            }
        }
    }
}

impl LoopbackHarness {
    /// Number of connect attempts made so far.
    #[must_use]
    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next accepted connection.
    pub async fn next_server(&mut self) -> Option<LoopbackServer> {
        self.servers.recv().await
    }

    /// Return an accepted connection if one is already waiting.
    pub fn try_next_server(&mut self) -> Option<LoopbackServer> {
        self.servers.try_recv().ok()
    }
}

/// Backend side of one loopback channel.
pub struct LoopbackServer {
    socket_id: String,
    user_id: String,
    tx: ServerSide,
    rx: Mutex<mpsc::Receiver<ClientEvent>>,
}

impl LoopbackServer {
    /// Socket id handed to the client.
    #[must_use]
    pub fn socket_id(&self) -> &str {
        &self.socket_id
    }

    /// User id the client authenticated as.
    #[must_use]
    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Push an event to the client.
    ///
    /// Returns `false` if the client side is gone.
    pub async fn push(&self, event: ServerEvent) -> bool {
        self.tx.send(Ok(event)).await.is_ok()
    }

    /// Next event the client emitted.
    pub async fn recv(&self) -> Option<ClientEvent> {
        self.rx.lock().await.recv().await
    }

    /// Next emitted event if one is already queued.
    pub fn try_recv(&self) -> Option<ClientEvent> {
        self.rx.try_lock().ok()?.try_recv().ok()
    }

    /// Simulate a network failure.
    pub async fn drop_transport(&self) {
        let _ = self
            .tx
            .send(Err(ConnectionError::Transport("loopback dropped".into())))
            .await;
    }

    /// Simulate the backend closing the channel on purpose.
    pub async fn disconnect(&self) {
        let _ = self.tx.send(Err(ConnectionError::ServerDisconnect)).await;
    }
}

/// Client side of one loopback channel.
pub struct LoopbackChannel {
    socket_id: String,
    tx: mpsc::Sender<ClientEvent>,
    rx: Mutex<mpsc::Receiver<Result<ServerEvent, ConnectionError>>>,
}

impl Channel for LoopbackChannel {
    fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ConnectionError> {
        self.tx
            .send(event.clone())
            .await
            .map_err(|_| ConnectionError::Transport("loopback server gone".into()))
    }

    async fn recv(&self) -> Result<ServerEvent, ConnectionError> {
        let mut rx = self.rx.lock().await;
        rx.recv()
            .await
            .unwrap_or_else(|| Err(ConnectionError::Transport("loopback server gone".into())))
    }

    async fn close(&self) {
        self.rx.lock().await.close();
    }
}
