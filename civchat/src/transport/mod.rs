//! Push channel transport abstraction.
//!
//! A [`Connector`] opens one authenticated [`Channel`] per attempt. The
//! connection manager owns reconnect policy; transports only report how a
//! channel ended. Implementations:
//! - [`ws::WsConnector`]: WebSocket channel to the backend
//! - [`loopback::LoopbackConnector`]: in-process scripted server for tests

pub mod loopback;
pub mod ws;

use std::future::Future;

use civchat_proto::codec::CodecError;
use civchat_proto::event::{ClientEvent, ServerEvent};

use crate::session::AuthSession;

/// Errors that can occur on the push channel.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// The transport dropped or could not be reached. Recoverable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Connect or handshake did not finish in time. Recoverable.
    #[error("connection timed out")]
    Timeout,

    /// The backend refused the session token. Terminal.
    #[error("authentication rejected: {0}")]
    AuthRejected(String),

    /// The backend closed the channel on purpose. Terminal.
    #[error("server closed the connection")]
    ServerDisconnect,

    /// An emit was attempted while the channel is not open.
    #[error("connection is not open")]
    NotOpen,

    /// The outbound queue is full.
    #[error("outbound queue full")]
    QueueFull,

    /// A frame could not be encoded.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),
}

impl ConnectionError {
    /// Whether this ends the session without an automatic reconnect.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::AuthRejected(_) | Self::ServerDisconnect)
    }
}

/// Opens authenticated channels.
pub trait Connector: Send + Sync + 'static {
    /// Channel type produced by this connector.
    type Channel: Channel;

    /// Open a channel and complete the handshake.
    ///
    /// Resolves only once the backend acknowledged the session, so the
    /// returned channel is ready for use.
    fn connect(
        &self,
        session: &AuthSession,
    ) -> impl Future<Output = Result<Self::Channel, ConnectionError>> + Send;
}

/// One live push channel.
pub trait Channel: Send + Sync + 'static {
    /// Backend-assigned socket id.
    fn socket_id(&self) -> &str;

    /// Send one event. Returns once the frame was handed to the transport.
    fn send(
        &self,
        event: &ClientEvent,
    ) -> impl Future<Output = Result<(), ConnectionError>> + Send;

    /// Receive the next event.
    ///
    /// The error tells the caller how the channel ended:
    /// [`ConnectionError::ServerDisconnect`] for a deliberate server close,
    /// anything else for a transport drop.
    fn recv(&self) -> impl Future<Output = Result<ServerEvent, ConnectionError>> + Send;

    /// Close the channel from the client side.
    fn close(&self) -> impl Future<Output = ()> + Send;
}
