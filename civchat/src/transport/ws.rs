//! WebSocket push channel.
//!
//! Opens a WebSocket to the backend with the session's bearer token on the
//! upgrade request, waits for the `connected` acknowledgement, then hands
//! inbound frames to the caller through a background reader task. Every
//! frame is one JSON text message (see [`civchat_proto::codec`]).

use std::sync::Arc;
use std::time::Duration;

use futures_util::{SinkExt, StreamExt};
use tokio::sync::{Mutex, mpsc};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::{HeaderValue, StatusCode, header::AUTHORIZATION};
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};
use url::Url;

use civchat_proto::codec;
use civchat_proto::event::{ClientEvent, ServerEvent};

use super::{Channel, ConnectionError, Connector};
use crate::config::ConnectionConfig;
use crate::session::AuthSession;

/// Type alias for the write half of a WebSocket connection.
type WsSender = futures_util::stream::SplitSink<
    WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>,
    Message,
>;

/// Type alias for the read half of a WebSocket connection.
type WsReader =
    futures_util::stream::SplitStream<WebSocketStream<MaybeTlsStream<tokio::net::TcpStream>>>;

/// Capacity of the reader task's hand-off queue.
const INCOMING_BUFFER: usize = 256;

/// Opens [`WsChannel`]s to a fixed socket URL.
#[derive(Debug, Clone)]
pub struct WsConnector {
    socket_url: Url,
    connect_timeout: Duration,
    handshake_timeout: Duration,
}

impl WsConnector {
    /// Create a connector for `socket_url` (`ws://` or `wss://`).
    #[must_use]
    pub fn new(socket_url: Url, config: &ConnectionConfig) -> Self {
        Self {
            socket_url,
            connect_timeout: config.connect_timeout,
            handshake_timeout: config.handshake_timeout,
        }
    }

    /// The URL this connector dials.
    #[must_use]
    pub const fn socket_url(&self) -> &Url {
        &self.socket_url
    }
}

impl Connector for WsConnector {
    type Channel = WsChannel;

    /// Connect and authenticate.
    ///
    /// 1. Builds the upgrade request with `Authorization: Bearer <token>`
    /// 2. Connects within `connect_timeout`
    /// 3. Waits for `connected {socketId}` within `handshake_timeout`
    /// 4. Spawns the reader task
    ///
    /// # Errors
    ///
    /// - [`ConnectionError::AuthRejected`] on HTTP 401/403, a `connect_error`
    ///   frame or a policy close during the handshake.
    /// - [`ConnectionError::Timeout`] if either phase times out.
    /// - [`ConnectionError::Transport`] for everything else.
    async fn connect(&self, session: &AuthSession) -> Result<WsChannel, ConnectionError> {
        let url = self.socket_url.as_str();
        let mut request = url
            .into_client_request()
            .map_err(|e| ConnectionError::Transport(format!("invalid socket URL: {e}")))?;
        let bearer = HeaderValue::from_str(&session.bearer())
            .map_err(|_| ConnectionError::AuthRejected("token is not a valid header".into()))?;
        request.headers_mut().insert(AUTHORIZATION, bearer);

        let (ws_stream, _response) =
            tokio::time::timeout(self.connect_timeout, connect_async(request))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "WebSocket connect timed out");
                    ConnectionError::Timeout
                })?
                .map_err(|e| {
                    tracing::warn!(url, err = %e, "WebSocket connect failed");
                    map_ws_connect_error(e)
                })?;

        let (ws_sender, mut ws_reader) = ws_stream.split();

        let socket_id =
            tokio::time::timeout(self.handshake_timeout, await_handshake(&mut ws_reader))
                .await
                .map_err(|_| {
                    tracing::warn!(url, "handshake acknowledgement timed out");
                    ConnectionError::Timeout
                })??;

        tracing::info!(socket_id = %socket_id, url, "push channel handshake complete");

        let (tx, rx) = mpsc::channel(INCOMING_BUFFER);
        let reader_handle = tokio::spawn(reader_loop(ws_reader, tx));

        Ok(WsChannel {
            socket_id,
            ws_sender: Arc::new(Mutex::new(ws_sender)),
            incoming: Mutex::new(rx),
            reader_handle,
        })
    }
}

/// A live WebSocket push channel.
pub struct WsChannel {
    socket_id: String,
    /// Write half (shared for concurrent sends).
    ws_sender: Arc<Mutex<WsSender>>,
    /// Events and the terminal disconnect reason from the reader task.
    incoming: Mutex<mpsc::Receiver<Result<ServerEvent, ConnectionError>>>,
    reader_handle: tokio::task::JoinHandle<()>,
}

impl Channel for WsChannel {
    fn socket_id(&self) -> &str {
        &self.socket_id
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ConnectionError> {
        let frame = codec::encode(event)?;
        let mut sender = self.ws_sender.lock().await;
        sender.send(Message::text(frame)).await.map_err(|e| {
            tracing::warn!(err = %e, event = event.name(), "push channel send failed");
            ConnectionError::Transport(e.to_string())
        })
    }

    async fn recv(&self) -> Result<ServerEvent, ConnectionError> {
        let mut rx = self.incoming.lock().await;
        rx.recv()
            .await
            .unwrap_or_else(|| Err(ConnectionError::Transport("reader task exited".into())))
    }

    async fn close(&self) {
        let mut sender = self.ws_sender.lock().await;
        if let Err(e) = sender.close().await {
            tracing::debug!(err = %e, "error while closing push channel");
        }
    }
}

impl Drop for WsChannel {
    fn drop(&mut self) {
        self.reader_handle.abort();
    }
}

/// Read frames until the backend acknowledges or rejects the session.
async fn await_handshake(ws_reader: &mut WsReader) -> Result<String, ConnectionError> {
    while let Some(frame) = ws_reader.next().await {
        match frame {
            Ok(Message::Text(text)) => match codec::decode(text.as_str()) {
                Ok(ServerEvent::Connected(ack)) => return Ok(ack.socket_id),
                Ok(ServerEvent::ConnectError(err)) => {
                    tracing::warn!(reason = %err.message, "handshake rejected");
                    return Err(ConnectionError::AuthRejected(err.message));
                }
                Ok(other) => {
                    tracing::debug!(kind = ?other.kind(), "event before handshake ack, skipping");
                }
                Err(e) => tracing::warn!(err = %e, "malformed handshake frame, skipping"),
            },
            Ok(Message::Close(Some(frame))) if frame.code == CloseCode::Policy => {
                return Err(ConnectionError::AuthRejected(frame.reason.as_str().to_string()));
            }
            Ok(Message::Close(frame)) => return Err(classify_close(frame.as_ref())),
            Ok(_) => {}
            Err(e) => return Err(ConnectionError::Transport(e.to_string())),
        }
    }
    Err(ConnectionError::Transport(
        "stream ended during handshake".into(),
    ))
}

/// Background task that decodes inbound frames.
///
/// Malformed frames and unknown events are logged and skipped; they never
/// end the channel. The last item sent is always the `Err` describing how
/// the channel ended.
async fn reader_loop(
    mut ws_reader: WsReader,
    tx: mpsc::Sender<Result<ServerEvent, ConnectionError>>,
) {
    let reason = loop {
        match ws_reader.next().await {
            Some(Ok(Message::Text(text))) => match codec::decode(text.as_str()) {
                Ok(event) => {
                    if tx.send(Ok(event)).await.is_err() {
                        // Channel dropped by the owner.
                        return;
                    }
                }
                Err(e) => tracing::warn!(err = %e, "malformed push frame, skipping"),
            },
            Some(Ok(Message::Close(frame))) => {
                let reason = classify_close(frame.as_ref());
                tracing::info!(?frame, terminal = reason.is_terminal(), "push channel closed by server");
                break reason;
            }
            Some(Ok(_)) => {
                // Ping/pong/binary/raw frames carry nothing for us.
            }
            Some(Err(e)) => {
                tracing::warn!(err = %e, "push channel read error");
                break ConnectionError::Transport(e.to_string());
            }
            None => break ConnectionError::Transport("stream ended without close frame".into()),
        }
    };
    let _ = tx.send(Err(reason)).await;
    tracing::debug!("push channel reader task exiting");
}

/// Decide whether a close frame is a deliberate server disconnect.
///
/// A bare close, `1000 Normal` and `1008 Policy` are deliberate. Anything
/// else (going away, restart, internal error) is a transport drop.
fn classify_close(frame: Option<&CloseFrame>) -> ConnectionError {
    match frame.map(|f| f.code) {
        None | Some(CloseCode::Normal | CloseCode::Policy) => ConnectionError::ServerDisconnect,
        Some(code) => ConnectionError::Transport(format!("closed with code {code}")),
    }
}

/// Map a `tokio_tungstenite` connection error to a [`ConnectionError`].
fn map_ws_connect_error(err: WsError) -> ConnectionError {
    match err {
        WsError::Http(response)
            if response.status() == StatusCode::UNAUTHORIZED
                || response.status() == StatusCode::FORBIDDEN =>
        {
            ConnectionError::AuthRejected(format!("HTTP {}", response.status()))
        }
        WsError::Http(response) => {
            ConnectionError::Transport(format!("upgrade failed: status {}", response.status()))
        }
        WsError::Tls(_) => ConnectionError::Transport(format!("TLS error: {err}")),
        other => ConnectionError::Transport(other.to_string()),
    }
}
