//! REST client for the chat endpoints.
//!
//! The push channel is the primary delivery path; these calls seed message
//! history, list chats, resolve a chat for a peer, carry the backup send and
//! fetch the authoritative unread count.

use std::future::Future;
use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde::Serialize;
use serde::de::DeserializeOwned;
use url::Url;

use civchat_proto::chat::{Chat, ChatEnvelope, ChatPage, MessageEnvelope, MessagePage, UnreadCount};
use civchat_proto::message::{ChatId, Message, TEXT_MESSAGE_TYPE, UserId};

use crate::session::AuthSession;

/// Errors from REST calls.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Network or protocol failure.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The server answered with an unexpected status.
    #[error("server returned {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, for diagnostics.
        body: String,
    },

    /// The token was rejected.
    #[error("unauthorized")]
    Unauthorized,

    /// The chat or user does not exist.
    #[error("not found")]
    NotFound,

    /// The response body did not match the expected shape.
    #[error("invalid response body: {0}")]
    Decode(#[from] serde_json::Error),

    /// An endpoint URL could not be built.
    #[error("invalid endpoint URL: {0}")]
    Url(#[from] url::ParseError),

    /// Chatting with yourself is not allowed.
    #[error("cannot start a chat with yourself")]
    SelfChat,
}

/// The REST endpoints the chat core consumes.
pub trait ChatApi: Send + Sync + 'static {
    /// `GET /chats?page&limit`.
    fn list_chats(
        &self,
        session: &AuthSession,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<ChatPage, ApiError>> + Send;

    /// `POST /chats {participantId}`: existing chat with `peer`, or a new one.
    fn get_or_create_chat(
        &self,
        session: &AuthSession,
        peer: &UserId,
    ) -> impl Future<Output = Result<Chat, ApiError>> + Send;

    /// `GET /chats/{id}/messages?page&limit`.
    fn get_messages(
        &self,
        session: &AuthSession,
        chat: &ChatId,
        page: u32,
        limit: u32,
    ) -> impl Future<Output = Result<MessagePage, ApiError>> + Send;

    /// `POST /chats/{id}/messages {content, messageType}` (backup send path).
    fn send_message(
        &self,
        session: &AuthSession,
        chat: &ChatId,
        content: &str,
    ) -> impl Future<Output = Result<Message, ApiError>> + Send;

    /// `GET /chats/unread-count`.
    fn unread_count(
        &self,
        session: &AuthSession,
    ) -> impl Future<Output = Result<u64, ApiError>> + Send;
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct CreateChatBody<'a> {
    participant_id: &'a UserId,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct SendMessageBody<'a> {
    content: &'a str,
    message_type: &'a str,
}

/// [`ChatApi`] over HTTP with bearer authentication.
#[derive(Debug, Clone)]
pub struct HttpChatApi {
    http: Client,
    base: Url,
}

impl HttpChatApi {
    /// Client for the API rooted at `base` (must end with `/`).
    ///
    /// # Errors
    ///
    /// Returns [`ApiError::Http`] if the HTTP client cannot be built.
    pub fn new(base: Url, timeout: Duration) -> Result<Self, ApiError> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("civchat/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, base })
    }

    fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        Ok(self.base.join(path)?)
    }
}

impl ChatApi for HttpChatApi {
    async fn list_chats(
        &self,
        session: &AuthSession,
        page: u32,
        limit: u32,
    ) -> Result<ChatPage, ApiError> {
        let resp = self
            .http
            .get(self.endpoint("chats")?)
            .bearer_auth(&session.token)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;
        decode(resp).await
    }

    async fn get_or_create_chat(
        &self,
        session: &AuthSession,
        peer: &UserId,
    ) -> Result<Chat, ApiError> {
        if peer == &session.user_id {
            return Err(ApiError::SelfChat);
        }
        let resp = self
            .http
            .post(self.endpoint("chats")?)
            .bearer_auth(&session.token)
            .json(&CreateChatBody {
                participant_id: peer,
            })
            .send()
            .await?;
        let envelope: ChatEnvelope = decode(resp).await?;
        Ok(envelope.chat)
    }

    async fn get_messages(
        &self,
        session: &AuthSession,
        chat: &ChatId,
        page: u32,
        limit: u32,
    ) -> Result<MessagePage, ApiError> {
        let resp = self
            .http
            .get(self.endpoint(&format!("chats/{chat}/messages"))?)
            .bearer_auth(&session.token)
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;
        decode(resp).await
    }

    async fn send_message(
        &self,
        session: &AuthSession,
        chat: &ChatId,
        content: &str,
    ) -> Result<Message, ApiError> {
        let resp = self
            .http
            .post(self.endpoint(&format!("chats/{chat}/messages"))?)
            .bearer_auth(&session.token)
            .json(&SendMessageBody {
                content,
                message_type: TEXT_MESSAGE_TYPE,
            })
            .send()
            .await?;
        let envelope: MessageEnvelope = decode(resp).await?;
        Ok(envelope.message)
    }

    async fn unread_count(&self, session: &AuthSession) -> Result<u64, ApiError> {
        let resp = self
            .http
            .get(self.endpoint("chats/unread-count")?)
            .bearer_auth(&session.token)
            .send()
            .await?;
        let body: UnreadCount = decode(resp).await?;
        Ok(body.unread_count)
    }
}

/// Map the status, then parse the JSON body.
async fn decode<T: DeserializeOwned>(resp: reqwest::Response) -> Result<T, ApiError> {
    let status = resp.status();
    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => return Err(ApiError::Unauthorized),
        StatusCode::NOT_FOUND => return Err(ApiError::NotFound),
        s if !s.is_success() => {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                status: s.as_u16(),
                body,
            });
        }
        _ => {}
    }
    let bytes = resp.bytes().await?;
    Ok(serde_json::from_slice(&bytes)?)
}
