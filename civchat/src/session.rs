//! Authenticated session handed to the chat core by the auth layer.

use std::fmt;

use civchat_proto::message::UserId;

/// Current user identity plus bearer token.
///
/// Owned by the authentication collaborator. The chat core keeps a read-only
/// copy and is restarted whenever the identity or token changes.
#[derive(Clone, PartialEq, Eq)]
pub struct AuthSession {
    /// The signed-in user.
    pub user_id: UserId,
    /// Bearer token for the push channel handshake and REST calls.
    pub token: String,
}

impl AuthSession {
    /// Build a session from a user id and token.
    pub fn new(user_id: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            user_id: UserId::new(user_id),
            token: token.into(),
        }
    }

    /// `Authorization` header value for this session.
    #[must_use]
    pub fn bearer(&self) -> String {
        format!("Bearer {}", self.token)
    }
}

impl fmt::Debug for AuthSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AuthSession")
            .field("user_id", &self.user_id)
            .field("token", &"<redacted>")
            .finish()
    }
}
