//! Presence payloads.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::message::UserId;

/// One online user as reported by `online_users` / `user_online`.
///
/// Anything besides `userId` is kept verbatim in `meta` (last-seen details,
/// display hints) and never interpreted by the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceEntry {
    /// The online user.
    pub user_id: UserId,
    /// Opaque last-seen metadata.
    #[serde(flatten)]
    pub meta: BTreeMap<String, serde_json::Value>,
}

impl PresenceEntry {
    /// An entry without metadata.
    #[must_use]
    pub const fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            meta: BTreeMap::new(),
        }
    }
}

/// Payload of `user_offline`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UserOffline {
    /// The user that went offline.
    pub user_id: UserId,
}
