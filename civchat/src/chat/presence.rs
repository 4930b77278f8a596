//! Online-user tracking, fed only by push events.

use std::collections::{BTreeSet, HashMap};

use parking_lot::RwLock;

use civchat_proto::event::ServerEvent;
use civchat_proto::message::UserId;
use civchat_proto::presence::PresenceEntry;

/// Set of currently online users, keyed by user id.
///
/// Rebuilt wholesale from each `online_users` snapshot and patched by
/// `user_online` / `user_offline` deltas. Both deltas are idempotent.
#[derive(Default)]
pub struct PresenceTracker {
    online: RwLock<HashMap<UserId, PresenceEntry>>,
}

impl PresenceTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace the whole set with a server snapshot.
    ///
    /// Duplicate ids in the snapshot collapse to the last entry.
    pub fn apply_snapshot(&self, entries: Vec<PresenceEntry>) {
        let snapshot: HashMap<_, _> = entries
            .into_iter()
            .map(|e| (e.user_id.clone(), e))
            .collect();
        tracing::debug!(online = snapshot.len(), "presence snapshot applied");
        *self.online.write() = snapshot;
    }

    /// Mark a user online. Returns `true` if they were not online before.
    ///
    /// Metadata is refreshed either way.
    pub fn apply_online(&self, entry: PresenceEntry) -> bool {
        let user = entry.user_id.clone();
        self.online.write().insert(user, entry).is_none()
    }

    /// Mark a user offline. Returns `true` if they were online.
    pub fn apply_offline(&self, user: &UserId) -> bool {
        self.online.write().remove(user).is_some()
    }

    /// Route a presence event. Returns `true` if the online set changed.
    ///
    /// Non-presence events are ignored.
    pub fn handle(&self, event: &ServerEvent) -> bool {
        match event {
            ServerEvent::OnlineUsers(list) => {
                let before = self.get_online();
                self.apply_snapshot(list.clone());
                before != self.get_online()
            }
            ServerEvent::UserOnline(entry) => self.apply_online(entry.clone()),
            ServerEvent::UserOffline(off) => self.apply_offline(&off.user_id),
            _ => false,
        }
    }

    /// Ids of everyone online.
    #[must_use]
    pub fn get_online(&self) -> BTreeSet<UserId> {
        self.online.read().keys().cloned().collect()
    }

    /// Whether `user` is online.
    #[must_use]
    pub fn is_online(&self, user: &UserId) -> bool {
        self.online.read().contains_key(user)
    }

    /// Last reported entry for `user`.
    #[must_use]
    pub fn entry(&self, user: &UserId) -> Option<PresenceEntry> {
        self.online.read().get(user).cloned()
    }

    /// Number of online users.
    #[must_use]
    pub fn len(&self) -> usize {
        self.online.read().len()
    }

    /// Whether nobody is online.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.online.read().is_empty()
    }

    /// Forget everyone. Used when the session ends.
    pub fn clear(&self) {
        self.online.write().clear();
    }
}
