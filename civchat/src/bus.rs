//! Event bus multiplexing inbound server events to scoped subscriptions.
//!
//! Every component that reacts to push events holds a [`Subscription`].
//! Dropping the handle removes its listener, so a view that is torn down and
//! re-opened never ends up with two live listeners for the same event.

use std::collections::HashMap;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use civchat_proto::event::{EventKind, ServerEvent};
use civchat_proto::message::ChatId;

type ListenerId = u64;

struct Listener {
    kinds: Vec<EventKind>,
    chat: Option<ChatId>,
    tx: mpsc::Sender<ServerEvent>,
}

impl Listener {
    fn wants(&self, event: &ServerEvent) -> bool {
        if !self.kinds.contains(&event.kind()) {
            return false;
        }
        match (&self.chat, event.chat_id()) {
            (None, _) => true,
            (Some(wanted), Some(actual)) => wanted == actual,
            (Some(_), None) => false,
        }
    }
}

#[derive(Default)]
struct Registry {
    next_id: ListenerId,
    listeners: HashMap<ListenerId, Listener>,
}

/// Shared, cloneable handle to the event bus.
#[derive(Clone)]
pub struct EventBus {
    registry: Arc<Mutex<Registry>>,
    capacity: usize,
}

impl EventBus {
    /// Create a bus whose subscriptions buffer up to `capacity` events.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry::default())),
            capacity: capacity.max(1),
        }
    }

    /// Listen for the given event kinds.
    #[must_use]
    pub fn subscribe(&self, kinds: &[EventKind]) -> Subscription {
        self.register(kinds, None)
    }

    /// Listen for the given event kinds, restricted to events about `chat`.
    ///
    /// Events that carry no chat id never match a chat-scoped subscription.
    #[must_use]
    pub fn subscribe_chat(&self, kinds: &[EventKind], chat: ChatId) -> Subscription {
        self.register(kinds, Some(chat))
    }

    fn register(&self, kinds: &[EventKind], chat: Option<ChatId>) -> Subscription {
        let (tx, rx) = mpsc::channel(self.capacity);
        let mut registry = self.registry.lock();
        let id = registry.next_id;
        registry.next_id += 1;
        registry.listeners.insert(
            id,
            Listener {
                kinds: kinds.to_vec(),
                chat,
                tx,
            },
        );
        tracing::trace!(listener = id, ?kinds, "subscription added");
        Subscription {
            id,
            registry: Arc::downgrade(&self.registry),
            rx,
        }
    }

    /// Deliver `event` to every matching listener.
    ///
    /// Never blocks. A listener whose buffer is full misses the event (logged);
    /// a listener whose receiver is gone is removed. Returns the number of
    /// listeners that received the event.
    pub fn publish(&self, event: &ServerEvent) -> usize {
        let mut registry = self.registry.lock();
        let mut delivered = 0;
        registry.listeners.retain(|id, listener| {
            if !listener.wants(event) {
                return !listener.tx.is_closed();
            }
            match listener.tx.try_send(event.clone()) {
                Ok(()) => {
                    delivered += 1;
                    true
                }
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(listener = id, kind = ?event.kind(), "subscriber lagging, event dropped");
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
        delivered
    }

    /// Number of live listeners.
    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.registry.lock().listeners.len()
    }

    /// Number of live listeners for a specific kind.
    #[must_use]
    pub fn listener_count_for(&self, kind: EventKind) -> usize {
        self.registry
            .lock()
            .listeners
            .values()
            .filter(|l| l.kinds.contains(&kind))
            .count()
    }
}

/// A live listener on the [`EventBus`].
///
/// Dropping the subscription unregisters it.
pub struct Subscription {
    id: ListenerId,
    registry: Weak<Mutex<Registry>>,
    rx: mpsc::Receiver<ServerEvent>,
}

impl Subscription {
    /// Wait for the next matching event.
    ///
    /// Returns `None` once the bus itself is gone.
    pub async fn recv(&mut self) -> Option<ServerEvent> {
        self.rx.recv().await
    }

    /// Next matching event if one is already buffered.
    pub fn try_recv(&mut self) -> Option<ServerEvent> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().listeners.remove(&self.id);
            tracing::trace!(listener = self.id, "subscription released");
        }
    }
}
