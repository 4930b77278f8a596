// Test-specific lint overrides: property tests use unwrap/expect freely.
#![allow(clippy::unwrap_used, clippy::expect_used, clippy::doc_markdown)]

//! Property-based tests for the client-side reconcilers.
//!
//! Uses proptest to verify:
//! 1. A message stream fed by any mix of pulled pages and pushes holds each
//!    message exactly once, ordered by `createdAt`.
//! 2. Presence deltas are idempotent and snapshots replace the whole set.
//! 3. The inbox counts each qualifying message exactly once, and opening a
//!    chat removes precisely that chat's share.

use std::collections::{BTreeSet, HashMap, HashSet};

use chrono::{TimeZone, Utc};
use proptest::prelude::*;

use civchat::chat::inbox::Inbox;
use civchat::chat::presence::PresenceTracker;
use civchat::chat::stream::MessageStream;
use civchat_proto::chat::{MessagePage, Pagination};
use civchat_proto::event::ServerEvent;
use civchat_proto::message::{ChatId, Message, MessageId, UserId, UserRef};
use civchat_proto::presence::{PresenceEntry, UserOffline};

// --- Helpers ---

fn message(id: usize, chat: &str, sender: &str, secs: i64) -> Message {
    Message {
        id: MessageId::new(format!("m{id}")),
        chat_id: ChatId::new(chat),
        sender: UserRef::bare(UserId::new(sender)),
        content: format!("body {id}"),
        message_type: "text".to_string(),
        created_at: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
        read_by: Vec::new(),
    }
}

fn seed_page(messages: Vec<Message>) -> MessagePage {
    MessagePage {
        messages,
        pagination: Pagination {
            page: 1,
            pages: 1,
            total: None,
            limit: None,
        },
    }
}

// --- Message stream ---

type StreamCase = (Vec<i64>, Vec<bool>, (Vec<usize>, Vec<usize>, Vec<usize>));

/// A pool of messages (timestamps drawn from a narrow range so ties are
/// common), which of them the seed page returns, and the pushes grouped by
/// phase: before the load starts, while it is in flight, after it lands.
fn arb_stream_case() -> impl Strategy<Value = StreamCase> {
    (1usize..20).prop_flat_map(|n| {
        let pushes = || proptest::collection::vec(0..n, 0..12);
        (
            proptest::collection::vec(0i64..6, n),
            proptest::collection::vec(any::<bool>(), n),
            (pushes(), pushes(), pushes()),
        )
    })
}

proptest! {
    #[test]
    fn stream_holds_each_message_once_in_order(
        (times, in_page, (before, during, after)) in arb_stream_case()
    ) {
        let pool: Vec<Message> = times
            .iter()
            .enumerate()
            .map(|(i, secs)| message(i, "c1", "peer", *secs))
            .collect();
        let page: Vec<Message> = pool
            .iter()
            .zip(&in_page)
            .filter(|(_, keep)| **keep)
            .map(|(m, _)| m.clone())
            .collect();

        let mut stream = MessageStream::new(ChatId::new("c1"));
        for &i in &before {
            stream.apply_incoming(pool[i].clone());
        }
        let ticket = stream.begin_load(1);
        for &i in &during {
            stream.apply_incoming(pool[i].clone());
        }
        stream.finish_load(&ticket, seed_page(page.clone()));
        for &i in &after {
            stream.apply_incoming(pool[i].clone());
        }

        let expected: HashSet<String> = page
            .iter()
            .map(|m| m.id.as_str().to_string())
            .chain(before.iter().chain(&during).chain(&after).map(|i| format!("m{i}")))
            .collect();
        let held: Vec<String> = stream
            .messages()
            .iter()
            .map(|m| m.id.as_str().to_string())
            .collect();
        let unique: HashSet<String> = held.iter().cloned().collect();

        prop_assert_eq!(held.len(), unique.len(), "duplicate ids in {:?}", held);
        prop_assert_eq!(unique, expected);
        prop_assert!(stream
            .messages()
            .windows(2)
            .all(|w| w[0].created_at <= w[1].created_at));
    }
}

// --- Presence ---

#[derive(Debug, Clone)]
enum PresenceOp {
    Snapshot(BTreeSet<u8>),
    Online(u8),
    Offline(u8),
}

fn arb_presence_op() -> impl Strategy<Value = PresenceOp> {
    prop_oneof![
        proptest::collection::btree_set(0u8..8, 0..6).prop_map(PresenceOp::Snapshot),
        (0u8..8).prop_map(PresenceOp::Online),
        (0u8..8).prop_map(PresenceOp::Offline),
    ]
}

fn user(n: u8) -> UserId {
    UserId::new(format!("u{n}"))
}

fn to_event(op: &PresenceOp) -> ServerEvent {
    match op {
        PresenceOp::Snapshot(users) => ServerEvent::OnlineUsers(
            users.iter().map(|n| PresenceEntry::new(user(*n))).collect(),
        ),
        PresenceOp::Online(n) => ServerEvent::UserOnline(PresenceEntry::new(user(*n))),
        PresenceOp::Offline(n) => ServerEvent::UserOffline(UserOffline { user_id: user(*n) }),
    }
}

proptest! {
    #[test]
    fn presence_matches_set_model_and_repeats_are_no_ops(
        ops in proptest::collection::vec(arb_presence_op(), 0..40)
    ) {
        let tracker = PresenceTracker::new();
        let mut model: BTreeSet<UserId> = BTreeSet::new();

        for op in &ops {
            let event = to_event(op);
            tracker.handle(&event);
            match op {
                PresenceOp::Snapshot(users) => model = users.iter().map(|n| user(*n)).collect(),
                PresenceOp::Online(n) => {
                    model.insert(user(*n));
                }
                PresenceOp::Offline(n) => {
                    model.remove(&user(*n));
                }
            }
            prop_assert_eq!(tracker.get_online(), model.clone());

            // Delivering the same event again changes nothing.
            prop_assert!(!tracker.handle(&event));
            prop_assert_eq!(tracker.get_online(), model.clone());
        }
    }
}

// --- Inbox ---

const CHATS: [&str; 3] = ["a", "b", "c"];

/// (message id, chat index, sent by me)
fn arb_deliveries() -> impl Strategy<Value = Vec<(usize, usize, bool)>> {
    proptest::collection::vec((0usize..30, 0usize..CHATS.len(), any::<bool>()), 0..60)
}

proptest! {
    #[test]
    fn inbox_counts_each_qualifying_message_once(
        deliveries in arb_deliveries(),
        active in proptest::option::of(0usize..CHATS.len()),
        opened in 0usize..CHATS.len(),
    ) {
        let mut inbox = Inbox::new(UserId::new("me"));
        if let Some(a) = active {
            inbox.open_chat(&ChatId::new(CHATS[a]));
        }

        // The first delivery of an id decides its chat and sender.
        let mut first: HashMap<usize, (usize, bool)> = HashMap::new();
        for (i, (id, chat, mine)) in deliveries.iter().enumerate() {
            let (chat, mine) = *first.entry(*id).or_insert((*chat, *mine));
            let sender = if mine { "me" } else { "peer" };
            inbox.apply_new_message(&message(*id, CHATS[chat], sender, i64::try_from(i).unwrap()), None);
        }

        let mut per_chat = [0u64; CHATS.len()];
        for (chat, mine) in first.values() {
            if !mine && active != Some(*chat) {
                per_chat[*chat] += 1;
            }
        }
        prop_assert_eq!(inbox.unread_count(), per_chat.iter().sum::<u64>());

        inbox.open_chat(&ChatId::new(CHATS[opened]));
        per_chat[opened] = 0;
        prop_assert_eq!(inbox.unread_count(), per_chat.iter().sum::<u64>());
    }
}
