//! Property tests for conversation reconciliation.
//!
//! Random interleavings of peer messages, optimistic sends, echoes (some
//! also relayed without their token, some replayed) and redeliveries must
//! always leave the store with:
//! 1. At most one entry per server id in every conversation.
//! 2. Messages ordered by creation time.
//! 3. Exactly one entry per sent message, confirmed once its echo arrived.
//! 4. Unread counters matching the unread received messages.
//! 5. Redelivery of peer messages changing nothing at all.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::doc_markdown)]

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use proptest::prelude::*;

use ecodeli_messaging::store::{Change, ConversationStore};
use ecodeli_proto::message::{Delivery, Message, MessageId, TempId};
use ecodeli_proto::user::UserId;

const ME: UserId = UserId::new(1);

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
}

#[derive(Debug, Clone)]
enum Op {
    /// A peer message. The id fixes the peer and timestamp, so a repeated
    /// id is a genuine redelivery of the same server record.
    Incoming { id: i64, read: bool },
    /// An optimistic send to peer `2 + peer`, optionally followed by its echo.
    Send { peer: i64, secs: i64, echo: Option<(i64, Echo)> },
}

/// How the server confirms a send.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Echo {
    /// Only the tokened `message_sent`.
    Token,
    /// A relayed copy without the token, then the tokened echo.
    RelayThenToken,
    /// The tokened echo, then a relayed copy without the token.
    TokenThenRelay,
    /// The tokened echo twice.
    TokenTwice,
}

fn arb_echo() -> impl Strategy<Value = Echo> {
    prop_oneof![
        Just(Echo::Token),
        Just(Echo::RelayThenToken),
        Just(Echo::TokenThenRelay),
        Just(Echo::TokenTwice),
    ]
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        3 => (1i64..60, any::<bool>()).prop_map(|(id, read)| Op::Incoming { id, read }),
        2 => (0i64..3, 0i64..600, prop::option::of((0i64..30, arb_echo())))
            .prop_map(|(peer, secs, echo)| Op::Send { peer, secs, echo }),
    ]
}

fn incoming(id: i64, read: bool) -> Message {
    let peer = UserId::new(2 + id % 3);
    let mut message = Message::confirmed(
        MessageId::new(id),
        peer,
        ME,
        format!("peer message {id}"),
        at((id * 37) % 600),
    );
    message.is_read = read;
    message
}

/// Everything the driver fed in, for checking the store against.
#[derive(Default)]
struct Ledger {
    incoming: HashMap<i64, Message>,
    sends: Vec<(UserId, TempId, Option<MessageId>)>,
}

fn run(ops: &[Op]) -> (ConversationStore, Ledger) {
    let mut store = ConversationStore::new(ME);
    let mut ledger = Ledger::default();
    let mut next_server_id = 1000;

    for (n, op) in ops.iter().enumerate() {
        match *op {
            Op::Incoming { id, read } => {
                // The first delivery decides the read flag.
                let message = ledger
                    .incoming
                    .entry(id)
                    .or_insert_with(|| incoming(id, read))
                    .clone();
                store.reconcile(message);
            }
            Op::Send { peer, secs, echo } => {
                let peer = UserId::new(2 + peer);
                let temp_id = TempId::new(format!("t{n}"));
                let placeholder = store.next_placeholder();
                let content = format!("sent {n}");
                store.reconcile(Message::optimistic(
                    placeholder,
                    temp_id.clone(),
                    ME,
                    peer,
                    content.clone(),
                    at(secs),
                ));

                let confirmed = echo.map(|(delay, shape)| {
                    let id = MessageId::new(next_server_id);
                    next_server_id += 1;
                    let relay = Message::confirmed(id, ME, peer, content, at(secs + delay));
                    let mut tokened = relay.clone();
                    tokened.temp_id = Some(temp_id.clone());

                    if shape == Echo::RelayThenToken {
                        store.reconcile(relay.clone());
                    }
                    assert_eq!(store.reconcile(tokened.clone()).change, Change::Replaced);
                    match shape {
                        Echo::TokenThenRelay => {
                            assert_eq!(store.reconcile(relay).change, Change::Duplicate);
                        }
                        Echo::TokenTwice => {
                            assert_eq!(store.reconcile(tokened).change, Change::Duplicate);
                        }
                        Echo::Token | Echo::RelayThenToken => {}
                    }
                    id
                });
                ledger.sends.push((peer, temp_id, confirmed));
            }
        }
    }
    (store, ledger)
}

proptest! {
    #[test]
    fn server_ids_are_unique_and_history_is_ordered(ops in prop::collection::vec(arb_op(), 0..80)) {
        let (store, _) = run(&ops);
        for conversation in store.snapshot().iter() {
            let mut seen = HashSet::new();
            for message in conversation.messages.iter().filter(|m| m.is_confirmed()) {
                prop_assert!(seen.insert(message.id), "duplicate id {} with {}", message.id, conversation.peer());
            }
            prop_assert!(
                conversation.messages.windows(2).all(|w| w[0].created_at <= w[1].created_at),
                "history out of order with {}",
                conversation.peer()
            );
        }
    }

    #[test]
    fn every_send_appears_once_and_echo_confirms_it(ops in prop::collection::vec(arb_op(), 0..80)) {
        let (store, ledger) = run(&ops);
        for (peer, temp_id, confirmed) in &ledger.sends {
            let conversation = store.conversation(*peer).unwrap();
            let entries: Vec<&Message> = conversation
                .messages
                .iter()
                .filter(|m| m.temp_id.as_ref() == Some(temp_id))
                .collect();
            prop_assert_eq!(entries.len(), 1);
            match confirmed {
                Some(id) => {
                    prop_assert_eq!(entries[0].id, *id);
                    prop_assert_eq!(entries[0].delivery, Delivery::Confirmed);
                }
                None => {
                    prop_assert!(entries[0].id.is_placeholder());
                    prop_assert_eq!(entries[0].delivery, Delivery::Optimistic);
                }
            }
        }
    }

    #[test]
    fn unread_counts_match_unread_received_messages(ops in prop::collection::vec(arb_op(), 0..80)) {
        let (store, ledger) = run(&ops);
        for conversation in store.snapshot().iter() {
            let expected = ledger
                .incoming
                .values()
                .filter(|m| m.sender_id == conversation.peer() && !m.is_read)
                .count();
            prop_assert_eq!(conversation.unread_count, expected);
        }
    }

    #[test]
    fn redelivering_peer_messages_changes_nothing(ops in prop::collection::vec(arb_op(), 1..60)) {
        let (mut store, ledger) = run(&ops);
        let before = store.snapshot();
        for message in ledger.incoming.values() {
            let outcome = store.reconcile(message.clone());
            prop_assert_eq!(outcome.change, Change::Duplicate);
            prop_assert_eq!(outcome.needs_ack, None);
        }
        prop_assert!(Arc::ptr_eq(&before, &store.snapshot()));
    }

    #[test]
    fn most_recent_activity_leads_the_list(ops in prop::collection::vec(arb_op(), 1..60)) {
        let (store, _) = run(&ops);
        // Redeliveries do not reorder, so only first deliveries and sends count.
        let mut delivered = HashSet::new();
        let mut front = None;
        for op in &ops {
            match *op {
                Op::Incoming { id, .. } => {
                    if delivered.insert(id) {
                        front = Some(UserId::new(2 + id % 3));
                    }
                }
                Op::Send { peer, .. } => front = Some(UserId::new(2 + peer)),
            }
        }
        prop_assert_eq!(store.snapshot().first().map(|c| c.peer()), front);
    }
}
