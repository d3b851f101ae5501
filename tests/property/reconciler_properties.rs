//! Property-based tests for the merged message list.
//!
//! Uses proptest to drive `OptimisticReconciler` through random sequences
//! of confirmations, updates, older pages, local sends and failures, and
//! checks after every step that:
//! 1. The list stays sorted by `(created_at, id)`.
//! 2. No store id appears twice.
//! 3. Every accepted store id is present, and nothing else is.
//! 4. Local entries are only removed by a confirmation.
//! 5. Re-delivering a confirmed message is a no-op.

use std::collections::HashSet;
use std::time::Duration;

use proptest::prelude::*;
use tokio::time::Instant;

use convsync::reconciler::{OptimisticReconciler, ReconcileConfig, ReconcileOutcome};
use convsync_proto::message::{
    ClientTempId, ConversationId, Message, MessageBody, MessageId, MessageStatus, SenderId,
    Timestamp,
};

const TEXTS: [&str; 3] = ["ok", "see you", "thanks"];

#[derive(Debug, Clone)]
enum Op {
    /// A confirmed message arrives on the push channel.
    Confirm { id: u8, at: i64, ours: bool, text: usize },
    /// A confirmed message changes (edit or delete).
    Update { id: u8, text: usize },
    /// An older page is merged.
    Prepend(Vec<(u8, i64)>),
    /// We send a message.
    Send { at: i64, text: usize },
    /// One of our pending sends fails.
    Fail { nth: usize },
}

fn arb_op() -> impl Strategy<Value = Op> {
    prop_oneof![
        4 => (0u8..30, 0i64..60, any::<bool>(), 0..TEXTS.len())
            .prop_map(|(id, at, ours, text)| Op::Confirm { id, at, ours, text }),
        1 => (0u8..30, 0..TEXTS.len()).prop_map(|(id, text)| Op::Update { id, text }),
        1 => prop::collection::vec((0u8..30, 0i64..60), 0..6).prop_map(Op::Prepend),
        3 => (0i64..60, 0..TEXTS.len()).prop_map(|(at, text)| Op::Send { at, text }),
        1 => (0usize..8).prop_map(|nth| Op::Fail { nth }),
    ]
}

fn conv() -> ConversationId {
    ConversationId::new("5511999990001")
}

fn sender(ours: bool) -> SenderId {
    SenderId::new(if ours { "clinic" } else { "patient" })
}

fn confirmed(id: u8, at: i64, ours: bool, text: usize) -> Message {
    Message::confirmed(
        format!("{id:02}"),
        conv(),
        sender(ours),
        MessageBody::text(TEXTS[text]),
        Timestamp::from_millis(at * 1_000),
    )
}

/// What the list must contain, tracked independently of the reconciler.
#[derive(Default)]
struct Model {
    ids: HashSet<MessageId>,
    pending: Vec<ClientTempId>,
    failed: HashSet<ClientTempId>,
}

fn check_invariants(list: &OptimisticReconciler, model: &Model) -> Result<(), TestCaseError> {
    let messages = list.messages();

    for pair in messages.windows(2) {
        prop_assert_ne!(pair[0].order_cmp(&pair[1]), std::cmp::Ordering::Greater);
    }

    let ids: Vec<&MessageId> = messages.iter().filter_map(|m| m.id.as_ref()).collect();
    let unique: HashSet<&MessageId> = ids.iter().copied().collect();
    prop_assert_eq!(ids.len(), unique.len(), "duplicate store id");
    prop_assert_eq!(unique, model.ids.iter().collect::<HashSet<_>>());

    prop_assert_eq!(list.pending_count(), model.pending.len());
    prop_assert_eq!(list.len(), model.ids.len() + model.pending.len() + model.failed.len());
    for temp_id in &model.failed {
        let entry = list.get_local(*temp_id);
        prop_assert_eq!(entry.map(|m| m.status), Some(MessageStatus::Failed));
    }
    for message in messages {
        prop_assert!(message.id.is_some() || message.client_temp_id.is_some());
    }
    Ok(())
}

proptest! {
    #[test]
    fn random_operations_preserve_list_invariants(ops in prop::collection::vec(arb_op(), 1..60)) {
        let mut list = OptimisticReconciler::new(ReconcileConfig::default());
        let mut model = Model::default();
        let now = Instant::now();

        for op in ops {
            match op {
                Op::Confirm { id, at, ours, text } => {
                    let message = confirmed(id, at, ours, text);
                    let message_id = message.id.clone().unwrap();
                    match list.reconcile(message) {
                        ReconcileOutcome::ReplacedPending { temp_id } => {
                            prop_assert!(model.pending.contains(&temp_id));
                            model.pending.retain(|t| *t != temp_id);
                            prop_assert!(model.ids.insert(message_id));
                        }
                        ReconcileOutcome::Inserted => prop_assert!(model.ids.insert(message_id)),
                        ReconcileOutcome::Duplicate => {
                            prop_assert!(model.ids.contains(&message_id));
                        }
                        ReconcileOutcome::Ignored => prop_assert!(false, "message with id ignored"),
                    }
                }
                Op::Update { id, text } => {
                    let known = model.ids.contains(&MessageId::new(format!("{id:02}")));
                    let mut message = confirmed(id, 30, false, text);
                    message.status = MessageStatus::Edited;
                    prop_assert_eq!(list.apply_update(message), known);
                }
                Op::Prepend(rows) => {
                    let page: Vec<Message> =
                        rows.iter().map(|(id, at)| confirmed(*id, *at, false, 0)).collect();
                    let before = model.ids.len();
                    for message in &page {
                        model.ids.insert(message.id.clone().unwrap());
                    }
                    prop_assert_eq!(list.prepend_older(page), model.ids.len() - before);
                }
                Op::Send { at, text } => {
                    let temp_id = ClientTempId::new();
                    let message = Message::pending(
                        temp_id,
                        conv(),
                        sender(true),
                        MessageBody::text(TEXTS[text]),
                        Timestamp::from_millis(at * 1_000),
                    );
                    prop_assert!(list.enqueue_pending(message, now));
                    model.pending.push(temp_id);
                }
                Op::Fail { nth } => {
                    if let Some(temp_id) = model.pending.get(nth).copied() {
                        prop_assert!(list.mark_failed(temp_id));
                        model.pending.retain(|t| *t != temp_id);
                        model.failed.insert(temp_id);
                    }
                }
            }
            check_invariants(&list, &model)?;
        }
    }

    #[test]
    fn redelivery_is_a_no_op(
        ops in prop::collection::vec((0u8..30, 0i64..60, any::<bool>(), 0..TEXTS.len()), 1..30),
        pick in any::<prop::sample::Index>(),
    ) {
        let mut list = OptimisticReconciler::new(ReconcileConfig::default());
        for (id, at, ours, text) in &ops {
            list.reconcile(confirmed(*id, *at, *ours, *text));
        }
        let before = list.messages().to_vec();

        let (id, at, ours, text) = ops[pick.index(ops.len())];
        prop_assert_eq!(list.reconcile(confirmed(id, at, ours, text)), ReconcileOutcome::Duplicate);
        prop_assert_eq!(list.messages(), before.as_slice());
    }

    #[test]
    fn seed_sorts_and_deduplicates(rows in prop::collection::vec((0u8..30, 0i64..60), 0..50)) {
        let mut list = OptimisticReconciler::new(ReconcileConfig::default());
        list.seed(rows.iter().map(|(id, at)| confirmed(*id, *at, false, 0)).collect());

        let expected: HashSet<u8> = rows.iter().map(|(id, _)| *id).collect();
        prop_assert_eq!(list.len(), expected.len());
        for pair in list.messages().windows(2) {
            prop_assert_ne!(pair[0].order_cmp(&pair[1]), std::cmp::Ordering::Greater);
        }
    }

    #[test]
    fn every_send_is_eventually_confirmed_or_failed(
        texts in prop::collection::vec(0..TEXTS.len(), 1..=5),
        confirm_mask in prop::collection::vec(any::<bool>(), 5),
    ) {
        let mut list = OptimisticReconciler::new(ReconcileConfig::default());
        let start = Instant::now();
        let mut sent = Vec::new();
        for (i, text) in texts.iter().enumerate() {
            let temp_id = ClientTempId::new();
            let at = i64::try_from(i).unwrap();
            list.enqueue_pending(
                Message::pending(
                    temp_id,
                    conv(),
                    sender(true),
                    MessageBody::text(TEXTS[*text]),
                    Timestamp::from_millis(at),
                ),
                start,
            );
            sent.push((at, *text));
        }

        for (i, (at, text)) in sent.iter().enumerate() {
            if confirm_mask[i] {
                let id = u8::try_from(i).unwrap();
                list.reconcile(confirmed(id, *at / 1_000, true, *text));
            }
        }
        list.expire_pending(start + Duration::from_secs(31), Duration::from_secs(30));

        prop_assert_eq!(list.pending_count(), 0);
        prop_assert_eq!(list.len(), sent.len());
        let confirmed_count = confirm_mask.iter().take(sent.len()).filter(|c| **c).count();
        let stored = list.messages().iter().filter(|m| m.id.is_some()).count();
        let failed = list.messages().iter().filter(|m| m.status == MessageStatus::Failed).count();
        prop_assert_eq!(stored, confirmed_count);
        prop_assert_eq!(failed, sent.len() - confirmed_count);
    }
}
