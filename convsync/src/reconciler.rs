//! Merged message list and optimistic-send reconciliation.
//!
//! [`OptimisticReconciler`] owns the ordered list a conversation panel
//! renders. Three sources feed it: history pages ([`seed`], [`prepend_older`]),
//! local sends ([`enqueue_pending`]) and push events ([`reconcile`],
//! [`apply_update`]). Whatever the arrival order, the list stays sorted by
//! `(created_at, id)` and holds each store id at most once.
//!
//! A confirmed message has no shared id with the pending entry it confirms,
//! so matching is by fingerprint: same sender, close in time, and either the
//! same gateway id, the same body, or a confirmed body that contains the
//! pending one (the gateway may prepend a header). Only the newest
//! [`ReconcileConfig::match_window`] pending entries are candidates.
//!
//! [`seed`]: OptimisticReconciler::seed
//! [`prepend_older`]: OptimisticReconciler::prepend_older
//! [`enqueue_pending`]: OptimisticReconciler::enqueue_pending
//! [`reconcile`]: OptimisticReconciler::reconcile
//! [`apply_update`]: OptimisticReconciler::apply_update

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::time::Duration;

use tokio::time::Instant;

use convsync_proto::message::{
    ClientTempId, ExternalMessageId, Message, MessageId, MessageStatus, ReplyLookup,
};
use convsync_proto::page::Cursor;

/// Tuning for pending-message matching.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReconcileConfig {
    /// How many of the newest pending entries are considered for a match.
    pub match_window: usize,
    /// Maximum distance between a pending entry's and a confirmed
    /// message's `created_at` for them to match.
    pub match_max_age: Duration,
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            match_window: 5,
            match_max_age: Duration::from_secs(120),
        }
    }
}

/// What [`OptimisticReconciler::reconcile`] did with a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileOutcome {
    /// A pending entry was replaced in place.
    ReplacedPending {
        /// The temp id of the entry that was replaced.
        temp_id: ClientTempId,
    },
    /// The id was already in the list; nothing changed.
    Duplicate,
    /// The message was inserted at its sorted position.
    Inserted,
    /// The message carried no store id and was dropped.
    Ignored,
}

impl ReconcileOutcome {
    /// Whether the list changed.
    #[must_use]
    pub const fn changed(self) -> bool {
        matches!(self, Self::ReplacedPending { .. } | Self::Inserted)
    }
}

/// Bookkeeping for a message still waiting for confirmation.
#[derive(Debug, Clone)]
struct PendingSlot {
    temp_id: ClientTempId,
    enqueued_at: Instant,
}

/// How strongly a pending entry matches a confirmed message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum MatchStrength {
    Contained,
    SameBody,
    SameExternalId,
}

/// Ordered, deduplicated message list with pending-send tracking.
#[derive(Debug, Clone)]
pub struct OptimisticReconciler {
    config: ReconcileConfig,
    messages: Vec<Message>,
    ids: HashSet<MessageId>,
    /// In enqueue order, oldest first.
    pending: Vec<PendingSlot>,
    /// Store ids that replaced pending entries, by temp id.
    confirmed: HashMap<ClientTempId, MessageId>,
}

impl OptimisticReconciler {
    /// Create an empty list.
    #[must_use]
    pub fn new(config: ReconcileConfig) -> Self {
        Self {
            config,
            messages: Vec::new(),
            ids: HashSet::new(),
            pending: Vec::new(),
            confirmed: HashMap::new(),
        }
    }

    /// Replace the whole list with a fresh page of history.
    ///
    /// Pending entries are dropped along with everything else; the caller
    /// seeds only when opening a conversation.
    pub fn seed(&mut self, mut messages: Vec<Message>) {
        messages.sort_by(Message::order_cmp);
        self.messages.clear();
        self.ids.clear();
        self.pending.clear();
        self.confirmed.clear();

        for message in messages {
            let Some(id) = message.id.clone() else {
                tracing::debug!("seed skipped message without store id");
                continue;
            };
            if self.ids.insert(id) {
                self.messages.push(message);
            }
        }
    }

    /// Merge a page of older history. Ids already present are skipped.
    ///
    /// Returns how many messages were inserted.
    pub fn prepend_older(&mut self, messages: Vec<Message>) -> usize {
        let mut inserted = 0;
        for message in messages {
            let Some(id) = message.id.clone() else {
                continue;
            };
            if self.ids.contains(&id) {
                continue;
            }
            self.ids.insert(id);
            self.insert_sorted(message);
            inserted += 1;
        }
        inserted
    }

    /// Add a locally created message awaiting confirmation.
    ///
    /// Returns `false` (and does nothing) unless `message` is pending and
    /// carries a temp id not already in the list.
    pub fn enqueue_pending(&mut self, message: Message, now: Instant) -> bool {
        let Some(temp_id) = message.client_temp_id else {
            return false;
        };
        if !message.is_pending() || self.position_of_temp(temp_id).is_some() {
            return false;
        }
        self.insert_sorted(message);
        self.pending.push(PendingSlot {
            temp_id,
            enqueued_at: now,
        });
        true
    }

    /// Merge a confirmed message from the push channel.
    pub fn reconcile(&mut self, mut confirmed: Message) -> ReconcileOutcome {
        let Some(id) = confirmed.id.clone() else {
            tracing::debug!("confirmed message without store id ignored");
            return ReconcileOutcome::Ignored;
        };
        if self.ids.contains(&id) {
            return ReconcileOutcome::Duplicate;
        }

        if let Some(temp_id) = self.find_pending_match(&confirmed) {
            if let Some(pos) = self.position_of_temp(temp_id) {
                let local = self.messages.remove(pos);
                if confirmed.external_message_id.is_none() {
                    confirmed.external_message_id = local.external_message_id;
                }
            }
            self.pending.retain(|slot| slot.temp_id != temp_id);
            self.confirmed.insert(temp_id, id.clone());
            self.ids.insert(id);
            self.insert_sorted(confirmed);
            return ReconcileOutcome::ReplacedPending { temp_id };
        }

        self.ids.insert(id);
        self.insert_sorted(confirmed);
        ReconcileOutcome::Inserted
    }

    /// Replace the entry with the same store id. Absent ids are ignored.
    ///
    /// Returns whether an entry was replaced.
    pub fn apply_update(&mut self, updated: Message) -> bool {
        let Some(id) = updated.id.as_ref() else {
            return false;
        };
        let Some(pos) = self.position_of_id(id) else {
            return false;
        };

        if self.messages[pos].created_at == updated.created_at {
            self.messages[pos] = updated;
        } else {
            self.messages.remove(pos);
            self.insert_sorted(updated);
        }
        true
    }

    /// Merge a batch of confirmed messages, such as a catch-up refresh.
    ///
    /// New ids go through [`reconcile`](Self::reconcile) so they can
    /// confirm pending entries; known ids whose content changed are
    /// applied as updates. Returns how many entries changed.
    pub fn merge_confirmed(&mut self, messages: Vec<Message>) -> usize {
        let mut changed = 0;
        for message in messages {
            let unchanged = message
                .id
                .as_ref()
                .and_then(|id| self.position_of_id(id))
                .map(|pos| self.messages[pos] == message);
            match unchanged {
                Some(true) => {}
                Some(false) => {
                    if self.apply_update(message) {
                        changed += 1;
                    }
                }
                None => {
                    if self.reconcile(message).changed() {
                        changed += 1;
                    }
                }
            }
        }
        changed
    }

    /// Record the gateway id of a local send.
    ///
    /// If the send was already confirmed, the id goes to the confirmed
    /// message unless the store row carried one.
    pub fn attach_external_id(
        &mut self,
        temp_id: ClientTempId,
        external_id: ExternalMessageId,
    ) -> bool {
        if let Some(pos) = self.position_of_temp(temp_id) {
            self.messages[pos].external_message_id = Some(external_id);
            return true;
        }
        let Some(pos) = self
            .confirmed
            .get(&temp_id)
            .and_then(|id| self.position_of_id(id))
        else {
            return false;
        };
        let message = &mut self.messages[pos];
        if message.external_message_id.is_some() {
            return false;
        }
        message.external_message_id = Some(external_id);
        true
    }

    /// Move a pending entry to the terminal `Failed` state, in place.
    ///
    /// Returns `false` if the entry is gone or no longer pending.
    pub fn mark_failed(&mut self, temp_id: ClientTempId) -> bool {
        let Some(pos) = self.position_of_temp(temp_id) else {
            return false;
        };
        if !self.messages[pos].is_pending() {
            return false;
        }
        self.messages[pos].status = MessageStatus::Failed;
        self.pending.retain(|slot| slot.temp_id != temp_id);
        true
    }

    /// Remove a local (pending or failed) entry from the list.
    pub fn discard_local(&mut self, temp_id: ClientTempId) -> bool {
        let Some(pos) = self.position_of_temp(temp_id) else {
            return false;
        };
        self.messages.remove(pos);
        self.pending.retain(|slot| slot.temp_id != temp_id);
        true
    }

    /// Fail every pending entry enqueued at least `timeout` before `now`.
    ///
    /// Returns the temp ids that expired.
    pub fn expire_pending(&mut self, now: Instant, timeout: Duration) -> Vec<ClientTempId> {
        let expired: Vec<ClientTempId> = self
            .pending
            .iter()
            .filter(|slot| now.saturating_duration_since(slot.enqueued_at) >= timeout)
            .map(|slot| slot.temp_id)
            .collect();
        for temp_id in &expired {
            self.mark_failed(*temp_id);
        }
        expired
    }

    /// Cursor of the oldest confirmed message, used to page backwards.
    #[must_use]
    pub fn oldest_cursor(&self) -> Option<Cursor> {
        self.messages.iter().find_map(Cursor::of)
    }

    /// Look up the target of a reply among loaded messages.
    #[must_use]
    pub fn resolve_reply(&self, id: &MessageId) -> ReplyLookup<'_> {
        self.position_of_id(id)
            .map_or(ReplyLookup::Unavailable, |pos| {
                ReplyLookup::Found(&self.messages[pos])
            })
    }

    /// The merged list, oldest first.
    #[must_use]
    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    /// Find a loaded message by store id.
    #[must_use]
    pub fn get(&self, id: &MessageId) -> Option<&Message> {
        self.position_of_id(id).map(|pos| &self.messages[pos])
    }

    /// Store id of the message that confirmed a local send, if any.
    #[must_use]
    pub fn confirmation_of(&self, temp_id: ClientTempId) -> Option<&MessageId> {
        self.confirmed.get(&temp_id)
    }

    /// Find a local entry by temp id.
    #[must_use]
    pub fn get_local(&self, temp_id: ClientTempId) -> Option<&Message> {
        self.position_of_temp(temp_id).map(|pos| &self.messages[pos])
    }

    /// Number of entries still waiting for confirmation.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.len()
    }

    /// Number of entries in the list.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the list is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    fn insert_sorted(&mut self, message: Message) {
        let pos = self
            .messages
            .partition_point(|m| m.order_cmp(&message) != Ordering::Greater);
        self.messages.insert(pos, message);
    }

    fn position_of_id(&self, id: &MessageId) -> Option<usize> {
        if !self.ids.contains(id) {
            return None;
        }
        self.messages.iter().position(|m| m.id.as_ref() == Some(id))
    }

    fn position_of_temp(&self, temp_id: ClientTempId) -> Option<usize> {
        self.messages
            .iter()
            .rposition(|m| m.id.is_none() && m.client_temp_id == Some(temp_id))
    }

    /// Best pending candidate for `confirmed` within the match window.
    ///
    /// Ties in strength go to the oldest candidate, so two identical sends
    /// are confirmed in the order they were made.
    fn find_pending_match(&self, confirmed: &Message) -> Option<ClientTempId> {
        let window_start = self.pending.len().saturating_sub(self.config.match_window);
        let mut best: Option<(MatchStrength, ClientTempId)> = None;

        for slot in &self.pending[window_start..] {
            let Some(candidate) = self
                .position_of_temp(slot.temp_id)
                .map(|pos| &self.messages[pos])
            else {
                continue;
            };
            let Some(strength) = self.match_strength(candidate, confirmed) else {
                continue;
            };
            if best.is_none_or(|(current, _)| strength > current) {
                best = Some((strength, slot.temp_id));
            }
        }
        best.map(|(_, temp_id)| temp_id)
    }

    fn match_strength(&self, pending: &Message, confirmed: &Message) -> Option<MatchStrength> {
        if pending.conversation_id != confirmed.conversation_id
            || pending.sender_id != confirmed.sender_id
            || pending.created_at.abs_diff(&confirmed.created_at) > self.config.match_max_age
        {
            return None;
        }

        if let (Some(a), Some(b)) = (&pending.external_message_id, &confirmed.external_message_id) {
            // Both sides know the gateway id: it decides on its own.
            return (a == b).then_some(MatchStrength::SameExternalId);
        }
        if pending.body == confirmed.body {
            return Some(MatchStrength::SameBody);
        }
        let media_agrees =
            pending.body.media.is_none() || pending.body.media == confirmed.body.media;
        (media_agrees
            && !pending.body.text.is_empty()
            && confirmed.body.text.contains(&pending.body.text))
        .then_some(MatchStrength::Contained)
    }
}
