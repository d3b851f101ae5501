//! Background tasks of an open conversation.
//!
//! Each `open` spawns one event pump and one pending sweeper, both stamped
//! with the epoch they were spawned for. They exit on their own once the
//! epoch moves on, and `open`/`close` also abort them outright.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::time::{Instant, MissedTickBehavior};

use convsync_proto::message::ConversationId;

use super::{SendFailurePolicy, SessionError, SessionEvent, Shared};
use crate::channel::{ChannelEvent, EventChannel};
use crate::gateway::{GatewayError, MessagingGateway};
use crate::reconciler::ReconcileOutcome;
use crate::store::PageStore;

/// Drain push events into the merged list, resubscribing when the channel
/// drops.
pub(super) async fn pump_events<P, C, G>(
    shared: Arc<Shared<P, C, G>>,
    epoch: u64,
    conversation: ConversationId,
    mut events: mpsc::Receiver<ChannelEvent>,
) where
    P: PageStore + 'static,
    C: EventChannel + 'static,
    G: MessagingGateway + 'static,
{
    loop {
        while let Some(event) = events.recv().await {
            if !apply_event(&shared, epoch, &conversation, event) {
                return;
            }
        }

        {
            let Some(mut state) = shared.lock_current(epoch) else {
                return;
            };
            state.subscription = None;
        }
        tracing::warn!(conversation = %conversation, "push subscription lost, resubscribing");
        shared.emit(SessionEvent::SubscriptionLost {
            conversation: conversation.clone(),
        });

        let Some(next) = resubscribe(&shared, epoch, &conversation).await else {
            return;
        };
        events = next;
        shared.emit(SessionEvent::Resubscribed {
            conversation: conversation.clone(),
        });

        // Anything persisted while we were disconnected never reached us.
        if let Err(err) = catch_up(&shared, epoch, &conversation).await {
            tracing::debug!(
                conversation = %conversation,
                error = %err,
                "catch-up after resubscribe failed"
            );
        }
    }
}

/// Merge one push event. Returns `false` once the epoch is stale.
fn apply_event<P, C, G>(
    shared: &Shared<P, C, G>,
    epoch: u64,
    conversation: &ConversationId,
    event: ChannelEvent,
) -> bool {
    let Some(mut state) = shared.lock_current(epoch) else {
        tracing::debug!(conversation = %conversation, "event for a left conversation discarded");
        return false;
    };
    if event.message().conversation_id != *conversation {
        tracing::debug!(
            conversation = %conversation,
            other = %event.message().conversation_id,
            "event for another conversation dropped"
        );
        return true;
    }

    let changed = match event {
        ChannelEvent::Insert(message) => {
            let outcome = state.reconciler.reconcile(message);
            if outcome == ReconcileOutcome::Duplicate {
                tracing::debug!(conversation = %conversation, "duplicate insert ignored");
            }
            outcome.changed()
        }
        ChannelEvent::Update(message) => state.reconciler.apply_update(message),
    };
    drop(state);

    if changed {
        shared.list_changed(conversation);
    }
    true
}

/// Wait before resubscribe attempt `attempt` (1-based). Saturates instead
/// of overflowing for very large configured delays.
const fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(attempt)
}

/// Retry `subscribe` with linearly growing delays.
async fn resubscribe<P, C, G>(
    shared: &Shared<P, C, G>,
    epoch: u64,
    conversation: &ConversationId,
) -> Option<mpsc::Receiver<ChannelEvent>>
where
    C: EventChannel,
{
    let attempts = shared.config.max_resubscribe_attempts;
    for attempt in 1..=attempts {
        tokio::time::sleep(backoff_delay(shared.config.resubscribe_delay, attempt)).await;
        if shared.lock_current(epoch).is_none() {
            return None;
        }

        match shared.channel.subscribe(conversation).await {
            Ok(subscription) => {
                let registered = if let Some(mut state) = shared.lock_current(epoch) {
                    state.subscription = Some(subscription.handle);
                    true
                } else {
                    false
                };
                if !registered {
                    shared.channel.unsubscribe(subscription.handle).await;
                    return None;
                }
                tracing::info!(conversation = %conversation, attempt, "push subscription restored");
                return Some(subscription.events);
            }
            Err(err) => {
                tracing::warn!(
                    conversation = %conversation,
                    attempt,
                    error = %err,
                    "resubscribe attempt failed"
                );
            }
        }
    }

    if let Some(mut state) = shared.lock_current(epoch) {
        state.last_error = Some(format!("push subscription lost after {attempts} attempts"));
    }
    tracing::error!(conversation = %conversation, attempts, "giving up on push subscription");
    None
}

/// Fetch the newest page and merge it into the list of `epoch`.
pub(super) async fn catch_up<P, C, G>(
    shared: &Shared<P, C, G>,
    epoch: u64,
    conversation: &ConversationId,
) -> Result<usize, SessionError>
where
    P: PageStore,
{
    let fetched = shared
        .store
        .fetch_latest(conversation, shared.config.page_size)
        .await;

    let Some(mut state) = shared.lock_current(epoch) else {
        tracing::debug!(conversation = %conversation, "stale catch-up page discarded");
        return Ok(0);
    };
    match fetched {
        Ok(page) => {
            let changed = state.reconciler.merge_confirmed(page.messages);
            drop(state);
            tracing::debug!(conversation = %conversation, changed, "caught up with store");
            if changed > 0 {
                shared.list_changed(conversation);
            }
            Ok(changed)
        }
        Err(err) => {
            shared.report_fetch_failure(state, conversation, &err);
            Err(err.into())
        }
    }
}

/// Periodically fail pending messages that were never confirmed.
pub(super) async fn sweep_pending<P, C, G>(shared: Arc<Shared<P, C, G>>, epoch: u64)
where
    P: PageStore + 'static,
    C: EventChannel + 'static,
    G: MessagingGateway + 'static,
{
    let period = shared.config.sweep_interval.max(Duration::from_millis(1));
    let mut tick = tokio::time::interval(period);
    tick.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tick.tick().await;
        let (conversation, expired) = {
            let Some(mut state) = shared.lock_current(epoch) else {
                return;
            };
            let Some(conversation) = state.conversation.clone() else {
                return;
            };
            let expired = state
                .reconciler
                .expire_pending(Instant::now(), shared.config.pending_timeout);
            if shared.config.send_failure_policy == SendFailurePolicy::Remove {
                for temp_id in &expired {
                    state.reconciler.discard_local(*temp_id);
                }
            }
            (conversation, expired)
        };
        if expired.is_empty() {
            continue;
        }

        for temp_id in expired {
            tracing::warn!(conversation = %conversation, %temp_id, "pending message timed out");
            shared.emit(SessionEvent::SendFailed {
                conversation: conversation.clone(),
                temp_id,
                error: GatewayError::Timeout,
            });
        }
        shared.list_changed(&conversation);
    }
}
