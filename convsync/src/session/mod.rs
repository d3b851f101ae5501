//! Conversation session: one live conversation at a time.
//!
//! [`ConversationSession`] ties the collaborators together. It owns the
//! merged list ([`OptimisticReconciler`]), the pagination state, the single
//! push subscription and the background tasks that feed it.
//!
//! # Concurrency
//!
//! All state sits behind one `parking_lot::Mutex` that is never held across
//! an `.await`. Every operation follows the same shape: take the lock, read
//! or mutate, release it, await a collaborator, take the lock again and
//! apply the result. Each `open` and `close` bumps an epoch; a result that
//! comes back stamped with an older epoch belongs to a conversation the
//! user already left and is discarded without side effects.
//!
//! # Events
//!
//! Changes are announced on a bounded [`SessionEvent`] channel with
//! best-effort `try_send`. A slow consumer loses notifications, never
//! state: [`ConversationSession::snapshot`] is always current.

mod tasks;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::{Mutex, MutexGuard};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use convsync_proto::message::{
    ClientTempId, ConversationId, ExternalMessageId, MediaRef, Message, MessageBody, MessageId,
    MessageStatus, ReplyLookup, SenderId, Timestamp,
};
use convsync_proto::row::RowError;

use crate::channel::{ChannelError, EventChannel, SubscriptionHandle};
use crate::gateway::{GatewayError, MessagingGateway};
use crate::pagination::{PaginationCoordinator, PaginationState};
use crate::reconciler::{OptimisticReconciler, ReconcileConfig};
use crate::store::{PageStore, StoreError};
use crate::viewport::{DEFAULT_TOP_THRESHOLD_PX, ScrollAnchor, Viewport};

/// Errors returned by session operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// A page fetch failed; the list was left untouched.
    #[error("fetch failed: {0}")]
    Fetch(StoreError),

    /// The store returned data that violates the message model.
    #[error("malformed data from store: {0}")]
    Malformed(RowError),

    /// Subscribing to the push channel failed.
    #[error("subscribe failed: {0}")]
    Subscribe(#[from] ChannelError),

    /// The gateway refused or failed the request.
    #[error("gateway error: {0}")]
    Send(#[from] GatewayError),

    /// No conversation is open.
    #[error("no conversation is open")]
    NotReady,

    /// Refused to send an empty message.
    #[error("message is empty")]
    EmptyMessage,

    /// The message is not in the loaded list.
    #[error("unknown message {0}")]
    UnknownMessage(MessageId),

    /// The message cannot be edited or deleted from here.
    #[error("message {id} cannot be changed: {reason}")]
    NotEditable {
        /// The message.
        id: MessageId,
        /// Why it was refused.
        reason: &'static str,
    },
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Malformed(row) => Self::Malformed(row),
            other => Self::Fetch(other),
        }
    }
}

/// What to do with a pending message whose send failed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SendFailurePolicy {
    /// Keep it in the list, marked `Failed`.
    #[default]
    MarkFailed,
    /// Take it out of the list.
    Remove,
}

/// Session tuning.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionConfig {
    /// Messages per history page.
    pub page_size: usize,
    /// Capacity of the [`SessionEvent`] channel.
    pub event_buffer: usize,
    /// How long a send may stay pending before it is failed.
    pub pending_timeout: Duration,
    /// How often pending entries are checked for expiry.
    pub sweep_interval: Duration,
    /// Wait between resubscribe attempts.
    pub resubscribe_delay: Duration,
    /// Resubscribe attempts before giving up on the push channel.
    pub max_resubscribe_attempts: u32,
    /// Scroll distance from the top that counts as "at the oldest message".
    pub top_threshold_px: f32,
    /// Failed-send handling.
    pub send_failure_policy: SendFailurePolicy,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            page_size: 40,
            event_buffer: 64,
            pending_timeout: Duration::from_secs(30),
            sweep_interval: Duration::from_secs(1),
            resubscribe_delay: Duration::from_millis(500),
            max_resubscribe_attempts: 5,
            top_threshold_px: DEFAULT_TOP_THRESHOLD_PX,
            send_failure_policy: SendFailurePolicy::MarkFailed,
        }
    }
}

/// Lifecycle phase of the session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// No conversation.
    Closed,
    /// A conversation is being loaded.
    Opening,
    /// Loaded and subscribed.
    Ready,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    /// The merged list changed; take a new snapshot.
    ListChanged {
        /// Conversation whose list changed.
        conversation: ConversationId,
    },
    /// A send failed or timed out.
    SendFailed {
        /// Conversation of the message.
        conversation: ConversationId,
        /// The local message that failed.
        temp_id: ClientTempId,
        /// What went wrong.
        error: GatewayError,
    },
    /// A page fetch failed.
    FetchFailed {
        /// Conversation being fetched.
        conversation: ConversationId,
        /// Description of the failure.
        error: String,
    },
    /// The push subscription dropped; resubscribing.
    SubscriptionLost {
        /// Affected conversation.
        conversation: ConversationId,
    },
    /// The push subscription was re-established.
    Resubscribed {
        /// Affected conversation.
        conversation: ConversationId,
    },
    /// The start of history was reached.
    HistoryExhausted {
        /// Affected conversation.
        conversation: ConversationId,
    },
}

/// Result of [`ConversationSession::open`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpenOutcome {
    /// The conversation is loaded and live.
    Ready,
    /// Another `open` or a `close` ran first; this one was abandoned.
    Superseded,
}

/// Result of [`ConversationSession::load_older`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// An older page was merged.
    Loaded {
        /// Messages added to the list.
        inserted: usize,
        /// Whether this was the last page.
        exhausted: bool,
    },
    /// Preconditions not met (already loading, exhausted, not at top).
    Skipped,
    /// The conversation changed while the page was in flight.
    Stale,
}

/// Point-in-time view of the session for rendering.
#[derive(Debug, Clone, Serialize)]
pub struct SessionSnapshot {
    /// Open conversation, if any.
    pub conversation: Option<ConversationId>,
    /// Lifecycle phase.
    pub phase: SessionPhase,
    /// Merged list, oldest first.
    pub messages: Vec<Message>,
    /// Messages still waiting for confirmation.
    pub pending: usize,
    /// Whether older history may exist.
    pub has_more_older: bool,
    /// Pagination state.
    pub pagination: PaginationState,
    /// Whether a push subscription is live.
    pub subscribed: bool,
    /// Most recent failure, cleared on open.
    pub last_error: Option<String>,
}

struct SessionState {
    epoch: u64,
    phase: SessionPhase,
    conversation: Option<ConversationId>,
    reconciler: OptimisticReconciler,
    pagination: PaginationCoordinator,
    subscription: Option<SubscriptionHandle>,
    tasks: Vec<JoinHandle<()>>,
    last_error: Option<String>,
}

impl SessionState {
    /// Stop the pump and sweeper of the current epoch.
    fn abort_tasks(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }

    /// The open conversation, if the session is ready.
    fn ready_conversation(&self) -> Result<ConversationId, SessionError> {
        match (&self.phase, &self.conversation) {
            (SessionPhase::Ready, Some(conversation)) => Ok(conversation.clone()),
            _ => Err(SessionError::NotReady),
        }
    }
}

struct Shared<P, C, G> {
    store: P,
    channel: C,
    gateway: G,
    local_sender: SenderId,
    config: SessionConfig,
    reconcile: ReconcileConfig,
    events: mpsc::Sender<SessionEvent>,
    state: Mutex<SessionState>,
}

impl<P, C, G> Shared<P, C, G> {
    /// Lock the state if `epoch` is still current.
    fn lock_current(&self, epoch: u64) -> Option<MutexGuard<'_, SessionState>> {
        let state = self.state.lock();
        (state.epoch == epoch).then_some(state)
    }

    fn emit(&self, event: SessionEvent) {
        if self.events.try_send(event).is_err() {
            tracing::debug!("session event dropped, consumer is behind or gone");
        }
    }

    fn list_changed(&self, conversation: &ConversationId) {
        self.emit(SessionEvent::ListChanged {
            conversation: conversation.clone(),
        });
    }

    /// Record a fetch failure that belongs to the current epoch.
    fn report_fetch_failure(
        &self,
        mut state: MutexGuard<'_, SessionState>,
        conversation: &ConversationId,
        err: &StoreError,
    ) {
        state.last_error = Some(err.to_string());
        drop(state);
        if err.is_malformed() {
            tracing::error!(
                conversation = %conversation,
                error = %err,
                "store returned malformed data"
            );
        } else {
            tracing::warn!(conversation = %conversation, error = %err, "page fetch failed");
        }
        self.emit(SessionEvent::FetchFailed {
            conversation: conversation.clone(),
            error: err.to_string(),
        });
    }

    /// Apply the failure policy to a local message and announce it.
    fn fail_send(&self, state: &mut SessionState, temp_id: ClientTempId) -> bool {
        match self.config.send_failure_policy {
            SendFailurePolicy::MarkFailed => state.reconciler.mark_failed(temp_id),
            SendFailurePolicy::Remove => state.reconciler.discard_local(temp_id),
        }
    }
}

/// A synchronized view of one conversation at a time.
///
/// Cheap to clone; clones drive the same session. Requires a Tokio runtime.
pub struct ConversationSession<P, C, G> {
    shared: Arc<Shared<P, C, G>>,
}

impl<P, C, G> Clone for ConversationSession<P, C, G> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<P, C, G> ConversationSession<P, C, G>
where
    P: PageStore + 'static,
    C: EventChannel + 'static,
    G: MessagingGateway + 'static,
{
    /// Create a closed session and the receiving end of its event stream.
    ///
    /// Messages sent through the session are authored by `local_sender`.
    pub fn new(
        store: P,
        channel: C,
        gateway: G,
        local_sender: SenderId,
        config: SessionConfig,
        reconcile: ReconcileConfig,
    ) -> (Self, mpsc::Receiver<SessionEvent>) {
        let (events, rx) = mpsc::channel(config.event_buffer.max(1));
        let state = SessionState {
            epoch: 0,
            phase: SessionPhase::Closed,
            conversation: None,
            reconciler: OptimisticReconciler::new(reconcile.clone()),
            pagination: PaginationCoordinator::new(),
            subscription: None,
            tasks: Vec::new(),
            last_error: None,
        };
        let shared = Arc::new(Shared {
            store,
            channel,
            gateway,
            local_sender,
            config,
            reconcile,
            events,
            state: Mutex::new(state),
        });
        (Self { shared }, rx)
    }

    /// Switch to `conversation`, abandoning whatever was open.
    ///
    /// Subscribes before fetching so that events racing the first page are
    /// buffered and merged after seeding instead of lost.
    ///
    /// # Errors
    ///
    /// Returns [`SessionError`] if subscribing or the first fetch fails;
    /// the session is then `Closed`. A concurrent `open`/`close` is not an
    /// error: it yields [`OpenOutcome::Superseded`].
    pub async fn open(&self, conversation: ConversationId) -> Result<OpenOutcome, SessionError> {
        let shared = &self.shared;
        let (epoch, previous) = {
            let mut state = shared.state.lock();
            state.epoch += 1;
            state.abort_tasks();
            state.phase = SessionPhase::Opening;
            state.conversation = Some(conversation.clone());
            state.reconciler = OptimisticReconciler::new(shared.reconcile.clone());
            state.pagination.reset();
            state.pagination.begin_initial();
            state.last_error = None;
            (state.epoch, state.subscription.take())
        };
        tracing::info!(conversation = %conversation, epoch, "opening conversation");
        shared.list_changed(&conversation);

        if let Some(handle) = previous {
            shared.channel.unsubscribe(handle).await;
            tracing::debug!(%handle, "previous subscription released");
        }

        let subscription = match shared.channel.subscribe(&conversation).await {
            Ok(subscription) => subscription,
            Err(err) => {
                let Some(mut state) = shared.lock_current(epoch) else {
                    return Ok(OpenOutcome::Superseded);
                };
                state.phase = SessionPhase::Closed;
                state.pagination.fail_initial();
                state.last_error = Some(err.to_string());
                drop(state);
                tracing::warn!(conversation = %conversation, error = %err, "subscribe failed");
                return Err(err.into());
            }
        };

        let handle = subscription.handle;
        let registered = if let Some(mut state) = shared.lock_current(epoch) {
            state.subscription = Some(handle);
            true
        } else {
            false
        };
        if !registered {
            shared.channel.unsubscribe(handle).await;
            tracing::debug!(conversation = %conversation, epoch, "open superseded after subscribe");
            return Ok(OpenOutcome::Superseded);
        }

        let fetched = shared
            .store
            .fetch_latest(&conversation, shared.config.page_size)
            .await;

        let page = {
            let Some(mut state) = shared.lock_current(epoch) else {
                tracing::debug!(
                    conversation = %conversation,
                    epoch,
                    "stale initial page discarded"
                );
                return Ok(OpenOutcome::Superseded);
            };
            match fetched {
                Ok(page) => {
                    state.reconciler.seed(page.messages);
                    state.pagination.finish_initial(page.has_more);
                    state.phase = SessionPhase::Ready;
                    state.tasks = vec![
                        tokio::spawn(tasks::pump_events(
                            Arc::clone(shared),
                            epoch,
                            conversation.clone(),
                            subscription.events,
                        )),
                        tokio::spawn(tasks::sweep_pending(Arc::clone(shared), epoch)),
                    ];
                    Ok(page.has_more)
                }
                Err(err) => {
                    state.phase = SessionPhase::Closed;
                    state.pagination.fail_initial();
                    let handle = state.subscription.take();
                    shared.report_fetch_failure(state, &conversation, &err);
                    Err((handle, err))
                }
            }
        };

        match page {
            Ok(has_more) => {
                tracing::info!(conversation = %conversation, epoch, has_more, "conversation ready");
                shared.list_changed(&conversation);
                if !has_more {
                    shared.emit(SessionEvent::HistoryExhausted {
                        conversation: conversation.clone(),
                    });
                }
                Ok(OpenOutcome::Ready)
            }
            Err((handle, err)) => {
                if let Some(handle) = handle {
                    shared.channel.unsubscribe(handle).await;
                }
                Err(err.into())
            }
        }
    }

    /// Close the open conversation, if any.
    pub async fn close(&self) {
        let (handle, conversation) = {
            let mut state = self.shared.state.lock();
            state.epoch += 1;
            state.abort_tasks();
            state.phase = SessionPhase::Closed;
            state.reconciler = OptimisticReconciler::new(self.shared.reconcile.clone());
            state.pagination.reset();
            (state.subscription.take(), state.conversation.take())
        };
        if let Some(handle) = handle {
            self.shared.channel.unsubscribe(handle).await;
        }
        if let Some(conversation) = conversation {
            tracing::info!(conversation = %conversation, "conversation closed");
            self.shared.list_changed(&conversation);
        }
    }

    /// Send a text message optimistically.
    ///
    /// The message shows up as `Pending` immediately; the push channel
    /// confirms it later. Returns its temp id.
    ///
    /// # Errors
    ///
    /// [`SessionError::EmptyMessage`] for blank text, [`SessionError::NotReady`]
    /// without an open conversation, [`SessionError::Send`] if the gateway
    /// failed (the entry is then handled per [`SendFailurePolicy`]).
    pub async fn send(&self, text: &str) -> Result<ClientTempId, SessionError> {
        if text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        self.submit(MessageBody::text(text)).await
    }

    /// Send a media message optimistically. See [`send`](Self::send).
    ///
    /// # Errors
    ///
    /// As for [`send`](Self::send), except that an empty caption is fine.
    pub async fn send_media(&self, media: MediaRef) -> Result<ClientTempId, SessionError> {
        self.submit(MessageBody::media(media)).await
    }

    async fn submit(&self, body: MessageBody) -> Result<ClientTempId, SessionError> {
        let shared = &self.shared;
        let temp_id = ClientTempId::new();
        let (epoch, conversation) = {
            let mut state = shared.state.lock();
            let conversation = state.ready_conversation()?;
            let pending = Message::pending(
                temp_id,
                conversation.clone(),
                shared.local_sender.clone(),
                body.clone(),
                Timestamp::now(),
            );
            state.reconciler.enqueue_pending(pending, Instant::now());
            (state.epoch, conversation)
        };
        tracing::debug!(conversation = %conversation, %temp_id, "pending message enqueued");
        shared.list_changed(&conversation);

        let result = match &body.media {
            Some(media) => shared.gateway.send_media(&conversation, media).await,
            None => shared.gateway.send_text(&conversation, &body.text).await,
        };

        let Some(mut state) = shared.lock_current(epoch) else {
            tracing::debug!(
                conversation = %conversation,
                %temp_id,
                "send outcome for a left conversation discarded"
            );
            return result.map(|_| temp_id).map_err(SessionError::from);
        };
        match result {
            Ok(external_id) => {
                state.reconciler.attach_external_id(temp_id, external_id);
                Ok(temp_id)
            }
            Err(err) => {
                if state.reconciler.confirmation_of(temp_id).is_some() {
                    tracing::debug!(
                        conversation = %conversation,
                        %temp_id,
                        error = %err,
                        "gateway error after the store confirmed the send, ignored"
                    );
                    return Ok(temp_id);
                }
                if !shared.fail_send(&mut state, temp_id) {
                    // The sweeper already failed and announced it.
                    return Err(err.into());
                }
                drop(state);
                tracing::warn!(conversation = %conversation, %temp_id, error = %err, "send failed");
                shared.emit(SessionEvent::SendFailed {
                    conversation: conversation.clone(),
                    temp_id,
                    error: err.clone(),
                });
                shared.list_changed(&conversation);
                Err(err.into())
            }
        }
    }

    /// Replace the text of one of our confirmed messages.
    ///
    /// The list changes only when the edit comes back through the push
    /// channel.
    ///
    /// # Errors
    ///
    /// [`SessionError::UnknownMessage`] / [`SessionError::NotEditable`] if
    /// the message cannot be edited, [`SessionError::Send`] on gateway
    /// failure.
    pub async fn edit(&self, id: &MessageId, new_text: &str) -> Result<(), SessionError> {
        if new_text.trim().is_empty() {
            return Err(SessionError::EmptyMessage);
        }
        let (conversation, external_id) = self.own_message(id)?;
        self.shared
            .gateway
            .edit_text(&conversation, &external_id, new_text)
            .await
            .inspect_err(|err| {
                tracing::warn!(conversation = %conversation, %id, error = %err, "edit failed");
            })?;
        tracing::debug!(conversation = %conversation, %id, "edit accepted");
        Ok(())
    }

    /// Delete one of our confirmed messages for everyone.
    ///
    /// # Errors
    ///
    /// As for [`edit`](Self::edit).
    pub async fn delete(&self, id: &MessageId) -> Result<(), SessionError> {
        let (conversation, external_id) = self.own_message(id)?;
        self.shared
            .gateway
            .delete_message(&conversation, &external_id)
            .await
            .inspect_err(|err| {
                tracing::warn!(conversation = %conversation, %id, error = %err, "delete failed");
            })?;
        tracing::debug!(conversation = %conversation, %id, "delete accepted");
        Ok(())
    }

    /// Resolve an editable message to its gateway address.
    fn own_message(
        &self,
        id: &MessageId,
    ) -> Result<(ConversationId, ExternalMessageId), SessionError> {
        let state = self.shared.state.lock();
        let conversation = state.ready_conversation()?;
        let message = state
            .reconciler
            .get(id)
            .ok_or_else(|| SessionError::UnknownMessage(id.clone()))?;
        let refuse = |reason| SessionError::NotEditable {
            id: id.clone(),
            reason,
        };
        if message.sender_id != self.shared.local_sender {
            return Err(refuse("sent by someone else"));
        }
        if message.status == MessageStatus::Deleted {
            return Err(refuse("already deleted"));
        }
        let external_id = message
            .external_message_id
            .clone()
            .ok_or_else(|| refuse("no gateway id"))?;
        Ok((conversation, external_id))
    }

    /// Load the page before the oldest loaded message, keeping the
    /// viewport's topmost row in place.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReady`] without an open conversation, or the
    /// fetch error (pagination returns to idle and may be retried).
    pub async fn load_older(
        &self,
        viewport: &mut dyn Viewport,
    ) -> Result<PageOutcome, SessionError> {
        let shared = &self.shared;
        let (epoch, conversation, cursor) = {
            let mut state = shared.state.lock();
            let conversation = state.ready_conversation()?;
            let at_top = viewport.is_at_oldest_visible(shared.config.top_threshold_px);
            let Some(cursor) = state.reconciler.oldest_cursor() else {
                return Ok(PageOutcome::Skipped);
            };
            let non_empty = !state.reconciler.is_empty();
            if !state.pagination.try_begin_older(non_empty, at_top) {
                return Ok(PageOutcome::Skipped);
            }
            (state.epoch, conversation, cursor)
        };
        tracing::debug!(conversation = %conversation, %cursor, "loading older page");

        let fetched = shared
            .store
            .fetch_older_than(&conversation, &cursor, shared.config.page_size)
            .await;

        let Some(mut state) = shared.lock_current(epoch) else {
            tracing::debug!(conversation = %conversation, "stale older page discarded");
            return Ok(PageOutcome::Stale);
        };
        let page = match fetched {
            Ok(page) => page,
            Err(err) => {
                state.pagination.fail_older();
                shared.report_fetch_failure(state, &conversation, &err);
                return Err(err.into());
            }
        };

        // Rows that arrived at the tail during the fetch must be measured
        // before the capture, or their height would count as prepended.
        viewport.relayout(state.reconciler.messages());
        let anchor = ScrollAnchor::capture(viewport);
        let inserted = state.reconciler.prepend_older(page.messages);
        viewport.relayout(state.reconciler.messages());
        anchor.restore(viewport);
        let exhausted = state.pagination.finish_older(page.has_more);
        drop(state);

        if inserted > 0 {
            shared.list_changed(&conversation);
        }
        if exhausted {
            tracing::info!(conversation = %conversation, "reached start of history");
            shared.emit(SessionEvent::HistoryExhausted {
                conversation: conversation.clone(),
            });
        }
        Ok(PageOutcome::Loaded {
            inserted,
            exhausted,
        })
    }

    /// Re-fetch the newest page and merge it, catching up on anything the
    /// push channel missed. Returns how many entries changed.
    ///
    /// # Errors
    ///
    /// [`SessionError::NotReady`] or the fetch error.
    pub async fn refresh_latest(&self) -> Result<usize, SessionError> {
        let (epoch, conversation) = {
            let state = self.shared.state.lock();
            (state.epoch, state.ready_conversation()?)
        };
        tasks::catch_up(&self.shared, epoch, &conversation).await
    }

    /// Current state for rendering.
    #[must_use]
    pub fn snapshot(&self) -> SessionSnapshot {
        let state = self.shared.state.lock();
        SessionSnapshot {
            conversation: state.conversation.clone(),
            phase: state.phase,
            messages: state.reconciler.messages().to_vec(),
            pending: state.reconciler.pending_count(),
            has_more_older: state.pagination.has_more_older(),
            pagination: state.pagination.state(),
            subscribed: state.subscription.is_some(),
            last_error: state.last_error.clone(),
        }
    }

    /// Look up the message a reply points at.
    ///
    /// `None` means "original unavailable": not loaded, or never existed.
    #[must_use]
    pub fn reply_target(&self, id: &MessageId) -> Option<Message> {
        let state = self.shared.state.lock();
        match state.reconciler.resolve_reply(id) {
            ReplyLookup::Found(message) => Some(message.clone()),
            ReplyLookup::Unavailable => None,
        }
    }

    /// The open conversation, if any.
    #[must_use]
    pub fn conversation(&self) -> Option<ConversationId> {
        self.shared.state.lock().conversation.clone()
    }

    /// Current lifecycle phase.
    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.shared.state.lock().phase
    }
}
