//! In-process backing store for testing and the demo binary.
//!
//! [`MemoryBackend`] plays both external collaborators at once: it answers
//! [`PageStore`] queries and serves the [`EventChannel`] push stream. Every
//! row written through it is broadcast to the subscribers of its
//! conversation, the way the real store's realtime feed behaves.
//!
//! Rows are kept in their raw [`MessageRow`] form and decoded on read, so
//! malformed rows injected with [`MemoryBackend::insert_row`] exercise the
//! same fail-fast path a real store response would.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use parking_lot::Mutex;
use tokio::sync::mpsc;

use convsync_proto::message::{
    ConversationId, ExternalMessageId, Message, MessageBody, MessageId, MessageStatus, SenderId,
    Timestamp,
};
use convsync_proto::page::{Cursor, Page};
use convsync_proto::row::MessageRow;

use super::{PageStore, StoreError};
use crate::channel::{ChannelError, ChannelEvent, EventChannel, Subscription, SubscriptionHandle};

/// Default capacity of each subscriber's event queue.
const DEFAULT_SUBSCRIBER_BUFFER: usize = 256;

/// A recorded page request, for asserting on pagination behavior.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchCall {
    /// A `fetch_latest` request.
    Latest {
        /// Conversation requested.
        conversation: ConversationId,
        /// Page size requested.
        page_size: usize,
    },
    /// A `fetch_older_than` request.
    Older {
        /// Conversation requested.
        conversation: ConversationId,
        /// Cursor sent.
        cursor: Cursor,
        /// Page size requested.
        page_size: usize,
    },
}

struct Subscriber {
    conversation: ConversationId,
    tx: mpsc::Sender<ChannelEvent>,
}

struct Inner {
    rows: Mutex<HashMap<ConversationId, Vec<MessageRow>>>,
    subscribers: Mutex<HashMap<u64, Subscriber>>,
    fetch_log: Mutex<Vec<FetchCall>>,
    next_handle: AtomicU64,
    next_id: AtomicU64,
    failing_fetches: AtomicUsize,
    failing_subscribes: AtomicUsize,
    subscriber_buffer: usize,
}

/// In-memory message store and push channel.
///
/// Cheap to clone; clones share the same data.
#[derive(Clone)]
pub struct MemoryBackend {
    inner: Arc<Inner>,
}

impl MemoryBackend {
    /// Create an empty backend.
    #[must_use]
    pub fn new() -> Self {
        Self::with_subscriber_buffer(DEFAULT_SUBSCRIBER_BUFFER)
    }

    /// Create an empty backend with a custom per-subscriber queue capacity.
    #[must_use]
    pub fn with_subscriber_buffer(buffer: usize) -> Self {
        Self {
            inner: Arc::new(Inner {
                rows: Mutex::new(HashMap::new()),
                subscribers: Mutex::new(HashMap::new()),
                fetch_log: Mutex::new(Vec::new()),
                next_handle: AtomicU64::new(1),
                next_id: AtomicU64::new(1),
                failing_fetches: AtomicUsize::new(0),
                failing_subscribes: AtomicUsize::new(0),
                subscriber_buffer: buffer.max(1),
            }),
        }
    }

    /// Persist a message and broadcast it as an insert.
    ///
    /// Messages without a store id get the next sequential id. Local-only
    /// fields (temp id, pending/failed status) are stripped, as the real
    /// store would never see them.
    pub fn insert(&self, mut message: Message) -> Message {
        if message.id.is_none() {
            let next = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
            message.id = Some(MessageId::new(next.to_string()));
        }
        message.client_temp_id = None;
        if message.status.is_local() {
            message.status = MessageStatus::Confirmed;
        }

        self.inner
            .rows
            .lock()
            .entry(message.conversation_id.clone())
            .or_default()
            .push(MessageRow::from(&message));
        self.broadcast(ChannelEvent::Insert(message.clone()));
        message
    }

    /// Persist a new text message with a store-assigned id.
    pub fn persist(
        &self,
        conversation: &ConversationId,
        sender: &SenderId,
        text: &str,
        created_at: Timestamp,
    ) -> Message {
        let next = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.insert(Message::confirmed(
            next.to_string(),
            conversation.clone(),
            sender.clone(),
            MessageBody::text(text),
            created_at,
        ))
    }

    /// Store a raw row without validation or broadcast.
    ///
    /// Used to simulate a store returning malformed data.
    pub fn insert_row(&self, conversation: &ConversationId, row: MessageRow) {
        self.inner
            .rows
            .lock()
            .entry(conversation.clone())
            .or_default()
            .push(row);
    }

    /// Replace a persisted message and broadcast the change as an update.
    ///
    /// Returns `false` if no row with that id exists.
    pub fn update(&self, message: Message) -> bool {
        let Some(id) = message.id.as_ref().map(MessageId::as_str) else {
            return false;
        };
        let replaced = {
            let mut rows = self.inner.rows.lock();
            rows.get_mut(&message.conversation_id)
                .and_then(|list| list.iter_mut().find(|r| r.id.as_deref() == Some(id)))
                .map(|row| *row = MessageRow::from(&message))
                .is_some()
        };
        if replaced {
            self.broadcast(ChannelEvent::Update(message));
        }
        replaced
    }

    /// Edit the text of a persisted message. Returns the updated message.
    pub fn edit(
        &self,
        conversation: &ConversationId,
        id: &MessageId,
        text: &str,
    ) -> Option<Message> {
        let mut message = self.get(conversation, id)?;
        message.body.text = text.to_string();
        message.status = MessageStatus::Edited;
        self.update(message.clone()).then_some(message)
    }

    /// Soft-delete a persisted message. Returns the tombstoned message.
    pub fn soft_delete(&self, conversation: &ConversationId, id: &MessageId) -> Option<Message> {
        let mut message = self.get(conversation, id)?;
        message.body = MessageBody::tombstone();
        message.status = MessageStatus::Deleted;
        self.update(message.clone()).then_some(message)
    }

    /// Look up a persisted message by id.
    #[must_use]
    pub fn get(&self, conversation: &ConversationId, id: &MessageId) -> Option<Message> {
        let rows = self.inner.rows.lock();
        rows.get(conversation)?
            .iter()
            .find(|r| r.id.as_deref() == Some(id.as_str()))
            .cloned()
            .and_then(|row| Message::try_from(row).ok())
    }

    /// Look up a persisted message by the gateway id it was sent under.
    #[must_use]
    pub fn find_by_external_id(
        &self,
        conversation: &ConversationId,
        external_id: &ExternalMessageId,
    ) -> Option<Message> {
        let rows = self.inner.rows.lock();
        rows.get(conversation)?
            .iter()
            .find(|r| r.external_message_id.as_deref() == Some(external_id.as_str()))
            .cloned()
            .and_then(|row| Message::try_from(row).ok())
    }

    /// Number of rows stored for a conversation.
    #[must_use]
    pub fn row_count(&self, conversation: &ConversationId) -> usize {
        self.inner.rows.lock().get(conversation).map_or(0, Vec::len)
    }

    /// Make the next `n` page fetches fail with [`StoreError::Unavailable`].
    pub fn fail_next_fetches(&self, n: usize) {
        self.inner.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` subscribe attempts fail.
    pub fn fail_next_subscribes(&self, n: usize) {
        self.inner.failing_subscribes.store(n, Ordering::SeqCst);
    }

    /// Drop every subscription to a conversation, as if the push service
    /// disconnected. Subscribers see their receiver close.
    pub fn disconnect(&self, conversation: &ConversationId) {
        self.inner
            .subscribers
            .lock()
            .retain(|_, sub| sub.conversation != *conversation);
        tracing::debug!(conversation = %conversation, "memory backend dropped subscribers");
    }

    /// Number of live subscriptions to a conversation.
    #[must_use]
    pub fn subscriber_count(&self, conversation: &ConversationId) -> usize {
        self.inner
            .subscribers
            .lock()
            .values()
            .filter(|sub| sub.conversation == *conversation && !sub.tx.is_closed())
            .count()
    }

    /// Every page request received so far, oldest first.
    #[must_use]
    pub fn fetch_calls(&self) -> Vec<FetchCall> {
        self.inner.fetch_log.lock().clone()
    }

    /// Consume one injected failure, if any remain.
    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }

    /// Rows of a conversation that pass `keep`, newest first, decoded.
    fn newest_first(
        &self,
        conversation: &ConversationId,
        page_size: usize,
        keep: impl Fn(&MessageRow) -> bool,
    ) -> Result<Vec<Message>, StoreError> {
        let mut rows: Vec<MessageRow> = self
            .inner
            .rows
            .lock()
            .get(conversation)
            .map(|list| list.iter().filter(|r| keep(r)).cloned().collect())
            .unwrap_or_default();

        rows.sort_by(|a, b| b.order_key().cmp(&a.order_key()));
        rows.truncate(page_size);

        rows.into_iter()
            .map(|row| Message::try_from(row).map_err(StoreError::from))
            .collect()
    }

    fn broadcast(&self, event: ChannelEvent) {
        let conversation = event.message().conversation_id.clone();
        let mut subscribers = self.inner.subscribers.lock();
        subscribers.retain(|handle, sub| {
            if sub.conversation != conversation {
                return true;
            }
            match sub.tx.try_send(event.clone()) {
                Ok(()) => true,
                Err(mpsc::error::TrySendError::Full(_)) => {
                    tracing::warn!(
                        handle,
                        conversation = %conversation,
                        "subscriber queue full, event dropped"
                    );
                    true
                }
                Err(mpsc::error::TrySendError::Closed(_)) => false,
            }
        });
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl PageStore for MemoryBackend {
    async fn fetch_latest(
        &self,
        conversation: &ConversationId,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        self.inner.fetch_log.lock().push(FetchCall::Latest {
            conversation: conversation.clone(),
            page_size,
        });
        if Self::take_failure(&self.inner.failing_fetches) {
            return Err(StoreError::Unavailable("injected fetch failure".into()));
        }

        let rows = self.newest_first(conversation, page_size, |_| true)?;
        Ok(Page::from_newest_first(rows, page_size))
    }

    async fn fetch_older_than(
        &self,
        conversation: &ConversationId,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        self.inner.fetch_log.lock().push(FetchCall::Older {
            conversation: conversation.clone(),
            cursor: cursor.clone(),
            page_size,
        });
        if Self::take_failure(&self.inner.failing_fetches) {
            return Err(StoreError::Unavailable("injected fetch failure".into()));
        }

        let rows = self.newest_first(conversation, page_size, |row| {
            let (ts, id) = row.order_key();
            cursor.is_older(&ts, &id)
        })?;
        Ok(Page::from_newest_first(rows, page_size))
    }
}

impl EventChannel for MemoryBackend {
    async fn subscribe(&self, conversation: &ConversationId) -> Result<Subscription, ChannelError> {
        if Self::take_failure(&self.inner.failing_subscribes) {
            return Err(ChannelError::SubscribeFailed {
                conversation: conversation.clone(),
                reason: "injected subscribe failure".into(),
            });
        }

        let raw = self.inner.next_handle.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(self.inner.subscriber_buffer);
        self.inner.subscribers.lock().insert(
            raw,
            Subscriber {
                conversation: conversation.clone(),
                tx,
            },
        );
        Ok(Subscription {
            handle: SubscriptionHandle::new(raw),
            events: rx,
        })
    }

    async fn unsubscribe(&self, handle: SubscriptionHandle) {
        self.inner.subscribers.lock().remove(&handle.as_u64());
    }
}
