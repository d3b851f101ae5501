//! Push channel abstraction.
//!
//! The [`EventChannel`] trait delivers insert/update notifications for one
//! conversation at a time. A subscription is a [`SubscriptionHandle`] plus a
//! [`tokio::sync::mpsc::Receiver`] of [`ChannelEvent`]s; the receiver closing
//! means the channel dropped and the owner should resubscribe.
//!
//! # Invariant
//!
//! A handle must be passed to [`EventChannel::unsubscribe`] before its owner
//! subscribes to another conversation. Skipping that step leaks events from
//! the old conversation into whatever consumes the channel.

use std::fmt;

use tokio::sync::mpsc;

use convsync_proto::message::{ConversationId, Message};

/// Opaque identifier of one live subscription.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionHandle(u64);

impl SubscriptionHandle {
    /// Creates a handle from a raw id (channel implementations only).
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw id.
    #[must_use]
    pub const fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for SubscriptionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A change notification from the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    /// A new row was persisted.
    Insert(Message),
    /// An existing row changed: an edit, or a soft delete with a tombstone body.
    Update(Message),
}

impl ChannelEvent {
    /// The message carried by the event.
    #[must_use]
    pub const fn message(&self) -> &Message {
        match self {
            Self::Insert(m) | Self::Update(m) => m,
        }
    }
}

/// A live subscription: its handle and the stream of events.
///
/// Events arrive in the order the store emitted them, which is not
/// necessarily `created_at` order.
#[derive(Debug)]
pub struct Subscription {
    /// Handle to pass to [`EventChannel::unsubscribe`].
    pub handle: SubscriptionHandle,
    /// Incoming events; yields `None` once the channel drops.
    pub events: mpsc::Receiver<ChannelEvent>,
}

/// Errors that can occur when subscribing.
#[derive(Debug, thiserror::Error)]
pub enum ChannelError {
    /// The push service refused or could not establish the subscription.
    #[error("subscribe to {conversation} failed: {reason}")]
    SubscribeFailed {
        /// Conversation the subscription was for.
        conversation: ConversationId,
        /// Description of the failure.
        reason: String,
    },

    /// The push service is gone.
    #[error("push channel closed")]
    Closed,
}

/// Per-conversation push stream of store changes.
pub trait EventChannel: Send + Sync {
    /// Subscribe to insert/update notifications for one conversation.
    fn subscribe(
        &self,
        conversation: &ConversationId,
    ) -> impl std::future::Future<Output = Result<Subscription, ChannelError>> + Send;

    /// Tear down a subscription. Unknown handles are ignored.
    fn unsubscribe(
        &self,
        handle: SubscriptionHandle,
    ) -> impl std::future::Future<Output = ()> + Send;
}
