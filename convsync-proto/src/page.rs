//! Cursor pagination types.

use std::cmp::Ordering;

use serde::{Deserialize, Serialize};

use crate::message::{Message, MessageId, Timestamp};

/// Composite `(created_at, id)` cursor pointing at the oldest loaded message.
///
/// Timestamps are not unique, so the id is required to page across a run of
/// messages sharing one `created_at` without skipping or repeating any.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cursor {
    /// Timestamp of the oldest loaded message.
    pub created_at: Timestamp,
    /// Id of the oldest loaded message.
    pub id: MessageId,
}

impl Cursor {
    /// Creates a cursor from its parts.
    #[must_use]
    pub const fn new(created_at: Timestamp, id: MessageId) -> Self {
        Self { created_at, id }
    }

    /// Builds a cursor from a confirmed message; `None` for pending ones.
    #[must_use]
    pub fn of(message: &Message) -> Option<Self> {
        message
            .id
            .as_ref()
            .map(|id| Self::new(message.created_at, id.clone()))
    }

    /// Compares a `(created_at, id)` pair against this cursor.
    #[must_use]
    pub fn cmp_key(&self, created_at: &Timestamp, id: &str) -> Ordering {
        created_at
            .cmp(&self.created_at)
            .then_with(|| id.cmp(self.id.as_str()))
    }

    /// Whether a row with the given key is strictly older than the cursor.
    #[must_use]
    pub fn is_older(&self, created_at: &Timestamp, id: &str) -> bool {
        self.cmp_key(created_at, id) == Ordering::Less
    }
}

impl std::fmt::Display for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "({}, {})", self.created_at, self.id)
    }
}

/// One page of messages in chronological order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    /// Messages, oldest first.
    pub messages: Vec<Message>,
    /// Whether older messages may exist.
    pub has_more: bool,
}

impl Page {
    /// Builds a page from rows the store returned newest first.
    ///
    /// A page shorter than `page_size` means the start of history was
    /// reached.
    #[must_use]
    pub fn from_newest_first(mut rows: Vec<Message>, page_size: usize) -> Self {
        let has_more = page_size > 0 && rows.len() == page_size;
        rows.reverse();
        Self {
            messages: rows,
            has_more,
        }
    }

    /// An empty, exhausted page.
    #[must_use]
    pub const fn empty() -> Self {
        Self {
            messages: Vec::new(),
            has_more: false,
        }
    }

    /// Number of messages in the page.
    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    /// Whether the page holds no messages.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}
