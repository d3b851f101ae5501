//! Paginated access to the message store.
//!
//! Defines the [`PageStore`] trait the session reads history through.
//! Concrete implementations include:
//! - [`memory::MemoryBackend`]: in-process store that also serves the push
//!   channel, used by tests and the demo binary

pub mod memory;

use convsync_proto::message::ConversationId;
use convsync_proto::page::{Cursor, Page};
use convsync_proto::row::RowError;

/// Errors that can occur while fetching a page.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The store could not be reached.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// The query ran but failed.
    #[error("read failed: {0}")]
    ReadFailed(String),

    /// The store returned a row that does not satisfy the message model.
    #[error("malformed row: {0}")]
    Malformed(#[from] RowError),
}

impl StoreError {
    /// Whether the error is the fail-fast malformed-data case rather than a
    /// transient failure worth retrying.
    #[must_use]
    pub const fn is_malformed(&self) -> bool {
        matches!(self, Self::Malformed(_))
    }
}

/// Cursor-paginated, read-only view of a conversation's messages.
///
/// Implementations hold no session state: every call is a self-contained
/// request. Pages are returned in chronological order; implementations
/// build them with [`Page::from_newest_first`] so the `has_more` rule is
/// shared.
pub trait PageStore: Send + Sync {
    /// Fetch the newest `page_size` messages of a conversation.
    ///
    /// `has_more` is `true` iff exactly `page_size` rows came back.
    fn fetch_latest(
        &self,
        conversation: &ConversationId,
        page_size: usize,
    ) -> impl std::future::Future<Output = Result<Page, StoreError>> + Send;

    /// Fetch up to `page_size` messages strictly older than `cursor`.
    ///
    /// "Older" compares `(created_at, id)` so that messages sharing a
    /// timestamp are neither skipped nor repeated across pages.
    fn fetch_older_than(
        &self,
        conversation: &ConversationId,
        cursor: &Cursor,
        page_size: usize,
    ) -> impl std::future::Future<Output = Result<Page, StoreError>> + Send;
}
