//! Polling live queue.
//!
//! The work queue shown next to the conversation panel is kept fresh by
//! re-fetching a filtered snapshot on a timer and replacing local state
//! wholesale. There is no per-entry reconciliation: the only consistency
//! rule is that a poll started earlier never overwrites one started later.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use convsync_proto::message::Timestamp;

/// Errors from the queue source.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    /// The source could not be reached.
    #[error("queue source unavailable: {0}")]
    Unavailable(String),

    /// The source answered with something unusable.
    #[error("malformed queue snapshot: {0}")]
    Malformed(String),
}

/// Where an entry is in the clinic's flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// Checked in, not yet called.
    Waiting,
    /// Called to the desk.
    Called,
    /// Being attended.
    InService,
    /// Finished.
    Done,
}

/// One row of the live queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueEntry {
    /// Stable identifier.
    pub id: String,
    /// Display label (patient name, ticket number).
    pub label: String,
    /// Higher is more urgent.
    pub priority: i32,
    /// Check-in time.
    pub arrived_at: Timestamp,
    /// Current status.
    pub status: QueueStatus,
    /// Service lane, if the clinic splits the queue.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lane: Option<String>,
}

/// Which entries the queue shows.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueFilter {
    /// Statuses to keep; empty keeps all.
    #[serde(default)]
    pub statuses: Vec<QueueStatus>,
    /// Lane to keep; `None` keeps all.
    #[serde(default)]
    pub lane: Option<String>,
}

impl QueueFilter {
    /// Whether `entry` passes the filter.
    #[must_use]
    pub fn matches(&self, entry: &QueueEntry) -> bool {
        let status_ok = self.statuses.is_empty() || self.statuses.contains(&entry.status);
        let lane_ok = self.lane.is_none() || self.lane == entry.lane;
        status_ok && lane_ok
    }
}

/// Queue polling settings.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueueConfig {
    /// Time between polls.
    pub poll_interval: Duration,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_secs(5),
        }
    }
}

/// Backend the queue is polled from.
pub trait QueueSource: Send + Sync {
    /// Fetch the current queue. Sources may pre-filter; the queue filters
    /// again regardless.
    fn fetch_snapshot(
        &self,
        filter: &QueueFilter,
    ) -> impl std::future::Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send;
}

/// Result of one poll.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollOutcome {
    /// The snapshot replaced the local state.
    Applied {
        /// Entries now shown.
        len: usize,
    },
    /// A newer poll finished first; this one was discarded.
    Stale,
}

/// Notification sent by the background poller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueUpdate {
    /// A fresh snapshot is in place.
    Replaced {
        /// Entries now shown.
        len: usize,
    },
    /// A poll failed; the previous snapshot is kept.
    PollFailed {
        /// What went wrong.
        error: QueueError,
    },
}

#[derive(Debug, Default)]
struct QueueState {
    entries: Vec<QueueEntry>,
    applied_seq: u64,
    last_error: Option<QueueError>,
}

/// Filtered, sorted view of a polled queue.
pub struct LiveQueue<S> {
    source: S,
    filter: QueueFilter,
    next_seq: AtomicU64,
    state: Mutex<QueueState>,
}

impl<S: QueueSource + 'static> LiveQueue<S> {
    /// An empty queue over `source`.
    pub fn new(source: S, filter: QueueFilter) -> Self {
        Self {
            source,
            filter,
            next_seq: AtomicU64::new(1),
            state: Mutex::new(QueueState::default()),
        }
    }

    /// Fetch once and replace the local state.
    ///
    /// # Errors
    ///
    /// Returns the source error; the previous entries are kept and
    /// [`last_error`](Self::last_error) is set.
    pub async fn poll_once(&self) -> Result<PollOutcome, QueueError> {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let fetched = self.source.fetch_snapshot(&self.filter).await;

        let mut state = self.state.lock();
        if seq < state.applied_seq {
            tracing::debug!(seq, applied = state.applied_seq, "stale queue snapshot discarded");
            return Ok(PollOutcome::Stale);
        }
        match fetched {
            Ok(entries) => {
                let mut entries: Vec<QueueEntry> =
                    entries.into_iter().filter(|e| self.filter.matches(e)).collect();
                sort_entries(&mut entries);
                let len = entries.len();
                state.entries = entries;
                state.applied_seq = seq;
                state.last_error = None;
                Ok(PollOutcome::Applied { len })
            }
            Err(err) => {
                state.last_error = Some(err.clone());
                drop(state);
                tracing::warn!(error = %err, "queue poll failed");
                Err(err)
            }
        }
    }

    /// Poll every `interval` until the returned handle is aborted,
    /// reporting each result on `updates` (best effort).
    pub fn spawn_poller(
        self: &Arc<Self>,
        interval: Duration,
        updates: mpsc::Sender<QueueUpdate>,
    ) -> JoinHandle<()> {
        let queue = Arc::clone(self);
        tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval.max(Duration::from_millis(1)));
            tick.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                tick.tick().await;
                let update = match queue.poll_once().await {
                    Ok(PollOutcome::Applied { len }) => QueueUpdate::Replaced { len },
                    Ok(PollOutcome::Stale) => continue,
                    Err(error) => QueueUpdate::PollFailed { error },
                };
                let _ = updates.try_send(update);
            }
        })
    }

    /// Current entries, most urgent first.
    #[must_use]
    pub fn entries(&self) -> Vec<QueueEntry> {
        self.state.lock().entries.clone()
    }

    /// Error of the latest failed poll, cleared by the next success.
    #[must_use]
    pub fn last_error(&self) -> Option<QueueError> {
        self.state.lock().last_error.clone()
    }

    /// The filter in effect.
    #[must_use]
    pub const fn filter(&self) -> &QueueFilter {
        &self.filter
    }
}

/// Priority descending, then arrival ascending, then id.
fn sort_entries(entries: &mut [QueueEntry]) {
    entries.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| a.arrived_at.cmp(&b.arrived_at))
            .then_with(|| a.id.cmp(&b.id))
    });
}

/// Queue source backed by a mutable in-memory list.
#[derive(Debug, Default)]
pub struct StaticQueueSource {
    entries: Mutex<Vec<QueueEntry>>,
    failures: AtomicU64,
}

impl StaticQueueSource {
    /// A source serving `entries`.
    #[must_use]
    pub fn new(entries: Vec<QueueEntry>) -> Self {
        Self {
            entries: Mutex::new(entries),
            failures: AtomicU64::new(0),
        }
    }

    /// Replace what the source serves.
    pub fn set(&self, entries: Vec<QueueEntry>) {
        *self.entries.lock() = entries;
    }

    /// Make the next `n` fetches fail.
    pub fn fail_next(&self, n: u64) {
        self.failures.store(n, Ordering::SeqCst);
    }
}

impl QueueSource for StaticQueueSource {
    async fn fetch_snapshot(&self, _filter: &QueueFilter) -> Result<Vec<QueueEntry>, QueueError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(QueueError::Unavailable("injected queue failure".into()));
        }
        Ok(self.entries.lock().clone())
    }
}

impl<T: QueueSource> QueueSource for Arc<T> {
    fn fetch_snapshot(
        &self,
        filter: &QueueFilter,
    ) -> impl std::future::Future<Output = Result<Vec<QueueEntry>, QueueError>> + Send {
        (**self).fetch_snapshot(filter)
    }
}
