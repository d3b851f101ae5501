//! Integration tests for the polling live queue.
//!
//! Snapshots replace local state wholesale; a poll that started earlier
//! must never overwrite one that started later, even when it finishes
//! last. The background poller reports every result on its channel.
//!
//! Verification command: `cargo test --test live_queue`

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::mpsc;

use convsync::queue::{
    LiveQueue, PollOutcome, QueueEntry, QueueError, QueueFilter, QueueSource, QueueStatus,
    QueueUpdate, StaticQueueSource,
};
use convsync_proto::message::Timestamp;

// =============================================================================
// Test helpers
// =============================================================================

fn entry(id: &str, priority: i32, arrived_min: i64, status: QueueStatus) -> QueueEntry {
    QueueEntry {
        id: id.to_string(),
        label: format!("ticket {id}"),
        priority,
        arrived_at: Timestamp::from_millis(arrived_min * 60_000),
        status,
        lane: None,
    }
}

fn ids<S: QueueSource + 'static>(queue: &LiveQueue<S>) -> Vec<String> {
    queue.entries().into_iter().map(|e| e.id).collect()
}

/// Source that answers each fetch with the next scripted response after
/// its scripted delay.
struct ScriptedSource {
    responses: Mutex<VecDeque<(Duration, Vec<QueueEntry>)>>,
}

impl ScriptedSource {
    fn new(responses: Vec<(Duration, Vec<QueueEntry>)>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

impl QueueSource for ScriptedSource {
    async fn fetch_snapshot(&self, _filter: &QueueFilter) -> Result<Vec<QueueEntry>, QueueError> {
        let next = self.responses.lock().pop_front();
        let Some((delay, entries)) = next else {
            return Err(QueueError::Unavailable("script exhausted".into()));
        };
        tokio::time::sleep(delay).await;
        Ok(entries)
    }
}

async fn next_update(updates: &mut mpsc::Receiver<QueueUpdate>) -> QueueUpdate {
    match tokio::time::timeout(Duration::from_secs(60), updates.recv()).await {
        Ok(Some(update)) => update,
        _ => panic!("poller went quiet"),
    }
}

// =============================================================================
// Stale guard
// =============================================================================

#[tokio::test(start_paused = true)]
async fn slow_older_poll_does_not_overwrite_newer_one() {
    let source = ScriptedSource::new(vec![
        (
            Duration::from_millis(500),
            vec![entry("old", 0, 1, QueueStatus::Waiting)],
        ),
        (
            Duration::from_millis(10),
            vec![
                entry("new-1", 0, 1, QueueStatus::Waiting),
                entry("new-2", 1, 2, QueueStatus::Waiting),
            ],
        ),
    ]);
    let queue = LiveQueue::new(source, QueueFilter::default());

    let (slow, fast) = tokio::join!(queue.poll_once(), queue.poll_once());

    assert_eq!(fast.unwrap(), PollOutcome::Applied { len: 2 });
    assert_eq!(slow.unwrap(), PollOutcome::Stale);
    assert_eq!(ids(&queue), vec!["new-2", "new-1"]);
}

#[tokio::test(start_paused = true)]
async fn polls_finishing_in_order_both_apply() {
    let source = ScriptedSource::new(vec![
        (Duration::from_millis(10), vec![entry("a", 0, 1, QueueStatus::Waiting)]),
        (Duration::from_millis(500), vec![entry("b", 0, 1, QueueStatus::Waiting)]),
    ]);
    let queue = LiveQueue::new(source, QueueFilter::default());

    let (first, second) = tokio::join!(queue.poll_once(), queue.poll_once());

    assert_eq!(first.unwrap(), PollOutcome::Applied { len: 1 });
    assert_eq!(second.unwrap(), PollOutcome::Applied { len: 1 });
    assert_eq!(ids(&queue), vec!["b"]);
}

// =============================================================================
// Background poller
// =============================================================================

#[tokio::test(start_paused = true)]
async fn poller_replaces_snapshot_each_interval() {
    let source = Arc::new(StaticQueueSource::new(vec![
        entry("t1", 0, 3, QueueStatus::Waiting),
        entry("t2", 0, 1, QueueStatus::Waiting),
        entry("t3", 0, 2, QueueStatus::Done),
    ]));
    let queue = Arc::new(LiveQueue::new(
        Arc::clone(&source),
        QueueFilter {
            statuses: vec![QueueStatus::Waiting, QueueStatus::Called],
            lane: None,
        },
    ));
    let (tx, mut updates) = mpsc::channel(8);
    let poller = queue.spawn_poller(Duration::from_secs(5), tx);

    assert_eq!(next_update(&mut updates).await, QueueUpdate::Replaced { len: 2 });
    assert_eq!(ids(&queue), vec!["t2", "t1"]);

    source.set(vec![
        entry("t1", 0, 3, QueueStatus::Called),
        entry("t4", 2, 9, QueueStatus::Waiting),
    ]);
    assert_eq!(next_update(&mut updates).await, QueueUpdate::Replaced { len: 2 });
    assert_eq!(ids(&queue), vec!["t4", "t1"]);

    poller.abort();
}

#[tokio::test(start_paused = true)]
async fn poller_reports_failures_and_keeps_last_snapshot() {
    let source = Arc::new(StaticQueueSource::new(vec![entry(
        "t1",
        0,
        1,
        QueueStatus::Waiting,
    )]));
    let queue = Arc::new(LiveQueue::new(Arc::clone(&source), QueueFilter::default()));
    let (tx, mut updates) = mpsc::channel(8);
    let poller = queue.spawn_poller(Duration::from_secs(5), tx);

    assert_eq!(next_update(&mut updates).await, QueueUpdate::Replaced { len: 1 });

    source.fail_next(1);
    assert!(matches!(
        next_update(&mut updates).await,
        QueueUpdate::PollFailed {
            error: QueueError::Unavailable(_)
        }
    ));
    assert_eq!(ids(&queue), vec!["t1"]);
    assert!(queue.last_error().is_some());

    assert_eq!(next_update(&mut updates).await, QueueUpdate::Replaced { len: 1 });
    assert!(queue.last_error().is_none());

    poller.abort();
}
