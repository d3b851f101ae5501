//! Integration tests for push subscription recovery.
//!
//! When the push channel drops, the session resubscribes with backoff and
//! then re-fetches the newest page so that nothing persisted during the gap
//! is missed. Events that race the initial page are buffered by the
//! subscription and merged after seeding.
//!
//! Verification command: `cargo test --test subscription_recovery`

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use tokio::sync::mpsc;

use convsync::gateway::recording::RecordingGateway;
use convsync::reconciler::ReconcileConfig;
use convsync::session::{
    ConversationSession, SessionConfig, SessionError, SessionEvent, SessionPhase, SessionSnapshot,
};
use convsync::store::memory::MemoryBackend;
use convsync::store::{PageStore, StoreError};
use convsync_proto::message::{ConversationId, MessageStatus, SenderId, Timestamp};
use convsync_proto::page::{Cursor, Page};

// =============================================================================
// Test helpers
// =============================================================================

fn conv() -> ConversationId {
    ConversationId::new("5511999990001")
}

fn patient() -> SenderId {
    SenderId::new("patient")
}

fn fast_recovery(max_attempts: u32) -> SessionConfig {
    SessionConfig {
        resubscribe_delay: Duration::from_millis(5),
        max_resubscribe_attempts: max_attempts,
        ..SessionConfig::default()
    }
}

fn setup<P: PageStore + 'static>(
    store: P,
    backend: &MemoryBackend,
    config: SessionConfig,
) -> (
    ConversationSession<P, MemoryBackend, RecordingGateway>,
    mpsc::Receiver<SessionEvent>,
) {
    ConversationSession::new(
        store,
        backend.clone(),
        RecordingGateway::new(),
        SenderId::new("clinic"),
        config,
        ReconcileConfig::default(),
    )
}

async fn wait_for<P: PageStore + 'static>(
    session: &ConversationSession<P, MemoryBackend, RecordingGateway>,
    done: impl Fn(&SessionSnapshot) -> bool,
) -> SessionSnapshot {
    for _ in 0..200 {
        let snap = session.snapshot();
        if done(&snap) {
            return snap;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("condition not reached: {:#?}", session.snapshot());
}

async fn next_matching(
    events: &mut mpsc::Receiver<SessionEvent>,
    wanted: impl Fn(&SessionEvent) -> bool,
) -> SessionEvent {
    let found = tokio::time::timeout(Duration::from_secs(1), async {
        while let Some(event) = events.recv().await {
            if wanted(&event) {
                return Some(event);
            }
        }
        None
    })
    .await;
    match found {
        Ok(Some(event)) => event,
        _ => panic!("expected event did not arrive"),
    }
}

/// Page store that persists one extra message right after serving the
/// first page, as if it was written while the page was on the wire.
struct RacingStore {
    inner: MemoryBackend,
    raced: AtomicBool,
}

impl PageStore for RacingStore {
    async fn fetch_latest(
        &self,
        conversation: &ConversationId,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        let page = self.inner.fetch_latest(conversation, page_size).await?;
        if !self.raced.swap(true, Ordering::SeqCst) {
            self.inner
                .persist(conversation, &patient(), "raced", Timestamp::from_millis(50_000));
        }
        Ok(page)
    }

    async fn fetch_older_than(
        &self,
        conversation: &ConversationId,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        self.inner.fetch_older_than(conversation, cursor, page_size).await
    }
}

// =============================================================================
// Recovery
// =============================================================================

#[tokio::test]
async fn dropped_channel_resubscribes_and_catches_up() {
    let backend = MemoryBackend::new();
    let first = backend.persist(&conv(), &patient(), "hello", Timestamp::from_millis(1_000));
    backend.persist(&conv(), &patient(), "are you there?", Timestamp::from_millis(2_000));
    let (session, mut events) = setup(backend.clone(), &backend, fast_recovery(5));
    session.open(conv()).await.unwrap();

    backend.disconnect(&conv());
    // Written while nobody is listening.
    backend.persist(&conv(), &patient(), "missed", Timestamp::from_millis(3_000));
    backend.edit(&conv(), first.id.as_ref().unwrap(), "hello (edited)");

    next_matching(&mut events, |e| matches!(e, SessionEvent::SubscriptionLost { .. })).await;
    next_matching(&mut events, |e| matches!(e, SessionEvent::Resubscribed { .. })).await;

    let snap = wait_for(&session, |s| s.messages.len() == 3).await;
    assert_eq!(snap.messages[2].body.text, "missed");
    assert_eq!(snap.messages[0].status, MessageStatus::Edited);
    assert_eq!(snap.messages[0].body.text, "hello (edited)");
    assert!(snap.subscribed);
    assert_eq!(backend.subscriber_count(&conv()), 1);

    // Live delivery works again.
    backend.persist(&conv(), &patient(), "live", Timestamp::from_millis(4_000));
    wait_for(&session, |s| s.messages.len() == 4).await;
}

#[tokio::test]
async fn transient_subscribe_failures_are_retried() {
    let backend = MemoryBackend::new();
    backend.persist(&conv(), &patient(), "hello", Timestamp::from_millis(1_000));
    let (session, mut events) = setup(backend.clone(), &backend, fast_recovery(5));
    session.open(conv()).await.unwrap();

    backend.fail_next_subscribes(2);
    backend.disconnect(&conv());

    next_matching(&mut events, |e| matches!(e, SessionEvent::Resubscribed { .. })).await;
    let snap = wait_for(&session, |s| s.subscribed).await;
    assert!(snap.last_error.is_none());
    assert_eq!(backend.subscriber_count(&conv()), 1);
}

#[tokio::test]
async fn gives_up_after_max_attempts() {
    let backend = MemoryBackend::new();
    backend.persist(&conv(), &patient(), "hello", Timestamp::from_millis(1_000));
    let (session, mut events) = setup(backend.clone(), &backend, fast_recovery(2));
    session.open(conv()).await.unwrap();

    backend.fail_next_subscribes(10);
    backend.disconnect(&conv());
    next_matching(&mut events, |e| matches!(e, SessionEvent::SubscriptionLost { .. })).await;

    let snap = wait_for(&session, |s| s.last_error.is_some()).await;
    assert!(!snap.subscribed);
    assert_eq!(snap.phase, SessionPhase::Ready);
    assert_eq!(backend.subscriber_count(&conv()), 0);

    // Without push, a manual refresh still catches up.
    backend.persist(&conv(), &patient(), "polled", Timestamp::from_millis(2_000));
    assert_eq!(session.refresh_latest().await.unwrap(), 1);
    assert_eq!(session.snapshot().messages.len(), 2);
}

#[tokio::test]
async fn refresh_without_changes_reports_nothing() {
    let backend = MemoryBackend::new();
    backend.persist(&conv(), &patient(), "hello", Timestamp::from_millis(1_000));
    let (session, _events) = setup(backend.clone(), &backend, fast_recovery(5));
    session.open(conv()).await.unwrap();

    assert_eq!(session.refresh_latest().await.unwrap(), 0);
}

// =============================================================================
// Opening
// =============================================================================

#[tokio::test]
async fn subscribe_failure_fails_open_before_fetching() {
    let backend = MemoryBackend::new();
    backend.fail_next_subscribes(1);
    let (session, _events) = setup(backend.clone(), &backend, fast_recovery(5));

    assert!(matches!(
        session.open(conv()).await,
        Err(SessionError::Subscribe(_))
    ));
    assert_eq!(session.phase(), SessionPhase::Closed);
    assert!(backend.fetch_calls().is_empty());

    // The next attempt succeeds.
    session.open(conv()).await.unwrap();
    assert_eq!(session.phase(), SessionPhase::Ready);
}

#[tokio::test]
async fn message_racing_the_first_page_is_not_lost() {
    let backend = MemoryBackend::new();
    backend.persist(&conv(), &patient(), "hello", Timestamp::from_millis(1_000));
    let store = RacingStore {
        inner: backend.clone(),
        raced: AtomicBool::new(false),
    };
    let (session, _events) = setup(store, &backend, fast_recovery(5));

    session.open(conv()).await.unwrap();
    let snap = wait_for(&session, |s| s.messages.len() == 2).await;
    assert_eq!(snap.messages[1].body.text, "raced");
}
