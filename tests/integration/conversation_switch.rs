//! Integration tests for switching conversations.
//!
//! A page or send result that arrives after the user moved to another
//! conversation must be dropped without touching the new conversation's
//! list. The page store here can hold a request at a gate so the tests
//! decide exactly when a late response lands.
//!
//! Verification command: `cargo test --test conversation_switch`

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

use convsync::gateway::recording::RecordingGateway;
use convsync::reconciler::ReconcileConfig;
use convsync::session::{
    ConversationSession, OpenOutcome, PageOutcome, SessionConfig, SessionPhase,
};
use convsync::store::memory::MemoryBackend;
use convsync::store::{PageStore, StoreError};
use convsync::viewport::RowViewport;
use convsync_proto::message::{ConversationId, SenderId, Timestamp};
use convsync_proto::page::{Cursor, Page};

// =============================================================================
// Test helpers
// =============================================================================

/// A point where a fetch stops until the test lets it through.
#[derive(Default)]
struct Gate {
    entered: Notify,
    release: Notify,
}

impl Gate {
    async fn pass(&self) {
        self.entered.notify_one();
        self.release.notified().await;
    }
}

/// Page store that can hold the first page of one conversation, or every
/// older page, at a gate.
#[derive(Clone)]
struct GatedStore {
    inner: MemoryBackend,
    latest: Option<(ConversationId, Arc<Gate>)>,
    older: Option<Arc<Gate>>,
}

impl PageStore for GatedStore {
    async fn fetch_latest(
        &self,
        conversation: &ConversationId,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        if let Some((held, gate)) = &self.latest {
            if held == conversation {
                gate.pass().await;
            }
        }
        self.inner.fetch_latest(conversation, page_size).await
    }

    async fn fetch_older_than(
        &self,
        conversation: &ConversationId,
        cursor: &Cursor,
        page_size: usize,
    ) -> Result<Page, StoreError> {
        if let Some(gate) = &self.older {
            gate.pass().await;
        }
        self.inner.fetch_older_than(conversation, cursor, page_size).await
    }
}

type Session = ConversationSession<GatedStore, MemoryBackend, RecordingGateway>;

fn conv_a() -> ConversationId {
    ConversationId::new("5511999990001")
}

fn conv_b() -> ConversationId {
    ConversationId::new("5511999990002")
}

fn patient() -> SenderId {
    SenderId::new("patient")
}

fn seed(backend: &MemoryBackend, conversation: &ConversationId, prefix: &str, count: i64) {
    for i in 0..count {
        backend.persist(
            conversation,
            &patient(),
            &format!("{prefix}{i}"),
            Timestamp::from_millis(1_000 * i),
        );
    }
}

fn new_session(store: GatedStore, backend: &MemoryBackend, gateway: RecordingGateway) -> Session {
    let (session, _events) = ConversationSession::new(
        store,
        backend.clone(),
        gateway,
        SenderId::new("clinic"),
        SessionConfig {
            page_size: 40,
            ..SessionConfig::default()
        },
        ReconcileConfig::default(),
    );
    session
}

fn ungated(backend: &MemoryBackend) -> GatedStore {
    GatedStore {
        inner: backend.clone(),
        latest: None,
        older: None,
    }
}

fn all_text_starts_with(session: &Session, prefix: &str) -> bool {
    session
        .snapshot()
        .messages
        .iter()
        .all(|m| m.body.text.starts_with(prefix))
}

// =============================================================================
// Stale initial page
// =============================================================================

#[tokio::test]
async fn late_first_page_of_previous_conversation_is_dropped() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_a(), "a", 5);
    seed(&backend, &conv_b(), "b", 3);
    let gate = Arc::new(Gate::default());
    let store = GatedStore {
        inner: backend.clone(),
        latest: Some((conv_a(), Arc::clone(&gate))),
        older: None,
    };
    let session = new_session(store, &backend, RecordingGateway::new());

    let opening_a = {
        let session = session.clone();
        tokio::spawn(async move { session.open(conv_a()).await })
    };
    gate.entered.notified().await;

    assert_eq!(session.open(conv_b()).await.unwrap(), OpenOutcome::Ready);
    gate.release.notify_one();
    assert_eq!(opening_a.await.unwrap().unwrap(), OpenOutcome::Superseded);

    let snap = session.snapshot();
    assert_eq!(snap.conversation, Some(conv_b()));
    assert_eq!(snap.phase, SessionPhase::Ready);
    assert_eq!(snap.messages.len(), 3);
    assert!(all_text_starts_with(&session, "b"));

    assert_eq!(backend.subscriber_count(&conv_a()), 0);
    assert_eq!(backend.subscriber_count(&conv_b()), 1);
}

#[tokio::test]
async fn close_during_open_supersedes_it() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_a(), "a", 5);
    let gate = Arc::new(Gate::default());
    let store = GatedStore {
        inner: backend.clone(),
        latest: Some((conv_a(), Arc::clone(&gate))),
        older: None,
    };
    let session = new_session(store, &backend, RecordingGateway::new());

    let opening = {
        let session = session.clone();
        tokio::spawn(async move { session.open(conv_a()).await })
    };
    gate.entered.notified().await;
    session.close().await;
    gate.release.notify_one();

    assert_eq!(opening.await.unwrap().unwrap(), OpenOutcome::Superseded);
    let snap = session.snapshot();
    assert_eq!(snap.phase, SessionPhase::Closed);
    assert!(snap.messages.is_empty());
    assert_eq!(backend.subscriber_count(&conv_a()), 0);
}

// =============================================================================
// Stale events, pages and sends
// =============================================================================

#[tokio::test]
async fn events_of_previous_conversation_are_not_applied() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_a(), "a", 2);
    seed(&backend, &conv_b(), "b", 2);
    let session = new_session(ungated(&backend), &backend, RecordingGateway::new());

    session.open(conv_a()).await.unwrap();
    session.open(conv_b()).await.unwrap();

    backend.persist(&conv_a(), &patient(), "a-late", Timestamp::from_millis(9_000));
    backend.persist(&conv_b(), &patient(), "b-live", Timestamp::from_millis(9_000));
    tokio::time::sleep(Duration::from_millis(20)).await;

    let snap = session.snapshot();
    assert_eq!(snap.messages.len(), 3);
    assert_eq!(snap.messages[2].body.text, "b-live");
    assert!(all_text_starts_with(&session, "b"));
}

#[tokio::test]
async fn late_older_page_is_stale_after_switch() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_a(), "a", 65);
    seed(&backend, &conv_b(), "b", 3);
    let gate = Arc::new(Gate::default());
    let store = GatedStore {
        inner: backend.clone(),
        latest: None,
        older: Some(Arc::clone(&gate)),
    };
    let session = new_session(store, &backend, RecordingGateway::new());
    session.open(conv_a()).await.unwrap();

    let loading = {
        let session = session.clone();
        tokio::spawn(async move {
            let mut viewport = RowViewport::uniform(400.0, 20.0);
            session.load_older(&mut viewport).await
        })
    };
    gate.entered.notified().await;

    session.open(conv_b()).await.unwrap();
    gate.release.notify_one();

    assert_eq!(loading.await.unwrap().unwrap(), PageOutcome::Stale);
    let snap = session.snapshot();
    assert_eq!(snap.messages.len(), 3);
    assert!(all_text_starts_with(&session, "b"));
}

#[tokio::test]
async fn send_finishing_after_switch_leaves_new_list_alone() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_b(), "b", 1);
    let gateway = RecordingGateway::new().with_latency(Duration::from_millis(30));
    let session = new_session(ungated(&backend), &backend, gateway);
    session.open(conv_a()).await.unwrap();

    let sending = {
        let session = session.clone();
        tokio::spawn(async move { session.send("for patient A").await })
    };
    tokio::time::sleep(Duration::from_millis(5)).await;
    assert_eq!(session.snapshot().pending, 1);

    session.open(conv_b()).await.unwrap();
    assert!(sending.await.unwrap().is_ok());

    let snap = session.snapshot();
    assert_eq!(snap.pending, 0);
    assert_eq!(snap.messages.len(), 1);
    assert!(all_text_starts_with(&session, "b"));
}

#[tokio::test]
async fn reopening_same_conversation_starts_fresh() {
    let backend = MemoryBackend::new();
    seed(&backend, &conv_a(), "a", 2);
    let session = new_session(ungated(&backend), &backend, RecordingGateway::new());

    session.open(conv_a()).await.unwrap();
    session.open(conv_a()).await.unwrap();

    assert_eq!(session.snapshot().messages.len(), 2);
    assert_eq!(backend.subscriber_count(&conv_a()), 1);
}
