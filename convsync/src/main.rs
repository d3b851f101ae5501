//! `convsync`: headless demo of the sync engine.
//!
//! Runs a scripted session against the in-memory backend: opens a
//! conversation, scrolls back through its history, sends a message and
//! watches it get confirmed, switches conversations and polls the live
//! queue. Configuration via CLI flags, environment variables, or config
//! file (`~/.config/convsync/config.toml`).
//!
//! ```bash
//! cargo run --bin convsync -- --page-size 20 --log-level debug
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use tracing_appender::non_blocking::WorkerGuard;

use convsync::config::{CliArgs, EngineConfig};
use convsync::gateway::recording::RecordingGateway;
use convsync::queue::{
    LiveQueue, QueueEntry, QueueFilter, QueueStatus, QueueUpdate, StaticQueueSource,
};
use convsync::session::{ConversationSession, PageOutcome, SessionError, SessionEvent};
use convsync::store::memory::MemoryBackend;
use convsync::viewport::{RowViewport, Viewport};
use convsync_proto::message::{ConversationId, MessageStatus, SenderId, Timestamp};

/// Base timestamp for seeded history (2024-01-01T00:00:00Z).
const HISTORY_START_MS: i64 = 1_704_067_200_000;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    // Load and resolve configuration (CLI args > env > config file > defaults).
    let config = match EngineConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config: {e}");
            EngineConfig::default()
        }
    };

    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!("convsync demo starting");

    match run(&config, SenderId::new(cli.sender.clone())).await {
        Ok(()) => {
            tracing::info!("convsync demo finished");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "demo failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize logging to stderr, or to `file_path` if given.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    let (writer, guard) = match file_path {
        Some(path) => {
            let log_dir = path.parent()?;
            let file_name = path.file_name()?.to_str()?;
            tracing_appender::non_blocking(tracing_appender::rolling::never(log_dir, file_name))
        }
        None => tracing_appender::non_blocking(std::io::stderr()),
    };

    tracing_subscriber::fmt()
        .with_writer(writer)
        .with_env_filter(env_filter)
        .with_ansi(file_path.is_none())
        .init();

    Some(guard)
}

async fn run(config: &EngineConfig, operator: SenderId) -> Result<(), SessionError> {
    let backend = MemoryBackend::new();
    let patient_a = ConversationId::new("5511999990001");
    let patient_b = ConversationId::new("5511999990002");
    seed_history(&backend, &patient_a, 65);
    seed_history(&backend, &patient_b, 3);

    let gateway = RecordingGateway::new()
        .echo_into(backend.clone(), operator.clone())
        .with_header("*Clinic*");
    let (session, mut events) = ConversationSession::new(
        backend.clone(),
        backend.clone(),
        gateway,
        operator,
        config.session.clone(),
        config.reconcile.clone(),
    );

    let event_log = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            match event {
                SessionEvent::ListChanged { .. } => tracing::trace!("list changed"),
                other => tracing::info!(event = ?other, "session event"),
            }
        }
    });

    // Scroll back through the first conversation.
    session.open(patient_a.clone()).await?;
    let mut viewport = RowViewport::with_heights(640.0, |m| {
        if m.body.media.is_some() { 160.0 } else { 48.0 }
    });
    viewport.relayout(&session.snapshot().messages);
    println!("opened {patient_a}: {} messages", session.snapshot().messages.len());

    loop {
        match session.load_older(&mut viewport).await? {
            PageOutcome::Loaded {
                inserted,
                exhausted,
            } => {
                println!(
                    "  loaded {inserted} older messages, topmost row: {}",
                    viewport
                        .topmost_visible()
                        .map_or_else(|| "-".to_string(), ToString::to_string)
                );
                if exhausted {
                    break;
                }
                // The user keeps scrolling up.
                viewport.set_scroll_top(0.0);
            }
            PageOutcome::Skipped | PageOutcome::Stale => break,
        }
    }
    let snap = session.snapshot();
    println!(
        "history complete: {} messages, has_more_older={}",
        snap.messages.len(),
        snap.has_more_older
    );

    // Optimistic send, confirmed through the push channel.
    let temp_id = session
        .send("Your appointment is confirmed for tomorrow at 9:00")
        .await?;
    tokio::time::sleep(Duration::from_millis(50)).await;
    let snap = session.snapshot();
    let last = snap.messages.last();
    println!(
        "sent {temp_id}: now {:?} as id {}",
        last.map(|m| m.status).unwrap_or(MessageStatus::Pending),
        last.and_then(|m| m.id.as_ref())
            .map_or_else(|| "-".to_string(), ToString::to_string)
    );

    // Switch conversations.
    session.open(patient_b.clone()).await?;
    println!(
        "switched to {patient_b}: {} messages",
        session.snapshot().messages.len()
    );

    poll_queue(config).await;

    session.close().await;
    event_log.abort();

    if let Ok(json) = serde_json::to_string_pretty(&session.snapshot()) {
        println!("final snapshot: {json}");
    }
    Ok(())
}

/// Persist `count` alternating patient/clinic messages, one minute apart.
fn seed_history(backend: &MemoryBackend, conversation: &ConversationId, count: i64) {
    let patient = SenderId::new(format!("patient:{conversation}"));
    let clinic = SenderId::new("clinic");
    for i in 0..count {
        let sender = if i % 2 == 0 { &patient } else { &clinic };
        backend.persist(
            conversation,
            sender,
            &format!("message {i}"),
            Timestamp::from_millis(HISTORY_START_MS + i * 60_000),
        );
    }
}

async fn poll_queue(config: &EngineConfig) {
    let arrivals = [("t-101", 0, 5), ("t-102", 2, 9), ("t-103", 0, 1), ("t-104", 1, 3)];
    let entries = arrivals
        .into_iter()
        .map(|(id, priority, minute)| QueueEntry {
            id: id.to_string(),
            label: format!("ticket {id}"),
            priority,
            arrived_at: Timestamp::from_millis(HISTORY_START_MS + minute * 60_000),
            status: QueueStatus::Waiting,
            lane: None,
        })
        .collect();

    let queue = Arc::new(LiveQueue::new(
        StaticQueueSource::new(entries),
        QueueFilter {
            statuses: vec![QueueStatus::Waiting],
            lane: None,
        },
    ));
    let (tx, mut updates) = tokio::sync::mpsc::channel(4);
    let poller = queue.spawn_poller(config.queue.poll_interval, tx);

    match updates.recv().await {
        Some(QueueUpdate::Replaced { len }) => {
            let order: Vec<String> = queue.entries().into_iter().map(|e| e.id).collect();
            println!("queue ({len} waiting): {}", order.join(", "));
        }
        Some(QueueUpdate::PollFailed { error }) => println!("queue poll failed: {error}"),
        None => {}
    }
    poller.abort();
}
