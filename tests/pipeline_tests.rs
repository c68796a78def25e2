//! End-to-end pipeline tests against local disk only
//!
//! The graph and embedder stay unconfigured, and the vector store points at
//! a closed port, so these exercise exactly the degradation paths the
//! orchestrator promises: markdown always lands, the WAL closes when any
//! durable layer succeeds, and the offline queue absorbs the vector layer.

use eva_memory::config::Config;
use eva_memory::orchestrator::Orchestrator;
use eva_memory::queue::{DrainStatus, MAX_FAILURES};
use eva_memory::session::{SessionManager, SyncStartArgs};
use eva_memory::types::{RememberInput, RememberOutcome};
use serde_json::json;

fn input(content: &str) -> RememberInput {
    RememberInput {
        content: json!(content),
        ..Default::default()
    }
}

/// Vector layer configured but unreachable
fn offline_vector_config(root: &std::path::Path, client: &str) -> Config {
    let mut config = Config::for_store(root, client);
    config.chroma_url = Some("http://127.0.0.1:1".to_string());
    config.chroma_collection = Some("eva-test".to_string());
    config
}

#[tokio::test]
async fn remember_lands_in_markdown_and_closes_wal() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(Config::for_store(dir.path(), "t"))
        .await
        .unwrap();

    let outcome = orch
        .remember(input(
            "Decided to use Postgres over MySQL for ACID guarantees",
        ))
        .await
        .unwrap();

    let RememberOutcome::Stored(stored) = outcome else {
        panic!("expected stored outcome");
    };
    assert!(stored.layers.markdown);
    assert!(!stored.layers.graph);
    assert_eq!(stored.memory_type, "decision");

    // WAL closure: markdown succeeded, so the pending list is empty
    assert!(orch.state.wal_pending().is_empty());

    // exactly one block in today's daily log
    let day = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let text = std::fs::read_to_string(orch.config.daily_dir().join(format!("{}.md", day))).unwrap();
    assert_eq!(text.matches("## [DECISION]").count(), 1);
    assert!(text.contains(&format!("- **ID:** `{}`", stored.id)));
}

#[tokio::test]
async fn offline_vector_write_queues_exactly_one_record() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(offline_vector_config(dir.path(), "t"))
        .await
        .unwrap();

    let outcome = orch.remember(input("x")).await.unwrap();
    let RememberOutcome::Stored(stored) = outcome else {
        panic!("expected stored outcome");
    };
    assert!(!stored.layers.vector);
    assert!(stored.layers.queued);

    let raw = std::fs::read_to_string(orch.config.queue_path()).unwrap();
    assert_eq!(raw.lines().count(), 1);

    let record: serde_json::Value = serde_json::from_str(raw.lines().next().unwrap()).unwrap();
    assert_eq!(record["id"], json!(stored.id));
    assert!(record["queuedAt"].is_string());
    assert_eq!(record["metadata"]["importance"], json!("5"));
}

#[tokio::test]
async fn drain_against_offline_vector_counts_failures() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(offline_vector_config(dir.path(), "t"))
        .await
        .unwrap();

    orch.remember(input("x")).await.unwrap();

    let report = orch
        .queue
        .drain(orch.embedder.as_ref(), orch.vector.as_ref(), &orch.state)
        .await
        .unwrap();
    assert_eq!(report.status, DrainStatus::VectorOffline);
    assert_eq!(report.remaining, 1);
    assert_eq!(orch.state.snapshot().queue.consecutive_failures, 1);

    // the record survived untouched
    let raw = std::fs::read_to_string(orch.config.queue_path()).unwrap();
    assert_eq!(raw.lines().count(), 1);
}

#[tokio::test]
async fn backoff_gate_skips_after_max_failures() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(offline_vector_config(dir.path(), "t"))
        .await
        .unwrap();

    orch.remember(input("stuck record")).await.unwrap();
    orch.state
        .mutate(|r| r.queue.consecutive_failures = MAX_FAILURES)
        .unwrap();

    let report = orch
        .queue
        .drain(orch.embedder.as_ref(), orch.vector.as_ref(), &orch.state)
        .await
        .unwrap();
    assert_eq!(report.status, DrainStatus::SkippedMaxFailures);
    assert_eq!(report.processed, 0);
    assert_eq!(report.remaining, 1);
    // the gate itself performs no attempt, so the counter is unchanged
    assert_eq!(
        orch.state.snapshot().queue.consecutive_failures,
        MAX_FAILURES
    );
}

#[tokio::test]
async fn clients_are_isolated_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let orch_a = Orchestrator::bootstrap(offline_vector_config(dir.path(), "alpha"))
        .await
        .unwrap();
    let orch_b = Orchestrator::bootstrap(offline_vector_config(dir.path(), "beta"))
        .await
        .unwrap();

    orch_a.remember(input("memory from alpha")).await.unwrap();
    orch_b.remember(input("memory from beta")).await.unwrap();
    orch_b.remember(input("second from beta")).await.unwrap();

    assert_ne!(orch_a.config.queue_path(), orch_b.config.queue_path());
    let queue_a = std::fs::read_to_string(orch_a.config.queue_path()).unwrap();
    let queue_b = std::fs::read_to_string(orch_b.config.queue_path()).unwrap();
    assert_eq!(queue_a.lines().count(), 1);
    assert_eq!(queue_b.lines().count(), 2);

    assert_eq!(orch_a.state.snapshot().stats.total_memories, 1);
    assert_eq!(orch_b.state.snapshot().stats.total_memories, 2);
}

#[tokio::test]
async fn session_lifecycle_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(Config::for_store(dir.path(), "t"))
        .await
        .unwrap();
    let sessions = SessionManager::new(&orch);

    let start = sessions
        .sync_start(SyncStartArgs {
            session_id: None,
            project: Some("eva".to_string()),
            branch: Some("main".to_string()),
        })
        .await
        .unwrap();
    assert!(!start.session_id.is_empty());
    assert_eq!(start.queue_drain.status, DrainStatus::Empty);

    // a memory written mid-session carries the session back-link
    orch.remember(input("written during the session"))
        .await
        .unwrap();
    let wal_empty = orch.state.wal_pending().is_empty();
    assert!(wal_empty);

    let end = sessions.sync_end(Some("done for today")).await.unwrap();
    assert!(end.ended);
    assert_eq!(end.session_id, Some(start.session_id));
    assert!(orch.state.session_id().is_none());

    let notes = std::fs::read_to_string(orch.config.session_notes_path()).unwrap();
    assert!(notes.contains("No active session"));
}

#[tokio::test]
async fn pre_compaction_flush_snapshots_and_replays() {
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(Config::for_store(dir.path(), "t"))
        .await
        .unwrap();
    let sessions = SessionManager::new(&orch);
    sessions.sync_start(SyncStartArgs::default()).await.unwrap();

    let flush = sessions.pre_compaction_flush().await.unwrap();
    assert!(flush.files_backed >= 1);
    assert_eq!(flush.wal_flushed, 0);
    assert!(std::path::Path::new(&flush.backup_dir).is_dir());
}

#[tokio::test]
async fn skip_outcome_is_never_produced_offline() {
    // with no dedup surface available the ladder must allow everything,
    // even byte-identical content
    let dir = tempfile::tempdir().unwrap();
    let orch = Orchestrator::bootstrap(Config::for_store(dir.path(), "t"))
        .await
        .unwrap();

    for _ in 0..3 {
        let outcome = orch
            .remember(input("The API key is in vault at path secrets/api"))
            .await
            .unwrap();
        assert!(matches!(outcome, RememberOutcome::Stored(_)));
    }
    assert_eq!(orch.state.snapshot().stats.total_memories, 3);
}
