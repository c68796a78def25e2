//! Session lifecycle: sync-start, sync-end, pre-compaction flush
//!
//! sync-start is also the recovery point: it replays the WAL left by any
//! crashed writer and gives the pending-embeddings queue a drain attempt
//! before reporting the store overview.

use chrono::Utc;
use serde::Serialize;
use tracing::warn;
use uuid::Uuid;

use crate::error::Result;
use crate::orchestrator::Orchestrator;
use crate::queue::DrainReport;
use crate::state::SessionRecord;
use crate::types::EntitySummary;

/// Session notes reset to this template at sync-end
const SESSION_NOTES_TEMPLATE: &str = "# Session State\n\n_No active session._\n";

/// Arguments for sync-start
#[derive(Debug, Clone, Default, serde::Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartArgs {
    pub session_id: Option<String>,
    pub project: Option<String>,
    pub branch: Option<String>,
}

/// Store overview reported at sync-start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Overview {
    pub total_memories: i64,
    pub top_entities: Vec<EntitySummary>,
    pub projects: Vec<String>,
    pub queue_pending: usize,
}

/// Outcome of sync-start
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStartOutcome {
    pub session_id: String,
    pub wal_recovered: usize,
    pub queue_drain: DrainReport,
    pub overview: Overview,
}

/// Outcome of sync-end
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncEndOutcome {
    pub ended: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Outcome of pre-compaction-flush
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushOutcome {
    pub backup_dir: String,
    pub files_backed: usize,
    pub wal_flushed: usize,
}

/// Session lifecycle driver over the orchestrator's layers
pub struct SessionManager<'a> {
    orch: &'a Orchestrator,
}

impl<'a> SessionManager<'a> {
    pub fn new(orch: &'a Orchestrator) -> Self {
        Self { orch }
    }

    /// Begin (or adopt) a session: record it, recover the WAL, drain the
    /// queue, link the session node, and report the store overview.
    pub async fn sync_start(&self, args: SyncStartArgs) -> Result<SyncStartOutcome> {
        let session_id = args
            .session_id
            .filter(|s| !s.trim().is_empty())
            .unwrap_or_else(|| Uuid::new_v4().to_string());
        let started_at = Utc::now();

        self.orch.state.set_session(SessionRecord {
            id: Some(session_id.clone()),
            started_at: Some(started_at),
            project: args.project.clone(),
            branch: args.branch.clone(),
        })?;

        let wal_recovered = self.orch.replay_wal().await;

        let queue_drain = self
            .orch
            .queue
            .drain(
                self.orch.embedder.as_ref(),
                self.orch.vector.as_ref(),
                &self.orch.state,
            )
            .await?;

        if let Some(graph) = &self.orch.graph {
            if let Err(e) = graph
                .link_session(
                    &session_id,
                    &started_at,
                    args.project.as_deref(),
                    args.branch.as_deref(),
                )
                .await
            {
                warn!(error = %e, "failed to link session in graph");
            }
        }

        let overview = self.overview().await;

        Ok(SyncStartOutcome {
            session_id,
            wal_recovered,
            queue_drain,
            overview,
        })
    }

    /// Close the session node, clear the session record, and reset the
    /// session notes file to its template.
    pub async fn sync_end(&self, summary: Option<&str>) -> Result<SyncEndOutcome> {
        let session_id = self.orch.state.session_id();

        if let (Some(id), Some(graph)) = (session_id.as_deref(), &self.orch.graph) {
            if let Err(e) = graph.close_session(id, &Utc::now(), summary).await {
                warn!(error = %e, "failed to close session in graph");
            }
        }

        self.orch.state.clear_session()?;
        std::fs::write(self.orch.config.session_notes_path(), SESSION_NOTES_TEMPLATE)?;

        Ok(SyncEndOutcome {
            ended: true,
            session_id,
        })
    }

    /// Snapshot state files into a timestamped backup directory, then flush
    /// the WAL exactly as sync-start would. Called right before the caller
    /// compacts away its context.
    pub async fn pre_compaction_flush(&self) -> Result<FlushOutcome> {
        let stamp = Utc::now().format("%Y%m%d-%H%M%S").to_string();
        let backup_dir = self.orch.config.backups_dir().join(&stamp);
        std::fs::create_dir_all(&backup_dir)?;

        let candidates = [
            self.orch.config.state_path(),
            self.orch.config.queue_path(),
            self.orch.config.session_notes_path(),
        ];
        let mut files_backed = 0;
        for path in &candidates {
            if path.exists() {
                if let Some(name) = path.file_name() {
                    std::fs::copy(path, backup_dir.join(name))?;
                    files_backed += 1;
                }
            }
        }

        let wal_flushed = self.orch.replay_wal().await;

        Ok(FlushOutcome {
            backup_dir: backup_dir.display().to_string(),
            files_backed,
            wal_flushed,
        })
    }

    /// Store overview: active count, top entities, projects, queue depth.
    /// Graph-derived parts degrade to empty when the graph is down.
    async fn overview(&self) -> Overview {
        let (total_memories, top_entities, projects) = match &self.orch.graph {
            Some(graph) => {
                let total = graph.count_active().await.unwrap_or(0);
                let entities = graph.list_entities(10).await.unwrap_or_default();
                let projects = graph.project_names().await.unwrap_or_default();
                (total, entities, projects)
            }
            None => (0, Vec::new(), Vec::new()),
        };

        Overview {
            total_memories,
            top_entities,
            projects,
            queue_pending: self.orch.state.snapshot().queue.pending_count,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::queue::DrainStatus;

    async fn offline_orchestrator(dir: &std::path::Path) -> Orchestrator {
        Orchestrator::bootstrap(Config::for_store(dir, "test"))
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn sync_start_assigns_session_and_reports() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;
        let sessions = SessionManager::new(&orch);

        let outcome = sessions.sync_start(SyncStartArgs::default()).await.unwrap();
        assert!(!outcome.session_id.is_empty());
        assert_eq!(outcome.wal_recovered, 0);
        assert_eq!(outcome.queue_drain.status, DrainStatus::Empty);
        assert_eq!(orch.state.session_id(), Some(outcome.session_id.clone()));
    }

    #[tokio::test]
    async fn sync_start_adopts_caller_session_id() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;
        let sessions = SessionManager::new(&orch);

        let outcome = sessions
            .sync_start(SyncStartArgs {
                session_id: Some("external-42".to_string()),
                project: Some("eva".to_string()),
                branch: Some("main".to_string()),
            })
            .await
            .unwrap();
        assert_eq!(outcome.session_id, "external-42");

        let record = orch.state.snapshot().session;
        assert_eq!(record.project.as_deref(), Some("eva"));
        assert_eq!(record.branch.as_deref(), Some("main"));
    }

    #[tokio::test]
    async fn sync_start_recovers_wal() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        // leave a crashed write in the WAL
        let memory = crate::types::Memory {
            id: "crashed-1".to_string(),
            content: "left behind by a crash".to_string(),
            summary: "left behind by a crash".to_string(),
            memory_type: "note".to_string(),
            importance: 5,
            confidence: 0.8,
            decay_days: None,
            project: None,
            tags: vec![],
            entities: vec![],
            created: Utc::now(),
            updated: Utc::now(),
            session_id: None,
            source: None,
            source_channel: None,
            source_message_id: None,
            supersedes: None,
        };
        orch.state.wal_append(&memory).unwrap();

        let sessions = SessionManager::new(&orch);
        let outcome = sessions.sync_start(SyncStartArgs::default()).await.unwrap();
        assert_eq!(outcome.wal_recovered, 1);
        assert!(orch.state.wal_pending().is_empty());
    }

    #[tokio::test]
    async fn sync_end_clears_session_and_resets_notes() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;
        let sessions = SessionManager::new(&orch);

        sessions
            .sync_start(SyncStartArgs {
                session_id: Some("s1".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        let outcome = sessions.sync_end(Some("wrapped up")).await.unwrap();
        assert!(outcome.ended);
        assert_eq!(outcome.session_id.as_deref(), Some("s1"));
        assert!(orch.state.session_id().is_none());

        let notes = std::fs::read_to_string(orch.config.session_notes_path()).unwrap();
        assert_eq!(notes, SESSION_NOTES_TEMPLATE);
    }

    #[tokio::test]
    async fn flush_backs_up_state_files() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;
        let sessions = SessionManager::new(&orch);

        sessions.sync_start(SyncStartArgs::default()).await.unwrap();

        let outcome = sessions.pre_compaction_flush().await.unwrap();
        assert!(outcome.files_backed >= 1);
        let backed: Vec<_> = std::fs::read_dir(&outcome.backup_dir)
            .unwrap()
            .filter_map(|e| e.ok())
            .map(|e| e.file_name().to_string_lossy().into_owned())
            .collect();
        assert!(backed.iter().any(|name| name.starts_with("state-")));
    }
}
