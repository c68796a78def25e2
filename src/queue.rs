//! Durable pending-embeddings queue
//!
//! An append-only newline-delimited JSON log of memories still waiting for a
//! vector-layer write. `remember` appends when the semantic layer is down or
//! unconfigured; `drain` replays the log against the vector store. The log
//! rewrite is the single commit point: a crash mid-drain re-processes at
//! worst, never loses a record.

use std::collections::HashMap;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::Result;
use crate::state::StateStore;
use crate::vector::VectorStore;

/// Drain stops trying after this many consecutive offline rounds
pub const MAX_FAILURES: u32 = 10;

/// One queued embedding job
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingEmbedding {
    pub id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    pub queued_at: DateTime<Utc>,
}

/// Drain outcome status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DrainStatus {
    Empty,
    SkippedMaxFailures,
    VectorOffline,
    Ok,
}

/// Result of one drain round
#[derive(Debug, Clone, Serialize)]
pub struct DrainReport {
    pub processed: usize,
    pub remaining: usize,
    pub status: DrainStatus,
}

/// Handle over the per-client pending-embeddings log
#[derive(Debug, Clone)]
pub struct PendingQueue {
    path: PathBuf,
}

impl PendingQueue {
    pub fn new(config: &Config) -> Self {
        Self {
            path: config.queue_path(),
        }
    }

    /// Append one record. This is the only writer besides the drain rewrite.
    pub fn append(&self, entry: &PendingEmbedding) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let mut line = serde_json::to_string(entry)?;
        line.push('\n');
        file.write_all(line.as_bytes())?;
        Ok(())
    }

    /// Parse all records in file order. Malformed lines are dropped.
    pub fn read(&self) -> Vec<PendingEmbedding> {
        let text = match std::fs::read_to_string(&self.path) {
            Ok(text) => text,
            Err(_) => return Vec::new(),
        };
        text.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| match serde_json::from_str(line) {
                Ok(entry) => Some(entry),
                Err(e) => {
                    warn!(error = %e, "dropping malformed queue record");
                    None
                }
            })
            .collect()
    }

    /// Number of parseable records currently queued.
    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        !self.path.exists() || self.len() == 0
    }

    /// Replace the log with exactly `entries`, via temp file and rename.
    pub fn rewrite(&self, entries: &[PendingEmbedding]) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("jsonl.tmp");
        let mut buf = String::new();
        for entry in entries {
            buf.push_str(&serde_json::to_string(entry)?);
            buf.push('\n');
        }
        std::fs::write(&tmp, buf)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// Drain the queue into the vector store.
    ///
    /// State machine: empty log short-circuits; the backoff gate refuses to
    /// touch the network after [`MAX_FAILURES`] consecutive offline rounds; a
    /// failed heartbeat counts as one offline round. Records whose embedding
    /// or upsert fails stay queued in file order.
    pub async fn drain(
        &self,
        embedder: Option<&EmbeddingClient>,
        vector: Option<&VectorStore>,
        state: &StateStore,
    ) -> Result<DrainReport> {
        let records = self.read();
        if records.is_empty() {
            return Ok(DrainReport {
                processed: 0,
                remaining: 0,
                status: DrainStatus::Empty,
            });
        }

        let failures = state.snapshot().queue.consecutive_failures;
        if failures >= MAX_FAILURES {
            return Ok(DrainReport {
                processed: 0,
                remaining: records.len(),
                status: DrainStatus::SkippedMaxFailures,
            });
        }

        let store = match vector {
            Some(store) if store.heartbeat().await => store,
            _ => {
                state.mutate(|r| {
                    r.queue.consecutive_failures += 1;
                    r.queue.last_drain_attempt = Some(Utc::now());
                })?;
                return Ok(DrainReport {
                    processed: 0,
                    remaining: records.len(),
                    status: DrainStatus::VectorOffline,
                });
            }
        };

        let mut processed = 0usize;
        let mut remaining: Vec<PendingEmbedding> = Vec::new();

        for record in records {
            let embedding = match embedder {
                Some(embedder) => embedder.embed(&record.content).await,
                None => None,
            };
            let Some(embedding) = embedding else {
                remaining.push(record);
                continue;
            };

            match store
                .upsert(&record.id, &embedding, &record.content, &record.metadata)
                .await
            {
                Ok(()) => {
                    debug!(id = %record.id, "drained queued embedding");
                    processed += 1;
                }
                Err(e) => {
                    warn!(id = %record.id, error = %e, "queued upsert failed, keeping record");
                    remaining.push(record);
                }
            }
        }

        self.rewrite(&remaining)?;
        let remaining_count = remaining.len();
        state.mutate(|r| {
            let now = Utc::now();
            r.queue.consecutive_failures = 0;
            r.queue.last_drain_attempt = Some(now);
            r.queue.last_success = Some(now);
            r.queue.pending_count = remaining_count;
        })?;

        Ok(DrainReport {
            processed,
            remaining: remaining_count,
            status: DrainStatus::Ok,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(id: &str) -> PendingEmbedding {
        PendingEmbedding {
            id: id.to_string(),
            content: format!("content for {}", id),
            metadata: HashMap::from([("type".to_string(), "note".to_string())]),
            queued_at: Utc::now(),
        }
    }

    #[test]
    fn append_then_read_preserves_order() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);

        queue.append(&entry("a")).unwrap();
        queue.append(&entry("b")).unwrap();
        queue.append(&entry("c")).unwrap();

        let records = queue.read();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["a", "b", "c"]);
    }

    #[test]
    fn malformed_lines_are_dropped() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);

        queue.append(&entry("good")).unwrap();
        let mut raw = std::fs::read_to_string(config.queue_path()).unwrap();
        raw.push_str("{this is not json\n");
        std::fs::write(config.queue_path(), raw).unwrap();
        queue.append(&entry("also-good")).unwrap();

        let records = queue.read();
        let ids: Vec<&str> = records.iter().map(|r| r.id.as_str()).collect();
        assert_eq!(ids, vec!["good", "also-good"]);
    }

    #[test]
    fn rewrite_replaces_contents() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);

        queue.append(&entry("a")).unwrap();
        queue.append(&entry("b")).unwrap();
        queue.rewrite(&[entry("b")]).unwrap();

        let records = queue.read();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].id, "b");
    }

    #[test]
    fn queue_record_uses_wire_keys() {
        let line = serde_json::to_string(&entry("w")).unwrap();
        let json: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(json["queuedAt"].is_string());
        assert!(json["metadata"]["type"].is_string());
    }

    #[tokio::test]
    async fn drain_empty_short_circuits() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);
        let state = StateStore::open(&config);

        let report = queue.drain(None, None, &state).await.unwrap();
        assert_eq!(report.status, DrainStatus::Empty);
        assert_eq!(report.processed, 0);
        assert_eq!(report.remaining, 0);
    }

    #[tokio::test]
    async fn drain_backoff_gate_skips_without_network() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);
        let state = StateStore::open(&config);

        queue.append(&entry("stuck")).unwrap();
        state
            .mutate(|r| r.queue.consecutive_failures = MAX_FAILURES)
            .unwrap();

        let report = queue.drain(None, None, &state).await.unwrap();
        assert_eq!(report.status, DrainStatus::SkippedMaxFailures);
        assert_eq!(report.remaining, 1);
        // gate does not itself bump the counter
        assert_eq!(state.snapshot().queue.consecutive_failures, MAX_FAILURES);
    }

    #[tokio::test]
    async fn drain_offline_increments_failures() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let queue = PendingQueue::new(&config);
        let state = StateStore::open(&config);

        queue.append(&entry("waiting")).unwrap();

        let report = queue.drain(None, None, &state).await.unwrap();
        assert_eq!(report.status, DrainStatus::VectorOffline);
        assert_eq!(report.remaining, 1);

        let snapshot = state.snapshot();
        assert_eq!(snapshot.queue.consecutive_failures, 1);
        assert!(snapshot.queue.last_drain_attempt.is_some());
        // the record is untouched on disk
        assert_eq!(queue.len(), 1);
    }

    #[test]
    fn drain_status_wire_names() {
        assert_eq!(
            serde_json::to_string(&DrainStatus::SkippedMaxFailures).unwrap(),
            "\"skipped-max-failures\""
        );
        assert_eq!(
            serde_json::to_string(&DrainStatus::VectorOffline).unwrap(),
            "\"vector-offline\""
        );
        assert_eq!(serde_json::to_string(&DrainStatus::Ok).unwrap(), "\"ok\"");
    }
}
