//! Durable per-client state record
//!
//! A single JSON file holds the WAL pending list, the active session, queue
//! drain bookkeeping, and usage counters. Inter-process isolation comes from
//! the clientId file suffix; within a process every read-modify-write runs
//! under one mutex. Writes go through a temp file plus rename so a crash
//! never leaves a half-written record.

use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::config::Config;
use crate::error::Result;
use crate::types::Memory;

/// Write-ahead section of the state record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WalState {
    #[serde(default)]
    pub pending: Vec<Memory>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_flush: Option<DateTime<Utc>>,
}

/// The session active for this client, if any
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRecord {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<String>,
}

/// Drain bookkeeping for the pending-embeddings queue
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueueState {
    #[serde(default)]
    pub pending_count: usize,
    #[serde(default)]
    pub consecutive_failures: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_drain_attempt: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<DateTime<Utc>>,
}

/// Usage counters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatsState {
    #[serde(default)]
    pub total_memories: u64,
    #[serde(default)]
    pub total_recalls: u64,
    #[serde(default)]
    pub total_searches: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_memory_at: Option<DateTime<Utc>>,
}

/// Full on-disk state record
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateRecord {
    #[serde(default)]
    pub wal: WalState,
    #[serde(default)]
    pub session: SessionRecord,
    #[serde(default)]
    pub queue: QueueState,
    #[serde(default)]
    pub stats: StatsState,
}

/// Handle over the per-client state file
pub struct StateStore {
    path: PathBuf,
    record: Mutex<StateRecord>,
}

impl StateStore {
    /// Load the state record, falling back to a fresh one when the file is
    /// absent or unreadable. Availability beats strictness here: a corrupt
    /// record must not take the whole write path down.
    pub fn open(config: &Config) -> Self {
        let path = config.state_path();
        let record = match std::fs::read_to_string(&path) {
            Ok(text) => match serde_json::from_str::<StateRecord>(&text) {
                Ok(record) => record,
                Err(e) => {
                    warn!(path = %path.display(), error = %e, "state record corrupt, starting fresh");
                    StateRecord::default()
                }
            },
            Err(_) => StateRecord::default(),
        };

        Self {
            path,
            record: Mutex::new(record),
        }
    }

    /// Read-only snapshot of the whole record.
    pub fn snapshot(&self) -> StateRecord {
        self.record.lock().clone()
    }

    /// Apply a mutation and persist the record.
    pub fn mutate<F>(&self, f: F) -> Result<()>
    where
        F: FnOnce(&mut StateRecord),
    {
        let mut record = self.record.lock();
        f(&mut record);
        self.persist(&record)
    }

    /// Append a memory to the WAL pending list.
    pub fn wal_append(&self, memory: &Memory) -> Result<()> {
        self.mutate(|r| {
            r.wal.pending.retain(|m| m.id != memory.id);
            r.wal.pending.push(memory.clone());
        })
    }

    /// Remove a memory from the WAL pending list and stamp the flush.
    pub fn wal_remove(&self, id: &str) -> Result<()> {
        self.mutate(|r| {
            r.wal.pending.retain(|m| m.id != id);
            r.wal.last_flush = Some(Utc::now());
        })
    }

    /// Current WAL pending list.
    pub fn wal_pending(&self) -> Vec<Memory> {
        self.record.lock().wal.pending.clone()
    }

    /// Overwrite the session record.
    pub fn set_session(&self, session: SessionRecord) -> Result<()> {
        self.mutate(|r| r.session = session)
    }

    /// Clear the session record.
    pub fn clear_session(&self) -> Result<()> {
        self.mutate(|r| r.session = SessionRecord::default())
    }

    /// Session currently active for this client, if any.
    pub fn session_id(&self) -> Option<String> {
        self.record.lock().session.id.clone()
    }

    fn persist(&self, record: &StateRecord) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(record)?;
        std::fs::write(&tmp, text)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn memory(id: &str) -> Memory {
        Memory {
            id: id.to_string(),
            content: "content".to_string(),
            summary: "summary".to_string(),
            memory_type: "note".to_string(),
            importance: 5,
            confidence: 0.8,
            decay_days: None,
            project: None,
            tags: vec![],
            entities: vec![],
            created: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            updated: Utc.with_ymd_and_hms(2026, 8, 1, 0, 0, 0).unwrap(),
            session_id: None,
            source: None,
            source_channel: None,
            source_message_id: None,
            supersedes: None,
        }
    }

    #[test]
    fn wal_append_and_remove_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let state = StateStore::open(&config);

        state.wal_append(&memory("a")).unwrap();
        state.wal_append(&memory("b")).unwrap();
        assert_eq!(state.wal_pending().len(), 2);

        state.wal_remove("a").unwrap();
        let pending = state.wal_pending();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, "b");
        assert!(state.snapshot().wal.last_flush.is_some());
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");

        {
            let state = StateStore::open(&config);
            state.wal_append(&memory("persisted")).unwrap();
            state
                .mutate(|r| {
                    r.stats.total_memories = 3;
                    r.queue.consecutive_failures = 2;
                })
                .unwrap();
        }

        let state = StateStore::open(&config);
        let record = state.snapshot();
        assert_eq!(record.wal.pending.len(), 1);
        assert_eq!(record.wal.pending[0].id, "persisted");
        assert_eq!(record.stats.total_memories, 3);
        assert_eq!(record.queue.consecutive_failures, 2);
    }

    #[test]
    fn corrupt_record_starts_fresh() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        std::fs::write(config.state_path(), "{not json").unwrap();

        let state = StateStore::open(&config);
        assert!(state.wal_pending().is_empty());
    }

    #[test]
    fn record_uses_wire_key_names() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let state = StateStore::open(&config);
        state.wal_append(&memory("w")).unwrap();

        let text = std::fs::read_to_string(config.state_path()).unwrap();
        let json: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert!(json["wal"]["pending"].is_array());
        assert!(json["queue"]["pendingCount"].is_number());
        assert!(json["stats"]["totalMemories"].is_number());
    }

    #[test]
    fn session_set_and_clear() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::for_store(dir.path(), "t");
        let state = StateStore::open(&config);

        state
            .set_session(SessionRecord {
                id: Some("s1".into()),
                started_at: Some(Utc::now()),
                project: Some("eva".into()),
                branch: None,
            })
            .unwrap();
        assert_eq!(state.session_id().as_deref(), Some("s1"));

        state.clear_session().unwrap();
        assert!(state.session_id().is_none());
    }
}
