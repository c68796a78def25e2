//! Write pipeline and memory lifecycle
//!
//! `remember` is the heart of the system: normalize, dedup, WAL append,
//! fan-out to markdown + graph + vector, enqueue what the vector layer
//! missed, then flush the WAL once at least one durable layer holds the
//! record. A crash anywhere between append and flush is recovered by WAL
//! replay at the next sync-start.
//!
//! Layer failures never abort each other; the outcome reports exactly which
//! layers took the write.

use chrono::Utc;
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::config::Config;
use crate::embedding::EmbeddingClient;
use crate::error::{MemoryError, Result};
use crate::extract::{classify, extract_entities, summarize, ExtractSource, MAX_ENTITIES};
use crate::graph::{GraphStore, MemoryRow, PageArgs, RecallFilter};
use crate::markdown::MarkdownSink;
use crate::queue::{PendingEmbedding, PendingQueue};
use crate::search::SearchMerger;
use crate::state::StateStore;
use crate::types::{
    clamp_importance, truncate_chars, Layers, Memory, MemoryPatch, RememberInput, RememberOutcome,
    StoredOutcome, DEFAULT_CONFIDENCE, DEFAULT_IMPORTANCE, MAX_SUMMARY_LEN,
};
use crate::vector::{sanitize_metadata, similarity_from_distance, VectorStore};

/// Vector similarity above which a new memory is a duplicate
const VECTOR_SKIP_THRESHOLD: f64 = 0.92;

/// Vector similarity above which a new memory supersedes the old one
const VECTOR_REPLACE_THRESHOLD: f64 = 0.5;

/// Fulltext fallback thresholds; engine-specific raw scores, tunable
const FULLTEXT_SKIP_THRESHOLD: f64 = 8.0;
const FULLTEXT_REPLACE_THRESHOLD: f64 = 4.0;

/// Dedup probe uses only the content head
const DEDUP_PROBE_LEN: usize = 200;

/// Outcome of `forget`
#[derive(Debug, Clone, Serialize)]
pub struct ForgetOutcome {
    pub forgotten: bool,
    pub id: String,
}

/// Outcome of `update`
#[derive(Debug, Clone, Serialize)]
pub struct UpdateOutcome {
    pub updated: bool,
    pub id: String,
    pub vector: bool,
    pub queued: bool,
}

/// Outcome of `maintain`
#[derive(Debug, Clone, Serialize)]
pub struct MaintainOutcome {
    pub pruned: i64,
    /// Reserved for daily-log rollup; currently always 0
    pub compacted: i64,
}

#[derive(Debug)]
enum DedupDecision {
    Allow,
    Skip { existing_id: String, similarity: f64 },
    Replace { existing_id: String, similarity: f64 },
}

/// The memory orchestrator: owns every layer handle and the per-client state
pub struct Orchestrator {
    pub config: Config,
    pub state: StateStore,
    pub markdown: MarkdownSink,
    pub graph: Option<GraphStore>,
    pub vector: Option<VectorStore>,
    pub embedder: Option<EmbeddingClient>,
    pub queue: PendingQueue,
}

impl Orchestrator {
    /// Wire up all layers. The graph is attempted once here; when it is down
    /// the orchestrator runs degraded and every graph-backed surface reports
    /// accordingly.
    pub async fn bootstrap(config: Config) -> Result<Self> {
        config.ensure_dirs()?;
        let state = StateStore::open(&config);
        let markdown = MarkdownSink::new(&config);
        let queue = PendingQueue::new(&config);

        let graph = if config.neo4j_uri.is_some() && config.neo4j_pass.is_some() {
            match GraphStore::connect(&config).await {
                Ok(graph) => Some(graph),
                Err(e) => {
                    warn!(error = %e, "graph unavailable, running degraded");
                    None
                }
            }
        } else {
            None
        };
        let vector = VectorStore::from_config(&config);
        let embedder = EmbeddingClient::from_config(&config);

        Ok(Self {
            config,
            state,
            markdown,
            graph,
            vector,
            embedder,
            queue,
        })
    }

    /// Read-side facade over the currently available layers.
    pub fn searcher(&self) -> SearchMerger<'_> {
        SearchMerger {
            graph: self.graph.as_ref(),
            vector: self.vector.as_ref(),
            embedder: self.embedder.as_ref(),
        }
    }

    /// Store a memory across all layers. See module docs for the protocol.
    pub async fn remember(&self, input: RememberInput) -> Result<RememberOutcome> {
        let mut memory = self.normalize(input)?;

        match self.detect_duplicate(&memory.content, &memory.memory_type).await {
            DedupDecision::Skip {
                existing_id,
                similarity,
            } => {
                debug!(existing = %existing_id, similarity, "duplicate detected, skipping");
                return Ok(RememberOutcome::Skipped {
                    skipped: true,
                    existing_id,
                    similarity,
                });
            }
            DedupDecision::Replace {
                existing_id,
                similarity,
            } => {
                debug!(existing = %existing_id, similarity, "near-duplicate, superseding");
                memory.supersedes = Some(existing_id);
            }
            DedupDecision::Allow => {}
        }

        // WAL before any store write: a crash from here on replays
        self.state.wal_append(&memory)?;

        let markdown_ok = match self.markdown.append(&memory) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "markdown append failed");
                false
            }
        };

        let graph_ok = match &self.graph {
            Some(graph) => match graph.upsert_memory(&memory).await {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "graph upsert failed");
                    false
                }
            },
            None => false,
        };

        let vector_ok = match &self.vector {
            Some(vector) => match &self.embedder {
                Some(embedder) => match embedder.embed(&memory.content).await {
                    Some(embedding) => {
                        let metadata = vector_metadata(&memory);
                        match vector
                            .upsert(&memory.id, &embedding, &memory.content, &metadata)
                            .await
                        {
                            Ok(()) => true,
                            Err(e) => {
                                warn!(error = %e, "vector upsert failed");
                                false
                            }
                        }
                    }
                    None => false,
                },
                None => false,
            },
            None => false,
        };

        let wants_vector = self.vector.is_some() || self.embedder.is_some();
        let queued = if !vector_ok && wants_vector {
            match self.enqueue(&memory) {
                Ok(()) => true,
                Err(e) => {
                    warn!(error = %e, "failed to enqueue pending embedding");
                    false
                }
            }
        } else {
            false
        };

        if markdown_ok || graph_ok {
            self.state.wal_remove(&memory.id)?;
        } else {
            warn!(id = %memory.id, "no durable layer took the write, leaving WAL entry");
        }

        self.state.mutate(|r| {
            r.stats.total_memories += 1;
            r.stats.last_memory_at = Some(Utc::now());
        })?;

        Ok(RememberOutcome::Stored(Box::new(StoredOutcome {
            id: memory.id.clone(),
            memory_type: memory.memory_type.clone(),
            importance: memory.importance,
            confidence: memory.confidence,
            decay_days: memory.decay_days,
            supersedes: memory.supersedes.clone(),
            entities: memory.entities.iter().take(5).cloned().collect(),
            layers: Layers {
                markdown: markdown_ok,
                graph: graph_ok,
                vector: vector_ok,
                queued,
            },
        })))
    }

    /// Replay every WAL entry against markdown + graph. An entry leaves the
    /// WAL once at least one durable layer holds it. Returns the number
    /// recovered.
    pub async fn replay_wal(&self) -> usize {
        let pending = self.state.wal_pending();
        let mut recovered = 0;

        for memory in pending {
            let markdown_ok = self.markdown.append(&memory).is_ok();
            let graph_ok = match &self.graph {
                Some(graph) => graph.upsert_memory(&memory).await.is_ok(),
                None => false,
            };
            if markdown_ok || graph_ok {
                if self.state.wal_remove(&memory.id).is_ok() {
                    recovered += 1;
                }
            } else {
                warn!(id = %memory.id, "WAL replay failed, keeping entry");
            }
        }
        recovered
    }

    /// Soft-delete by id, or by query (top fulltext match wins).
    pub async fn forget(
        &self,
        id: Option<&str>,
        search: Option<&str>,
        reason: Option<&str>,
    ) -> Result<ForgetOutcome> {
        let graph = self.require_graph()?;

        let target = match (id, search) {
            (Some(id), _) => id.to_string(),
            (None, Some(q)) => {
                let hits = graph.fulltext_memory(q, None, None, 1).await?;
                hits.first()
                    .map(|h| h.id.clone())
                    .ok_or_else(|| MemoryError::NotFound(format!("no match for '{}'", q)))?
            }
            (None, None) => {
                return Err(MemoryError::InvalidInput(
                    "forget requires id or query".into(),
                ))
            }
        };

        if !graph.forget(&target, reason).await? {
            return Err(MemoryError::NotFound(target));
        }

        if let Some(vector) = &self.vector {
            if let Err(e) = vector.delete(&target).await {
                warn!(error = %e, "vector delete failed (graph remains authoritative)");
            }
        }

        Ok(ForgetOutcome {
            forgotten: true,
            id: target,
        })
    }

    /// Update an existing memory's content or metadata, re-extracting
    /// entities and re-embedding when the content changed.
    pub async fn update(&self, id: &str, patch: MemoryPatch) -> Result<UpdateOutcome> {
        if patch.is_empty() {
            return Err(MemoryError::InvalidInput("nothing to update".into()));
        }
        let graph = self.require_graph()?;

        let new_entities = patch.content.as_deref().map(|content| {
            extract_entities(&ExtractSource::Plain(content.to_string()))
        });

        let found = graph
            .update_memory(id, &patch, new_entities.as_deref())
            .await?;
        if !found {
            return Err(MemoryError::NotFound(id.to_string()));
        }

        let rows = graph
            .recent_by_filter(&RecallFilter {
                id: Some(id.to_string()),
                limit: 1,
                ..Default::default()
            })
            .await?;
        let row = rows.into_iter().next();

        let mut vector_ok = false;
        let mut queued = false;
        if let Some(content) = patch.content.as_deref() {
            let updated = self.memory_from_update(id, content, &patch, row.as_ref());

            if self.vector.is_some() || self.embedder.is_some() {
                vector_ok = self.upsert_vector(&updated).await;
                if !vector_ok {
                    queued = self.enqueue(&updated).is_ok();
                }
            }

            // audit trail: updates land in the daily log as synthetic blocks
            let mut audit = updated;
            audit.tags = vec!["updated".to_string()];
            if let Err(e) = self.markdown.append(&audit) {
                warn!(error = %e, "markdown audit entry failed");
            }
        } else if let Some(row) = row.as_ref() {
            // metadata-only change still refreshes vector metadata
            if let Some(vector) = &self.vector {
                let metadata = sanitize_metadata(vec![
                    ("type", Some(row.memory_type.clone())),
                    ("importance", Some(row.importance.to_string())),
                    ("project", row.project.clone()),
                    ("created", Some(row.created.clone())),
                    ("summary", row.summary.clone()),
                ]);
                if let Err(e) = vector.update_metadata(id, &metadata).await {
                    warn!(error = %e, "vector metadata update failed");
                }
            }
        }

        Ok(UpdateOutcome {
            updated: true,
            id: id.to_string(),
            vector: vector_ok,
            queued,
        })
    }

    /// Retrieve by id or filter. Errors when the graph is down: recall can
    /// make no partial progress without it.
    pub async fn recall(&self, filter: RecallFilter) -> Result<Vec<MemoryRow>> {
        let graph = self.require_graph()?;
        let rows = graph.recent_by_filter(&filter).await?;
        self.state.mutate(|r| r.stats.total_recalls += 1)?;
        Ok(rows)
    }

    /// Merged search, counting the lookup in stats.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        project: Option<&str>,
        memory_type: Option<&str>,
    ) -> Result<crate::types::SearchResponse> {
        let response = self
            .searcher()
            .search(query, limit, project, memory_type)
            .await;
        self.state.mutate(|r| r.stats.total_searches += 1)?;
        Ok(response)
    }

    /// Group memories by type, optionally narrowed to a topic via fulltext.
    pub async fn summarize(
        &self,
        topic: Option<&str>,
        project: Option<&str>,
        limit: i64,
    ) -> Result<serde_json::Value> {
        let Some(graph) = self.graph.as_ref() else {
            return Ok(serde_json::json!({ "groups": {}, "total": 0 }));
        };

        let rows: Vec<MemoryRow> = match topic {
            Some(topic) => graph
                .fulltext_memory(topic, project, None, limit)
                .await?
                .into_iter()
                .map(|hit| MemoryRow {
                    id: hit.id,
                    content: hit.content,
                    summary: hit.summary,
                    memory_type: hit.memory_type,
                    importance: hit.importance,
                    confidence: hit.confidence,
                    project: hit.project,
                    created: hit.created,
                })
                .collect(),
            None => {
                graph
                    .recent_by_filter(&RecallFilter {
                        project: project.map(str::to_string),
                        limit,
                        ..Default::default()
                    })
                    .await?
            }
        };

        let total = rows.len();
        let mut groups: std::collections::BTreeMap<String, Vec<MemoryRow>> = Default::default();
        for row in rows {
            groups.entry(row.memory_type.clone()).or_default().push(row);
        }

        Ok(serde_json::json!({ "groups": groups, "total": total }))
    }

    /// Paged browse.
    pub async fn list(&self, args: PageArgs) -> Result<serde_json::Value> {
        let graph = self.require_graph()?;
        let page = args.page.max(1);
        let page_size = args.page_size.clamp(1, 200);
        let (items, total) = graph.page(&args).await?;
        Ok(serde_json::json!({
            "items": items,
            "total": total,
            "page": page,
            "pageSize": page_size,
        }))
    }

    /// Prune old low-importance memories.
    pub async fn maintain(&self, max_age_days: i64, min_importance: i64) -> Result<MaintainOutcome> {
        let graph = self.require_graph()?;
        let pruned = graph.prune_old(min_importance, max_age_days).await?;
        Ok(MaintainOutcome {
            pruned,
            compacted: 0,
        })
    }

    fn require_graph(&self) -> Result<&GraphStore> {
        self.graph
            .as_ref()
            .ok_or_else(|| MemoryError::GraphUnavailable("graph store not connected".into()))
    }

    /// Materialize a full memory record from caller input, filling defaults
    /// from the extractor.
    fn normalize(&self, input: RememberInput) -> Result<Memory> {
        let source = ExtractSource::from_value(&input.content);
        let content = source.as_text();
        if content.trim().is_empty() {
            return Err(MemoryError::InvalidInput("content is required".into()));
        }

        let memory_type = match input.memory_type {
            Some(t) if !t.trim().is_empty() => truncate_chars(t.trim(), 20),
            _ => classify(&source),
        };

        let entities = match input.entities {
            Some(given) => {
                let mut seen = std::collections::HashSet::new();
                given
                    .into_iter()
                    .map(|e| e.trim().to_lowercase())
                    .filter(|e| !e.is_empty() && seen.insert(e.clone()))
                    .take(MAX_ENTITIES)
                    .collect()
            }
            None => extract_entities(&source),
        };

        let summary = match input.summary {
            Some(s) if !s.trim().is_empty() => truncate_chars(s.trim(), MAX_SUMMARY_LEN),
            _ => summarize(&content),
        };

        let decay_days = match input.decay_days {
            Some(days) if days > 0 => Some(days),
            Some(days) => {
                warn!(days, "ignoring non-positive decayDays");
                None
            }
            None => None,
        };

        let now = Utc::now();
        Ok(Memory {
            id: Uuid::new_v4().to_string(),
            content,
            summary,
            memory_type,
            importance: clamp_importance(input.importance.unwrap_or(DEFAULT_IMPORTANCE)),
            confidence: input
                .confidence
                .unwrap_or(DEFAULT_CONFIDENCE)
                .clamp(0.0, 1.0),
            decay_days,
            project: input.project.filter(|p| !p.trim().is_empty()),
            tags: input.tags,
            entities,
            created: now,
            updated: now,
            session_id: self.state.session_id(),
            source: input.source,
            source_channel: input.source_channel,
            source_message_id: input.source_message_id,
            supersedes: input.supersedes,
        })
    }

    /// Duplicate-detection ladder: semantic first, fulltext fallback, allow
    /// otherwise. Only memories of the same type are considered.
    async fn detect_duplicate(&self, content: &str, memory_type: &str) -> DedupDecision {
        if let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) {
            if let Some(embedding) = embedder.embed(content).await {
                match vector.query(&embedding, 1, Some(("type", memory_type))).await {
                    Ok(hits) => {
                        if let Some(hit) = hits.first() {
                            let similarity = similarity_from_distance(hit.distance);
                            if similarity > VECTOR_SKIP_THRESHOLD {
                                return DedupDecision::Skip {
                                    existing_id: hit.id.clone(),
                                    similarity,
                                };
                            }
                            if similarity > VECTOR_REPLACE_THRESHOLD {
                                return DedupDecision::Replace {
                                    existing_id: hit.id.clone(),
                                    similarity,
                                };
                            }
                        }
                        return DedupDecision::Allow;
                    }
                    Err(e) => warn!(error = %e, "vector dedup failed, falling back to fulltext"),
                }
            }
        }

        if let Some(graph) = &self.graph {
            let probe = truncate_chars(content, DEDUP_PROBE_LEN);
            match graph
                .fulltext_memory(&probe, None, Some(memory_type), 1)
                .await
            {
                Ok(hits) => {
                    if let Some(hit) = hits.first() {
                        if hit.score > FULLTEXT_SKIP_THRESHOLD {
                            return DedupDecision::Skip {
                                existing_id: hit.id.clone(),
                                similarity: hit.score,
                            };
                        }
                        if hit.score > FULLTEXT_REPLACE_THRESHOLD {
                            return DedupDecision::Replace {
                                existing_id: hit.id.clone(),
                                similarity: hit.score,
                            };
                        }
                    }
                }
                Err(e) => warn!(error = %e, "fulltext dedup failed"),
            }
        }

        DedupDecision::Allow
    }

    async fn upsert_vector(&self, memory: &Memory) -> bool {
        let (Some(vector), Some(embedder)) = (&self.vector, &self.embedder) else {
            return false;
        };
        let Some(embedding) = embedder.embed(&memory.content).await else {
            return false;
        };
        let metadata = vector_metadata(memory);
        vector
            .upsert(&memory.id, &embedding, &memory.content, &metadata)
            .await
            .is_ok()
    }

    fn enqueue(&self, memory: &Memory) -> Result<()> {
        self.queue.append(&PendingEmbedding {
            id: memory.id.clone(),
            content: memory.content.clone(),
            metadata: vector_metadata(memory),
            queued_at: Utc::now(),
        })?;
        let pending = self.queue.len();
        self.state.mutate(|r| r.queue.pending_count = pending)?;
        Ok(())
    }

    /// Assemble the post-update memory view used for re-embedding and the
    /// markdown audit block.
    fn memory_from_update(
        &self,
        id: &str,
        content: &str,
        patch: &MemoryPatch,
        row: Option<&MemoryRow>,
    ) -> Memory {
        let now = Utc::now();
        let created = row
            .and_then(|r| chrono::DateTime::parse_from_rfc3339(&r.created).ok())
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or(now);
        Memory {
            id: id.to_string(),
            content: content.to_string(),
            summary: patch
                .summary
                .clone()
                .or_else(|| row.and_then(|r| r.summary.clone()))
                .unwrap_or_else(|| summarize(content)),
            memory_type: patch
                .memory_type
                .clone()
                .or_else(|| row.map(|r| r.memory_type.clone()))
                .unwrap_or_else(|| "info".to_string()),
            importance: patch
                .importance
                .or_else(|| row.map(|r| r.importance))
                .unwrap_or(DEFAULT_IMPORTANCE),
            confidence: patch
                .confidence
                .or_else(|| row.map(|r| r.confidence))
                .unwrap_or(DEFAULT_CONFIDENCE),
            decay_days: patch.decay_days,
            project: patch
                .project
                .clone()
                .or_else(|| row.and_then(|r| r.project.clone())),
            tags: Vec::new(),
            entities: Vec::new(),
            created,
            updated: now,
            session_id: self.state.session_id(),
            source: None,
            source_channel: None,
            source_message_id: None,
            supersedes: None,
        }
    }
}

/// Flat string metadata stored alongside the embedding.
fn vector_metadata(memory: &Memory) -> std::collections::HashMap<String, String> {
    sanitize_metadata(vec![
        ("type", Some(memory.memory_type.clone())),
        ("importance", Some(memory.importance.to_string())),
        ("project", memory.project.clone()),
        (
            "created",
            Some(memory.created.to_rfc3339_opts(chrono::SecondsFormat::Secs, true)),
        ),
        ("summary", Some(memory.summary.clone())),
    ])
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    async fn offline_orchestrator(dir: &std::path::Path) -> Orchestrator {
        let config = Config::for_store(dir, "test");
        Orchestrator::bootstrap(config).await.unwrap()
    }

    fn input(content: &str) -> RememberInput {
        RememberInput {
            content: json!(content),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn remember_writes_markdown_and_flushes_wal() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let outcome = orch
            .remember(input("Decided to use Postgres over MySQL for ACID guarantees"))
            .await
            .unwrap();

        let RememberOutcome::Stored(stored) = outcome else {
            panic!("expected stored outcome");
        };
        assert!(stored.layers.markdown);
        assert!(!stored.layers.graph);
        assert!(!stored.layers.vector);
        assert!(!stored.layers.queued);
        assert_eq!(stored.memory_type, "decision");
        assert!(stored.entities.contains(&"postgres".to_string()));

        // WAL closure: the id left the pending list
        assert!(orch.state.wal_pending().is_empty());

        let snapshot = orch.state.snapshot();
        assert_eq!(snapshot.stats.total_memories, 1);
        assert!(snapshot.stats.last_memory_at.is_some());
    }

    #[tokio::test]
    async fn remember_rejects_empty_content() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let err = orch.remember(input("   ")).await.unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
        assert!(orch.state.wal_pending().is_empty());
    }

    #[tokio::test]
    async fn normalize_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let memory = orch
            .normalize(input("I learned that borrow checking prevents data races"))
            .unwrap();
        assert_eq!(memory.memory_type, "learning");
        assert_eq!(memory.importance, DEFAULT_IMPORTANCE);
        assert!((memory.confidence - DEFAULT_CONFIDENCE).abs() < f64::EPSILON);
        assert!(memory.summary.starts_with("I learned"));
        assert!(!memory.entities.is_empty());
        assert!(memory.entities.len() <= MAX_ENTITIES);
    }

    #[tokio::test]
    async fn normalize_respects_caller_fields() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let memory = orch
            .normalize(RememberInput {
                content: json!("some text"),
                memory_type: Some("custom-tag".to_string()),
                importance: Some(42),
                entities: Some(vec!["Alpha".to_string(), "alpha".to_string(), "beta".to_string()]),
                summary: Some("given summary".to_string()),
                decay_days: Some(-3),
                ..Default::default()
            })
            .unwrap();

        assert_eq!(memory.memory_type, "custom-tag");
        assert_eq!(memory.importance, 10); // clamped
        assert_eq!(memory.entities, vec!["alpha", "beta"]); // lowercased, deduped
        assert_eq!(memory.summary, "given summary");
        assert_eq!(memory.decay_days, None); // non-positive dropped
    }

    #[tokio::test]
    async fn normalize_structured_content() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let memory = orch
            .normalize(RememberInput {
                content: json!({"type": "decision", "topic": "storage", "what": "postgres"}),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(memory.memory_type, "decision");
        assert_eq!(memory.entities.first().map(String::as_str), Some("storage"));
        assert!(memory.content.contains("postgres"));
    }

    #[tokio::test]
    async fn offline_dedup_allows_everything() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        // no vector, no embedder, no graph: the ladder bottoms out at allow
        let first = orch.remember(input("The API key is in vault")).await.unwrap();
        let second = orch.remember(input("The API key is in vault")).await.unwrap();
        assert!(matches!(first, RememberOutcome::Stored(_)));
        assert!(matches!(second, RememberOutcome::Stored(_)));
    }

    #[tokio::test]
    async fn forget_requires_graph() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let err = orch.forget(Some("some-id"), None, None).await.unwrap_err();
        assert!(matches!(err, MemoryError::GraphUnavailable(_)));
    }

    #[tokio::test]
    async fn update_rejects_empty_patch() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let err = orch
            .update("id", MemoryPatch::default())
            .await
            .unwrap_err();
        assert!(matches!(err, MemoryError::InvalidInput(_)));
    }

    #[tokio::test]
    async fn summarize_without_graph_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        let value = orch.summarize(Some("anything"), None, 50).await.unwrap();
        assert_eq!(value["total"], 0);
    }

    #[tokio::test]
    async fn replay_wal_recovers_into_markdown() {
        let dir = tempfile::tempdir().unwrap();
        let orch = offline_orchestrator(dir.path()).await;

        // simulate a crash: entry in WAL, nothing written
        let memory = orch.normalize(input("crash survivor note")).unwrap();
        orch.state.wal_append(&memory).unwrap();
        assert_eq!(orch.state.wal_pending().len(), 1);

        let recovered = orch.replay_wal().await;
        assert_eq!(recovered, 1);
        assert!(orch.state.wal_pending().is_empty());

        let day = memory.created.format("%Y-%m-%d").to_string();
        let text =
            std::fs::read_to_string(orch.config.daily_dir().join(format!("{}.md", day))).unwrap();
        assert!(text.contains("crash survivor note"));
    }
}
