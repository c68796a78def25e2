//! Merged search across the graph and vector layers
//!
//! Graph results are active-filtered at the source; vector hits are
//! post-filtered through the graph because the vector layer has no notion
//! of forgetting or expiry. Auto-recall is deliberately graph-only: it sits
//! on the per-turn hot path and must not wait on the embedder.

use std::collections::HashSet;

use serde::Serialize;
use tracing::warn;

use crate::embedding::EmbeddingClient;
use crate::graph::{GraphStore, MemoryRow};
use crate::types::{HitSource, SearchHit, SearchResponse, SourceCounts};
use crate::vector::{similarity_from_distance, VectorStore, MIN_VECTOR_SCORE};

/// Auto-recall payload: important context plus all standing instructions
#[derive(Debug, Clone, Serialize)]
pub struct AutoRecallResponse {
    pub memories: Vec<MemoryRow>,
    pub instructions: Vec<MemoryRow>,
}

/// Read-side facade over whichever layers are up
pub struct SearchMerger<'a> {
    pub graph: Option<&'a GraphStore>,
    pub vector: Option<&'a VectorStore>,
    pub embedder: Option<&'a EmbeddingClient>,
}

impl SearchMerger<'_> {
    /// Run graph fulltext, graph entity, and vector queries; merge by id
    /// preserving first-seen source; sort by score descending.
    pub async fn search(
        &self,
        query: &str,
        limit: i64,
        project: Option<&str>,
        memory_type: Option<&str>,
    ) -> SearchResponse {
        let mut merged: Vec<SearchHit> = Vec::new();
        let mut seen: HashSet<String> = HashSet::new();

        if let Some(graph) = self.graph {
            match graph.fulltext_memory(query, project, memory_type, limit).await {
                Ok(hits) => {
                    for hit in hits {
                        if seen.insert(hit.id.clone()) {
                            merged.push(hit);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "graph fulltext search failed"),
            }
            match graph.fulltext_entity(query, project, memory_type, limit).await {
                Ok(hits) => {
                    for hit in hits {
                        if seen.insert(hit.id.clone()) {
                            merged.push(hit);
                        }
                    }
                }
                Err(e) => warn!(error = %e, "graph entity search failed"),
            }
        }

        for hit in self.vector_hits(query, limit).await {
            if seen.insert(hit.id.clone()) {
                merged.push(hit);
            }
        }

        merged.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        merged.truncate(limit.max(0) as usize);

        let sources = SourceCounts {
            graph: merged
                .iter()
                .filter(|h| h.source != HitSource::Vector)
                .count(),
            vector: merged
                .iter()
                .filter(|h| h.source == HitSource::Vector)
                .count(),
        };
        SearchResponse {
            count: merged.len(),
            results: merged,
            sources,
        }
    }

    /// Graph-only recall for per-turn context injection. Two graph queries,
    /// no vector calls.
    pub async fn auto_recall(
        &self,
        project: Option<&str>,
        min_importance: i64,
        limit: i64,
    ) -> AutoRecallResponse {
        let Some(graph) = self.graph else {
            return AutoRecallResponse {
                memories: Vec::new(),
                instructions: Vec::new(),
            };
        };

        let memories = graph
            .auto_recall(project, min_importance, limit)
            .await
            .unwrap_or_else(|e| {
                warn!(error = %e, "auto-recall query failed");
                Vec::new()
            });
        let instructions = graph.get_instructions(project).await.unwrap_or_else(|e| {
            warn!(error = %e, "instructions query failed");
            Vec::new()
        });

        AutoRecallResponse {
            memories,
            instructions,
        }
    }

    /// Semantic hits mapped to scores and post-filtered by graph activeness.
    async fn vector_hits(&self, query: &str, limit: i64) -> Vec<SearchHit> {
        let (Some(vector), Some(embedder)) = (self.vector, self.embedder) else {
            return Vec::new();
        };
        let Some(embedding) = embedder.embed(query).await else {
            return Vec::new();
        };

        let raw = match vector.query(&embedding, limit.max(0) as usize, None).await {
            Ok(hits) => hits,
            Err(e) => {
                warn!(error = %e, "vector query failed");
                return Vec::new();
            }
        };

        let scored: Vec<SearchHit> = raw
            .into_iter()
            .filter_map(|hit| {
                let score = similarity_from_distance(hit.distance);
                if score < MIN_VECTOR_SCORE {
                    return None;
                }
                let meta_str = |key: &str| {
                    hit.metadata
                        .get(key)
                        .and_then(|v| v.as_str())
                        .map(str::to_string)
                };
                Some(SearchHit {
                    id: hit.id,
                    content: hit.document,
                    summary: meta_str("summary"),
                    memory_type: meta_str("type").unwrap_or_else(|| "info".to_string()),
                    importance: meta_str("importance")
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(0),
                    confidence: 0.0,
                    project: meta_str("project"),
                    created: meta_str("created").unwrap_or_default(),
                    score,
                    source: HitSource::Vector,
                })
            })
            .collect();

        if scored.is_empty() {
            return scored;
        }

        // the graph owns forgetting; drop vector hits it no longer vouches
        // for (fails open when the graph is down)
        let ids: Vec<String> = scored.iter().map(|h| h.id.clone()).collect();
        let active: HashSet<String> = match self.graph {
            Some(graph) => graph.filter_active(&ids).await.into_iter().collect(),
            None => ids.iter().cloned().collect(),
        };
        scored
            .into_iter()
            .filter(|h| active.contains(&h.id))
            .collect()
    }
}
