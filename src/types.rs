//! Core types for Eva Memory

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum length of a memory summary
pub const MAX_SUMMARY_LEN: usize = 200;

/// Default importance when the caller does not supply one
pub const DEFAULT_IMPORTANCE: i64 = 5;

/// Default confidence when the caller does not supply one
pub const DEFAULT_CONFIDENCE: f64 = 0.8;

/// A memory record, the unit of storage across all three layers.
///
/// This is the full form as written: the WAL persists it verbatim, the graph
/// stores its scalar fields as node properties, and the markdown sink renders
/// it as a block. Forgetting happens only in the graph (soft erase), so this
/// struct always carries content.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Memory {
    pub id: String,
    pub content: String,
    pub summary: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: i64,
    pub confidence: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub decay_days: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    #[serde(default)]
    pub entities: Vec<String>,
    pub created: DateTime<Utc>,
    pub updated: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_message_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
}

/// Caller-facing input for `remember`
///
/// `content` stays a raw JSON value: plain text normally, or a structured
/// mapping the extractor knows how to mine topic keys from.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RememberInput {
    #[serde(default)]
    pub content: serde_json::Value,
    #[serde(rename = "type")]
    pub memory_type: Option<String>,
    pub importance: Option<i64>,
    pub project: Option<String>,
    #[serde(default)]
    pub tags: Vec<String>,
    pub summary: Option<String>,
    pub entities: Option<Vec<String>>,
    pub confidence: Option<f64>,
    pub decay_days: Option<i64>,
    pub supersedes: Option<String>,
    pub source: Option<String>,
    pub source_channel: Option<String>,
    pub source_message_id: Option<String>,
}

/// Per-layer outcome of a fan-out write
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Layers {
    pub markdown: bool,
    pub graph: bool,
    pub vector: bool,
    pub queued: bool,
}

/// Outcome of `remember`
#[derive(Debug, Clone, Serialize)]
#[serde(untagged)]
pub enum RememberOutcome {
    /// A near-identical memory already exists; nothing was written
    #[serde(rename_all = "camelCase")]
    Skipped {
        skipped: bool,
        existing_id: String,
        similarity: f64,
    },
    Stored(Box<StoredOutcome>),
}

/// Successful (possibly degraded) write outcome
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredOutcome {
    pub id: String,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: i64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub decay_days: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub supersedes: Option<String>,
    /// First five extracted entities, for caller display
    pub entities: Vec<String>,
    pub layers: Layers,
}

/// Where a search hit came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum HitSource {
    GraphFulltext,
    GraphEntity,
    Vector,
}

/// A single search or recall hit
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchHit {
    pub id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: String,
    pub importance: i64,
    pub confidence: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub project: Option<String>,
    pub created: String,
    pub score: f64,
    pub source: HitSource,
}

/// Count of hits per backing store, reported with search results
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct SourceCounts {
    pub graph: usize,
    pub vector: usize,
}

/// Merged search response
#[derive(Debug, Clone, Serialize)]
pub struct SearchResponse {
    pub results: Vec<SearchHit>,
    pub count: usize,
    pub sources: SourceCounts,
}

/// An entity with its mention count and linked memory types
#[derive(Debug, Clone, Serialize)]
pub struct EntitySummary {
    pub name: String,
    pub mentions: i64,
    pub types: Vec<String>,
}

/// Partial update applied to an existing memory
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryPatch {
    pub content: Option<String>,
    pub summary: Option<String>,
    #[serde(rename = "type")]
    pub memory_type: Option<String>,
    pub importance: Option<i64>,
    pub project: Option<String>,
    pub confidence: Option<f64>,
    pub decay_days: Option<i64>,
}

impl MemoryPatch {
    pub fn is_empty(&self) -> bool {
        self.content.is_none()
            && self.summary.is_none()
            && self.memory_type.is_none()
            && self.importance.is_none()
            && self.project.is_none()
            && self.confidence.is_none()
            && self.decay_days.is_none()
    }
}

/// Truncate a string to `max` characters on a char boundary.
pub fn truncate_chars(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

/// Clamp importance into the valid 1..10 range.
pub fn clamp_importance(importance: i64) -> i64 {
    importance.clamp(1, 10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn remember_input_fills_defaults() {
        let input: RememberInput = serde_json::from_str(r#"{"content":"hello"}"#).unwrap();
        assert_eq!(input.content.as_str(), Some("hello"));
        assert!(input.memory_type.is_none());
        assert!(input.tags.is_empty());
    }

    #[test]
    fn remember_input_accepts_camel_case() {
        let input: RememberInput = serde_json::from_str(
            r#"{"content":"x","decayDays":30,"sourceChannel":"slack","sourceMessageId":"m1"}"#,
        )
        .unwrap();
        assert_eq!(input.decay_days, Some(30));
        assert_eq!(input.source_channel.as_deref(), Some("slack"));
    }

    #[test]
    fn hit_source_serializes_kebab_case() {
        assert_eq!(
            serde_json::to_string(&HitSource::GraphFulltext).unwrap(),
            "\"graph-fulltext\""
        );
        assert_eq!(
            serde_json::to_string(&HitSource::Vector).unwrap(),
            "\"vector\""
        );
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo wörld", 4), "héll");
        assert_eq!(truncate_chars("ab", 10), "ab");
    }

    #[test]
    fn importance_is_clamped() {
        assert_eq!(clamp_importance(0), 1);
        assert_eq!(clamp_importance(99), 10);
        assert_eq!(clamp_importance(7), 7);
    }
}
