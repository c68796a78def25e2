//! Entity extraction, type classification, and summarization
//!
//! The extractor is pure: identical input yields identical output. It feeds
//! the write pipeline, so its output shape determines the graph topology.
//!
//! Input may be structured (a JSON mapping with well-known topic keys) or
//! plain text. Priority entities come from recognized keys; generic entities
//! are mined from the text with cheap lexical patterns.

use std::collections::HashSet;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::{truncate_chars, MAX_SUMMARY_LEN};

/// Maximum entities returned for a single memory
pub const MAX_ENTITIES: usize = 15;

/// Maximum length of a classifier type tag taken from structured input
const MAX_TYPE_TAG_LEN: usize = 20;

/// Structured keys whose string value names the topic directly
const TOPIC_KEYS: &[&str] = &[
    "topic", "about", "subject", "name", "title", "category", "area", "domain", "field", "concept",
    "item", "what", "learning", "studying", "project", "goal", "target",
];

/// Structured keys whose list value enumerates topics
const LIST_KEYS: &[&str] = &["topics", "tags", "categories", "items", "subjects", "areas"];

/// Ordered classifier table; first label whose keyword appears wins
const TYPE_KEYWORDS: &[(&str, &[&str])] = &[
    (
        "instruction",
        &[
            "always",
            "never",
            "rule",
            "instruction",
            "standing order",
            "must always",
            "must never",
            "guideline",
            "policy",
        ],
    ),
    (
        "decision",
        &[
            "decided",
            "decision",
            "chose",
            "choice",
            "picked",
            "selected",
            "going with",
            "will use",
            "opted",
        ],
    ),
    (
        "preference",
        &[
            "prefer",
            "preference",
            "favorite",
            "like best",
            "rather",
            "better to",
            "style",
        ],
    ),
    (
        "learning",
        &[
            "learned",
            "learning",
            "studied",
            "studying",
            "understood",
            "realized",
            "discovered",
            "insight",
        ],
    ),
    (
        "task",
        &[
            "todo", "task", "need to", "should", "must", "will do", "plan to", "going to",
            "next step",
        ],
    ),
    (
        "question",
        &[
            "question",
            "wondering",
            "curious",
            "ask about",
            "find out",
            "research",
            "investigate",
        ],
    ),
    (
        "note",
        &[
            "note",
            "noticed",
            "observed",
            "important",
            "remember that",
            "keep in mind",
        ],
    ),
    (
        "progress",
        &[
            "completed",
            "finished",
            "done",
            "progress",
            "achieved",
            "accomplished",
            "milestone",
        ],
    ),
];

/// Function words excluded from entity output
static STOP_WORDS: Lazy<HashSet<&'static str>> = Lazy::new(|| {
    [
        "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any",
        "are", "as", "at", "be", "because", "been", "before", "being", "below", "between", "both",
        "but", "by", "can", "did", "do", "does", "doing", "down", "during", "each", "few", "for",
        "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers", "him",
        "his", "how", "i", "if", "in", "into", "is", "it", "its", "just", "me", "more", "most",
        "my", "no", "nor", "not", "now", "of", "off", "on", "once", "only", "or", "other", "our",
        "out", "over", "own", "same", "she", "so", "some", "such", "than", "that", "the", "their",
        "them", "then", "there", "these", "they", "this", "those", "through", "to", "too",
        "under", "until", "up", "very", "was", "we", "were", "what", "when", "where", "which",
        "while", "who", "why", "will", "with", "you", "your",
    ]
    .into_iter()
    .collect()
});

static HASHTAG_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"#([A-Za-z0-9_]+)").expect("valid regex"));

static QUOTED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#""([^"]{1,80})""#).expect("valid regex"));

/// Capitalized 1-3 word phrases
static CAPITALIZED_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b[A-Z][a-z]+(?: [A-Z][a-z]+){0,2}\b").expect("valid regex"));

static WORD_PATTERN: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z][A-Za-z0-9_-]*").expect("valid regex"));

/// Extraction input: a structured mapping or plain text
#[derive(Debug, Clone)]
pub enum ExtractSource {
    Structured(serde_json::Map<String, Value>),
    Plain(String),
}

impl ExtractSource {
    /// Build from an arbitrary JSON value. Objects are structured; everything
    /// else is flattened to its textual form.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::Object(map) => ExtractSource::Structured(map.clone()),
            Value::String(s) => ExtractSource::Plain(s.clone()),
            Value::Null => ExtractSource::Plain(String::new()),
            other => ExtractSource::Plain(other.to_string()),
        }
    }

    /// The verbatim text stored as memory content.
    pub fn as_text(&self) -> String {
        match self {
            ExtractSource::Plain(s) => s.clone(),
            ExtractSource::Structured(map) => {
                serde_json::to_string(&Value::Object(map.clone())).unwrap_or_default()
            }
        }
    }
}

/// Derive up to [`MAX_ENTITIES`] topic strings from the input.
///
/// Priority entities (structured topic keys) come first, then generic
/// entities mined from the text sorted by (word count, length). All output
/// is lowercased, stop-word filtered, and deduplicated preserving first
/// appearance.
pub fn extract_entities(source: &ExtractSource) -> Vec<String> {
    let mut ordered: Vec<String> = Vec::new();
    let mut seen: HashSet<String> = HashSet::new();

    if let ExtractSource::Structured(map) = source {
        for candidate in priority_entities(map) {
            push_entity(&mut ordered, &mut seen, candidate);
        }
    }

    let text = source.as_text();
    for candidate in generic_entities(&text) {
        if ordered.len() >= MAX_ENTITIES {
            break;
        }
        push_entity(&mut ordered, &mut seen, candidate);
    }

    ordered.truncate(MAX_ENTITIES);
    ordered
}

/// Classify the input into a memory type.
///
/// A structured `type` field wins (first 20 chars). Otherwise the lowercased
/// text is matched against the ordered keyword table; first match wins.
pub fn classify(source: &ExtractSource) -> String {
    if let ExtractSource::Structured(map) = source {
        if let Some(Value::String(tag)) = map.get("type") {
            let tag = tag.trim();
            if !tag.is_empty() {
                return truncate_chars(tag, MAX_TYPE_TAG_LEN);
            }
        }
    }

    let text = source.as_text().to_lowercase();
    for (label, keywords) in TYPE_KEYWORDS {
        if keywords.iter().any(|kw| text.contains(kw)) {
            return (*label).to_string();
        }
    }
    "info".to_string()
}

/// Default summary: the content prefix, capped at 200 chars.
pub fn summarize(content: &str) -> String {
    truncate_chars(content, MAX_SUMMARY_LEN)
}

fn push_entity(ordered: &mut Vec<String>, seen: &mut HashSet<String>, candidate: String) {
    let entity = candidate.trim().to_lowercase();
    if entity.is_empty() || STOP_WORDS.contains(entity.as_str()) {
        return;
    }
    if seen.insert(entity.clone()) {
        ordered.push(entity);
    }
}

/// Values of recognized topic keys, in key-table order. A dotted value `a.b`
/// additionally contributes its prefix `a`.
fn priority_entities(map: &serde_json::Map<String, Value>) -> Vec<String> {
    let mut out = Vec::new();

    for key in TOPIC_KEYS {
        if let Some(Value::String(value)) = map.get(*key) {
            let value = value.trim();
            if value.is_empty() {
                continue;
            }
            out.push(value.to_string());
            if let Some((prefix, _)) = value.split_once('.') {
                if !prefix.is_empty() {
                    out.push(prefix.to_string());
                }
            }
        }
    }

    for key in LIST_KEYS {
        if let Some(Value::Array(items)) = map.get(*key) {
            for item in items {
                if let Value::String(s) = item {
                    if !s.trim().is_empty() {
                        out.push(s.trim().to_string());
                    }
                }
            }
        }
    }

    out
}

/// Mine generic entities from text: hashtags, quoted phrases, capitalized
/// phrases, bare words, and bigrams. Sorted by (word count, length) so the
/// tightest topics surface first.
fn generic_entities(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();

    for cap in HASHTAG_PATTERN.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            out.push(m.as_str().to_string());
        }
    }

    for cap in QUOTED_PATTERN.captures_iter(text) {
        if let Some(m) = cap.get(1) {
            let phrase = m.as_str().trim();
            if !phrase.is_empty() && phrase.split_whitespace().count() <= 4 {
                out.push(phrase.to_string());
            }
        }
    }

    for m in CAPITALIZED_PATTERN.find_iter(text) {
        out.push(m.as_str().to_string());
    }

    // Stop words are dropped from the token stream before forming words and
    // bigrams so phrases like "the api" never become entities.
    let tokens: Vec<&str> = WORD_PATTERN
        .find_iter(text)
        .map(|m| m.as_str())
        .filter(|w| !STOP_WORDS.contains(w.to_lowercase().as_str()))
        .collect();

    for w in &tokens {
        if (3..=20).contains(&w.len()) {
            out.push((*w).to_string());
        }
    }

    for pair in tokens.windows(2) {
        out.push(format!("{} {}", pair[0], pair[1]));
    }

    out.sort_by_key(|e| (e.split_whitespace().count(), e.len()));
    out
}
