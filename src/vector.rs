//! Vector store client (ChromaDB HTTP API)
//!
//! Upsert, query, update, and delete against one collection. The graph is
//! authoritative for activeness; this layer only stores embeddings and
//! enough metadata to render hits without a second lookup.

use std::collections::HashMap;
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;

use crate::config::Config;
use crate::error::{MemoryError, Result};

/// Network budget for upsert/query calls
const VECTOR_TIMEOUT: Duration = Duration::from_secs(10);

/// Health checks must answer fast or the drain gives up for this round
const HEARTBEAT_TIMEOUT: Duration = Duration::from_millis(500);

/// Vector hits below this similarity are noise and get dropped
pub const MIN_VECTOR_SCORE: f64 = 0.15;

/// Map an L2 distance to a similarity score in (0, 1].
pub fn similarity_from_distance(distance: f64) -> f64 {
    1.0 / (1.0 + distance)
}

/// Drop null-ish and empty metadata values; the store rejects them.
pub fn sanitize_metadata(pairs: Vec<(&str, Option<String>)>) -> HashMap<String, String> {
    pairs
        .into_iter()
        .filter_map(|(k, v)| match v {
            Some(v) if !v.trim().is_empty() => Some((k.to_string(), v)),
            _ => None,
        })
        .collect()
}

/// One nearest-neighbour result
#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub document: Option<String>,
    pub distance: f64,
    pub metadata: HashMap<String, serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct QueryResponse {
    ids: Vec<Vec<String>>,
    #[serde(default)]
    distances: Option<Vec<Vec<f64>>>,
    #[serde(default)]
    documents: Option<Vec<Vec<Option<String>>>>,
    #[serde(default)]
    metadatas: Option<Vec<Vec<Option<HashMap<String, serde_json::Value>>>>>,
}

/// HTTP client for one vector collection
#[derive(Debug, Clone)]
pub struct VectorStore {
    client: reqwest::Client,
    base_url: String,
    collection: String,
}

impl VectorStore {
    /// Build from config; `None` unless both URL and collection are set.
    pub fn from_config(config: &Config) -> Option<Self> {
        let base_url = config.chroma_url.clone()?;
        let collection = config.chroma_collection.clone()?;
        let client = reqwest::Client::builder()
            .timeout(VECTOR_TIMEOUT)
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            collection,
        })
    }

    fn collection_url(&self, op: &str) -> String {
        format!(
            "{}/api/v1/collections/{}/{}",
            self.base_url, self.collection, op
        )
    }

    /// Liveness probe with a hard 500 ms budget.
    pub async fn heartbeat(&self) -> bool {
        let url = format!("{}/api/v1/heartbeat", self.base_url);
        let probe = self.client.get(&url).timeout(HEARTBEAT_TIMEOUT).send();
        match probe.await {
            Ok(response) => response.status().is_success(),
            Err(_) => false,
        }
    }

    /// Insert or replace one embedding.
    pub async fn upsert(
        &self,
        id: &str,
        embedding: &[f32],
        document: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "ids": [id],
            "embeddings": [embedding],
            "documents": [document],
            "metadatas": [metadata],
        });
        self.post_ok("upsert", &body).await
    }

    /// Query nearest neighbours, optionally constrained by one metadata
    /// equality (used by dedup to stay within a memory type).
    pub async fn query(
        &self,
        embedding: &[f32],
        n_results: usize,
        where_eq: Option<(&str, &str)>,
    ) -> Result<Vec<VectorHit>> {
        let mut body = serde_json::json!({
            "query_embeddings": [embedding],
            "n_results": n_results,
            "include": ["documents", "distances", "metadatas"],
        });
        if let Some((key, value)) = where_eq {
            body["where"] = serde_json::json!({ key: value });
        }

        let response = self
            .client
            .post(self.collection_url("query"))
            .json(&body)
            .send()
            .await?;
        if !response.status().is_success() {
            return Err(MemoryError::Vector(format!(
                "query failed with status {}",
                response.status()
            )));
        }

        let parsed: QueryResponse = response.json().await?;
        let ids = parsed.ids.into_iter().next().unwrap_or_default();
        let distances = parsed
            .distances
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let documents = parsed
            .documents
            .and_then(|d| d.into_iter().next())
            .unwrap_or_default();
        let metadatas = parsed
            .metadatas
            .and_then(|m| m.into_iter().next())
            .unwrap_or_default();

        let hits = ids
            .into_iter()
            .enumerate()
            .map(|(i, id)| VectorHit {
                id,
                document: documents.get(i).cloned().flatten(),
                distance: distances.get(i).copied().unwrap_or(f64::MAX),
                metadata: metadatas.get(i).cloned().flatten().unwrap_or_default(),
            })
            .collect();
        Ok(hits)
    }

    /// Replace metadata on an existing entry.
    pub async fn update_metadata(
        &self,
        id: &str,
        metadata: &HashMap<String, String>,
    ) -> Result<()> {
        let body = serde_json::json!({
            "ids": [id],
            "metadatas": [metadata],
        });
        self.post_ok("update", &body).await
    }

    /// Remove an entry. Missing ids are not an error worth surfacing.
    pub async fn delete(&self, id: &str) -> Result<()> {
        let body = serde_json::json!({ "ids": [id] });
        self.post_ok("delete", &body).await
    }

    async fn post_ok(&self, op: &str, body: &serde_json::Value) -> Result<()> {
        let response = self
            .client
            .post(self.collection_url(op))
            .json(body)
            .send()
            .await?;
        if !response.status().is_success() {
            warn!(op, status = %response.status(), "vector store call failed");
            return Err(MemoryError::Vector(format!(
                "{} failed with status {}",
                op,
                response.status()
            )));
        }
        Ok(())
    }
}
