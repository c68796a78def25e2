//! Embedding service client
//!
//! Talks to an Ollama-compatible endpoint: `POST /api/embed` with
//! `{model, input}` returning `{embeddings: [[f32, ...]]}`. The embedder is
//! best-effort; any timeout, transport error, or non-200 yields `None` and
//! the caller degrades (queue for later, or fall back to fulltext dedup).

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, warn};

use crate::config::Config;

/// Network budget for a single embedding call
const EMBED_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Deserialize)]
struct EmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

/// HTTP client for the embedding service
#[derive(Debug, Clone)]
pub struct EmbeddingClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl EmbeddingClient {
    /// Build from config; `None` when no embedding endpoint is configured.
    pub fn from_config(config: &Config) -> Option<Self> {
        let base_url = config.ollama_url.clone()?;
        let client = reqwest::Client::builder()
            .timeout(EMBED_TIMEOUT)
            .build()
            .ok()?;
        Some(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            model: config.ollama_model.clone(),
        })
    }

    /// Embed one text. Returns `None` on any failure.
    pub async fn embed(&self, text: &str) -> Option<Vec<f32>> {
        let url = format!("{}/api/embed", self.base_url);
        let body = serde_json::json!({ "model": self.model, "input": text });

        let response = match self.client.post(&url).json(&body).send().await {
            Ok(r) => r,
            Err(e) => {
                warn!(error = %e, "embedding request failed");
                return None;
            }
        };

        if !response.status().is_success() {
            warn!(status = %response.status(), "embedding service returned error");
            return None;
        }

        match response.json::<EmbedResponse>().await {
            Ok(parsed) => {
                let embedding = parsed.embeddings.into_iter().next()?;
                if embedding.is_empty() {
                    return None;
                }
                debug!(dims = embedding.len(), "embedded text");
                Some(embedding)
            }
            Err(e) => {
                warn!(error = %e, "embedding response malformed");
                None
            }
        }
    }
}
