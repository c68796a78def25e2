//! Environment-driven configuration
//!
//! All knobs come from `EVA_*` environment variables. The only hard
//! requirement is a writable store root; the graph, vector store, and
//! embedder are each optional and the pipeline degrades around them.

use std::path::{Path, PathBuf};

use crate::error::{MemoryError, Result};

/// Default embedding model when `EVA_OLLAMA_MODEL` is unset
pub const DEFAULT_EMBED_MODEL: &str = "nomic-embed-text";

/// Runtime configuration assembled from the environment
#[derive(Debug, Clone)]
pub struct Config {
    /// Store root, default `~/.eva-memory`
    pub store_path: PathBuf,
    /// Client id suffix for state-bearing files (WAL, queue, session notes)
    pub client_id: String,
    /// Neo4j bolt URI, e.g. `bolt://neo4j:7687`
    pub neo4j_uri: Option<String>,
    pub neo4j_user: String,
    pub neo4j_pass: Option<String>,
    /// ChromaDB base URL (optional semantic layer)
    pub chroma_url: Option<String>,
    /// ChromaDB collection id
    pub chroma_collection: Option<String>,
    /// Ollama base URL (optional embedding service)
    pub ollama_url: Option<String>,
    /// Embedding model name
    pub ollama_model: String,
}

impl Config {
    /// Build configuration from `EVA_*` environment variables.
    pub fn from_env() -> Result<Self> {
        let store_path = match std::env::var("EVA_STORE_PATH") {
            Ok(raw) if !raw.trim().is_empty() => {
                PathBuf::from(shellexpand::tilde(raw.trim()).to_string())
            }
            _ => dirs::home_dir()
                .ok_or_else(|| MemoryError::Config("cannot resolve home directory".into()))?
                .join(".eva-memory"),
        };

        let client_id = env_nonempty("EVA_CLIENT_ID").unwrap_or_else(|| "default".to_string());

        Ok(Self {
            store_path,
            client_id,
            neo4j_uri: env_nonempty("EVA_NEO4J_URI"),
            neo4j_user: env_nonempty("EVA_NEO4J_USER").unwrap_or_else(|| "neo4j".to_string()),
            neo4j_pass: env_nonempty("EVA_NEO4J_PASS").or_else(|| env_nonempty("NEO4J_PASSWORD")),
            chroma_url: env_nonempty("EVA_CHROMA_URL"),
            chroma_collection: env_nonempty("EVA_CHROMA_COLLECTION"),
            ollama_url: env_nonempty("EVA_OLLAMA_URL"),
            ollama_model: env_nonempty("EVA_OLLAMA_MODEL")
                .unwrap_or_else(|| DEFAULT_EMBED_MODEL.to_string()),
        })
    }

    /// Ensure the store root and its subdirectories exist.
    pub fn ensure_dirs(&self) -> Result<()> {
        for sub in ["daily", "projects", "backups"] {
            std::fs::create_dir_all(self.store_path.join(sub))?;
        }
        Ok(())
    }

    /// Daily markdown log directory
    pub fn daily_dir(&self) -> PathBuf {
        self.store_path.join("daily")
    }

    /// Per-project markdown log directory
    pub fn projects_dir(&self) -> PathBuf {
        self.store_path.join("projects")
    }

    /// Backup snapshot directory
    pub fn backups_dir(&self) -> PathBuf {
        self.store_path.join("backups")
    }

    /// Path of the per-client state record (WAL, session, queue stats)
    pub fn state_path(&self) -> PathBuf {
        self.store_path
            .join(format!("state-{}.json", self.client_id))
    }

    /// Path of the per-client pending-embeddings log
    pub fn queue_path(&self) -> PathBuf {
        self.store_path
            .join(format!("pending-embeddings-{}.jsonl", self.client_id))
    }

    /// Path of the per-client session-state markdown file
    pub fn session_notes_path(&self) -> PathBuf {
        self.store_path
            .join(format!("session-{}.md", self.client_id))
    }

    /// Whether the semantic layer is fully configured (url + collection)
    pub fn vector_configured(&self) -> bool {
        self.chroma_url.is_some() && self.chroma_collection.is_some()
    }

    /// Test fixture: config rooted at an arbitrary directory, no services.
    pub fn for_store(root: &Path, client_id: &str) -> Self {
        Self {
            store_path: root.to_path_buf(),
            client_id: client_id.to_string(),
            neo4j_uri: None,
            neo4j_user: "neo4j".to_string(),
            neo4j_pass: None,
            chroma_url: None,
            chroma_collection: None,
            ollama_url: None,
            ollama_model: DEFAULT_EMBED_MODEL.to_string(),
        }
    }
}

fn env_nonempty(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}
