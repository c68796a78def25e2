//! Error types for Eva Memory

use thiserror::Error;

/// Result type alias for Eva Memory operations
pub type Result<T> = std::result::Result<T, MemoryError>;

/// Main error type for Eva Memory
#[derive(Error, Debug)]
pub enum MemoryError {
    #[error("Graph error: {0}")]
    Graph(#[from] neo4rs::Error),

    #[error("Graph unavailable: {0}")]
    GraphUnavailable(String),

    #[error("Vector store error: {0}")]
    Vector(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Memory not found: {0}")]
    NotFound(String),

    #[error("State error: {0}")]
    State(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl MemoryError {
    /// Whether this error means a backing service is down rather than the
    /// request being wrong. Degraded-layer handling keys off this.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            MemoryError::Graph(_)
                | MemoryError::GraphUnavailable(_)
                | MemoryError::Vector(_)
                | MemoryError::Http(_)
        )
    }
}
