use thiserror::Error;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("retrieval store error: {0}")]
    Retrieval(String),

    #[error("cache database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}
