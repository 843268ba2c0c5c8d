use thiserror::Error;

#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Unknown agent: {0}")]
    UnknownAgent(i64),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Extraction model error: {0}")]
    ExtractionModel(String),
}

pub type Result<T> = std::result::Result<T, MemoryError>;
