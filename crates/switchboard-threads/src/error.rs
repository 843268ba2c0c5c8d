use thiserror::Error;

#[derive(Debug, Error)]
pub enum ThreadError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Thread not found: {0}")]
    NotFound(i64),
}

pub type Result<T> = std::result::Result<T, ThreadError>;
