use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Instance not found: {0}")]
    InstanceNotFound(i64),

    #[error("Invalid recipient '{recipient}' for channel {channel}")]
    InvalidRecipient { recipient: String, channel: String },
}

pub type Result<T> = std::result::Result<T, TransportError>;
