use thiserror::Error;

#[derive(Debug, Error)]
pub enum ContactError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Contact not found: {0}")]
    NotFound(String),

    #[error("Invalid channel type: {0}")]
    InvalidChannelType(String),
}

pub type Result<T> = std::result::Result<T, ContactError>;
