use thiserror::Error;

#[derive(Debug, Error)]
pub enum RouterError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Contact error: {0}")]
    Contact(#[from] switchboard_contacts::ContactError),

    #[error("Memory error: {0}")]
    Memory(#[from] switchboard_memory::MemoryError),

    #[error("Thread error: {0}")]
    Thread(#[from] switchboard_threads::ThreadError),

    #[error("Agent not found: {0}")]
    AgentNotFound(i64),
}

pub type Result<T> = std::result::Result<T, RouterError>;
