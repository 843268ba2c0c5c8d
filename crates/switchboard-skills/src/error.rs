use thiserror::Error;

#[derive(Debug, Error)]
pub enum SkillError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Skill '{0}' does not handle tool calls")]
    NoToolSupport(String),

    #[error("Tool '{0}' failed: {1}")]
    ToolFailed(String, String),

    #[error("Transcription failed: {0}")]
    Transcription(String),

    #[error("Command blocked: {0}")]
    CommandBlocked(String),
}

pub type Result<T> = std::result::Result<T, SkillError>;
