use thiserror::Error;

#[derive(Debug, Error)]
pub enum SandboxError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Unknown command '{command}' for tool '{tool}'")]
    UnknownCommand { tool: String, command: String },

    #[error("Missing mandatory parameter: {0}")]
    MissingParameter(String),

    #[error("Path escapes tool workspace: {0}")]
    PathEscape(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, SandboxError>;
