use thiserror::Error;

/// Registry- and credential-level failures. Provider *calls* never return
/// these; they produce `ProviderResponse { success: false, .. }` instead.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Unknown provider: {0}")]
    UnknownProvider(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Credential decryption failed for tenant {tenant}: {reason}")]
    DecryptionFailed { tenant: String, reason: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),
}

pub type Result<T> = std::result::Result<T, ProviderError>;
