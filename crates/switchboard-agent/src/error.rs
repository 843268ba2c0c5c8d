use thiserror::Error;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("Provider error: {0}")]
    Provider(#[from] switchboard_providers::ProviderError),

    #[error("Skill error: {0}")]
    Skill(#[from] switchboard_skills::SkillError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] switchboard_sandbox::SandboxError),
}

pub type Result<T> = std::result::Result<T, AgentError>;
