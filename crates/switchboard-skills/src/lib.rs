//! Skill system: per-agent capability bundles.
//!
//! A skill can transform inbound messages before the LLM sees them
//! (transcription), expose tool schemas the LLM may call (shell, web
//! search), and run post-response hooks (knowledge sharing). Which skills
//! an agent has is DB-driven; the registry of implementations is static.

pub mod db;
pub mod error;
pub mod manager;
pub mod skill;
pub mod skills;

pub use error::{Result, SkillError};
pub use manager::SkillManager;
pub use skill::{Skill, SkillContext, SkillOutcome, SkillToolResult, Transcriber};
