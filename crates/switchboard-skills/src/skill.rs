use std::sync::Arc;

use async_trait::async_trait;

use switchboard_core::message::InboundMessage;
use switchboard_core::types::TenantId;
use switchboard_memory::shared::SharedKnowledgePool;
use switchboard_providers::credentials::CredentialStore;
use switchboard_providers::llm::ToolSchema;
use switchboard_providers::{FlightRegistry, SearchRegistry};

use crate::error::{Result, SkillError};

/// Narrow speech-to-text capability used by the transcription skill. The
/// concrete engine (local whisper, a vendor API) is wired by the host.
#[async_trait]
pub trait Transcriber: Send + Sync {
    async fn transcribe(&self, media_path: &str) -> Result<String>;
}

/// Shared services a skill may touch during a call.
#[derive(Clone)]
pub struct SkillContext {
    pub tenant: TenantId,
    pub agent_id: i64,
    pub sender_key: String,
    pub search: Arc<SearchRegistry>,
    pub flights: Arc<FlightRegistry>,
    pub credentials: Arc<CredentialStore>,
    pub shared_pool: Arc<SharedKnowledgePool>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// What a skill did with an inbound message during pre-processing.
#[derive(Debug, Clone, Default)]
pub struct SkillOutcome {
    /// Replacement for the message text (e.g. an audio transcript).
    pub replaced_text: Option<String>,
    /// Output produced by the skill. With `skip_ai` it is sent directly;
    /// otherwise it becomes additional LLM context.
    pub output: Option<String>,
    /// Bypass the LLM entirely and send `output` as the reply.
    pub skip_ai: bool,
    /// Media files to send alongside the reply.
    pub media_paths: Vec<String>,
}

/// Result of a skill-registered tool call.
#[derive(Debug, Clone, Default)]
pub struct SkillToolResult {
    pub output: String,
    pub media_paths: Vec<String>,
}

/// A declarative per-agent capability bundle.
///
/// Every hook has a no-op default so simple skills implement only what they
/// need; a marker skill (adaptive personality) implements nothing at all.
#[async_trait]
pub trait Skill: Send + Sync {
    /// Stable identifier stored in the agent_skills table.
    fn skill_type(&self) -> &'static str;

    /// Chance to handle or transform the message before the LLM runs.
    async fn pre_process(
        &self,
        _ctx: &SkillContext,
        _msg: &InboundMessage,
        _text: &str,
    ) -> Result<Option<SkillOutcome>> {
        Ok(None)
    }

    /// Tool schemas this skill exposes to the LLM.
    fn tool_definitions(&self) -> Vec<ToolSchema> {
        Vec::new()
    }

    /// Extra system-prompt block for this skill's tools, if any.
    fn tool_prompt(&self) -> Option<String> {
        None
    }

    fn handles_tool(&self, tool_name: &str) -> bool {
        self.tool_definitions().iter().any(|t| t.name == tool_name)
    }

    async fn execute_tool(
        &self,
        _ctx: &SkillContext,
        tool_name: &str,
        _arguments: &serde_json::Value,
    ) -> Result<SkillToolResult> {
        Err(SkillError::NoToolSupport(tool_name.to_string()))
    }

    /// Runs after the reply has been produced (e.g. knowledge sharing).
    async fn post_response(
        &self,
        _ctx: &SkillContext,
        _msg: &InboundMessage,
        _reply: &str,
    ) -> Result<()> {
        Ok(())
    }
}
