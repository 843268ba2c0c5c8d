//! The agent service: one `process_message` drives prompt assembly, the LLM
//! call, post-processing, and tool dispatch for every channel.

use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tracing::{info, warn};

use switchboard_core::types::TenantId;
use switchboard_memory::extractor::ExtractionModel;
use switchboard_memory::MemoryError;
use switchboard_providers::credentials::CredentialStore;
use switchboard_providers::llm::{ChatRequest, NativeToolCall};
use switchboard_providers::types::{FailureKind, UsageUnits};
use switchboard_providers::usage::{UsageEvent, UsageTracker};
use switchboard_providers::LlmRegistry;
use switchboard_sandbox::executor::FollowUpTarget;
use switchboard_sandbox::SandboxExecutor;
use switchboard_skills::{SkillContext, SkillManager};

use crate::contamination::DetectorCache;
use crate::profile::AgentProfile;
use crate::prompt::{self, PromptParts};
use crate::sanitize;
use crate::sentinel::{SentinelAnalyzer, SentinelMode};
use crate::toolcall;

/// Generic user-facing apology for transient upstream failures. The user is
/// expected to resend; nothing is retried automatically.
const UPSTREAM_APOLOGY: &str =
    "Desculpe, estou com dificuldades técnicas no momento. Pode tentar novamente?";
const NOT_CONFIGURED_REPLY: &str =
    "Este recurso não está disponível no momento (provedor não configurado).";
const CONTAMINATION_REPLY: &str =
    "⚠️ Erro interno: resposta contaminada detectada e bloqueada.";

#[derive(Debug, Clone, Default)]
pub struct AgentReply {
    pub answer: Option<String>,
    /// `skill:<tool>` or `custom:<tool>` when a tool ran.
    pub tool_used: Option<String>,
    pub tool_result: Option<String>,
    /// The tool acknowledged and continues in the background.
    pub tool_backgrounded: bool,
    pub tool_execution_id: Option<String>,
    pub tokens: UsageUnits,
    pub execution_time_ms: u64,
    pub media_paths: Vec<String>,
    pub security_blocked: bool,
    /// The matched pattern when the contamination gate suppressed the reply.
    pub contamination: Option<String>,
    pub error: Option<String>,
}

/// Per-call options supplied by the router.
#[derive(Default)]
pub struct ProcessOptions<'a> {
    /// Contact directory summary for the prompt.
    pub contact_context: Option<String>,
    /// The user's query without injected context, for sentinel analysis.
    pub original_query: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub agent_run_id: Option<i64>,
    /// Delivery target for long-running tool follow-ups.
    pub follow_up: Option<FollowUpTarget>,
    /// Set when the router already ran the sentinel gate.
    pub skip_sentinel: bool,
}

pub struct AgentService {
    llm: Arc<LlmRegistry>,
    credentials: Arc<CredentialStore>,
    usage: Arc<UsageTracker>,
    skills: Arc<SkillManager>,
    sandbox: Arc<SandboxExecutor>,
    detectors: Arc<DetectorCache>,
    sentinel: SentinelAnalyzer,
}

impl AgentService {
    pub fn new(
        llm: Arc<LlmRegistry>,
        credentials: Arc<CredentialStore>,
        usage: Arc<UsageTracker>,
        skills: Arc<SkillManager>,
        sandbox: Arc<SandboxExecutor>,
        detectors: Arc<DetectorCache>,
        sentinel_mode: SentinelMode,
    ) -> Self {
        Self {
            llm,
            credentials,
            usage,
            skills,
            sandbox,
            detectors,
            sentinel: SentinelAnalyzer::new(sentinel_mode),
        }
    }

    pub fn sentinel(&self) -> &SentinelAnalyzer {
        &self.sentinel
    }

    pub fn skills(&self) -> &Arc<SkillManager> {
        &self.skills
    }

    pub fn sandbox(&self) -> &Arc<SandboxExecutor> {
        &self.sandbox
    }

    pub fn detectors(&self) -> &Arc<DetectorCache> {
        &self.detectors
    }

    /// Process one message through the agent. `message_text` carries the
    /// full context-prefixed text; `opts.original_query` is the raw user
    /// query for security analysis and recall.
    pub async fn process_message(
        &self,
        profile: &AgentProfile,
        skill_ctx: &SkillContext,
        message_text: &str,
        opts: ProcessOptions<'_>,
    ) -> AgentReply {
        let start = Instant::now();
        let mut reply = AgentReply::default();

        // Security gate first, before any model call.
        if !opts.skip_sentinel {
            let verdict = self
                .sentinel
                .analyze(opts.original_query.unwrap_or(message_text));
            if verdict.is_blocked() {
                reply.answer = Some(format!(
                    "🛡️ Sua mensagem foi bloqueada por medidas de segurança: {}",
                    verdict.reason.as_deref().unwrap_or("conteúdo suspeito")
                ));
                reply.security_blocked = true;
                reply.error = verdict.detection;
                reply.execution_time_ms = start.elapsed().as_millis() as u64;
                return reply;
            }
        }

        // Assemble the system prompt.
        let (tool_schemas, skill_prompts) = self
            .skills
            .skill_tools(profile.id)
            .unwrap_or_default();
        let sandbox_prompts = self
            .sandbox
            .tool_prompts(&profile.tenant_id)
            .unwrap_or(None);
        let system_prompt = prompt::assemble(
            &PromptParts {
                agent_system_prompt: profile.system_prompt.clone(),
                contact_context: opts.contact_context.clone(),
                sandboxed_tool_prompts: sandbox_prompts,
                skill_tool_prompts: skill_prompts,
            },
            chrono::Utc::now(),
        );

        // Resolve and call the provider.
        let provider = match self
            .llm
            .get(&profile.model_provider, &self.credentials, &profile.tenant_id)
        {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = %profile.model_provider, error = %e, "LLM provider unavailable");
                self.record_usage(profile, &opts, UsageUnits::default(), false, Some("not_configured"));
                reply.answer = Some(NOT_CONFIGURED_REPLY.to_string());
                reply.error = Some(e.to_string());
                reply.execution_time_ms = start.elapsed().as_millis() as u64;
                return reply;
            }
        };

        let mut request = ChatRequest::new(&profile.model_name, system_prompt, message_text);
        request.tools = tool_schemas;
        let response = provider.execute(&request).await;

        let usage = response.usage.unwrap_or_default();
        reply.tokens = usage;
        self.record_usage(
            profile,
            &opts,
            usage,
            response.success,
            response.failure_kind().map(|k| k.as_str()),
        );

        if !response.success {
            let failure = response.error.as_ref();
            let kind = failure.map(|f| f.kind).unwrap_or(FailureKind::UpstreamError);
            reply.answer = Some(match kind {
                FailureKind::NotConfigured | FailureKind::AuthFailed => {
                    NOT_CONFIGURED_REPLY.to_string()
                }
                _ => UPSTREAM_APOLOGY.to_string(),
            });
            reply.error = failure.map(|f| format!("{}: {}", f.kind, f.message));
            reply.execution_time_ms = start.elapsed().as_millis() as u64;
            return reply;
        }

        let completion = match response.payload {
            Some(c) => c,
            None => {
                reply.answer = Some(UPSTREAM_APOLOGY.to_string());
                reply.error = Some("provider returned empty payload".to_string());
                reply.execution_time_ms = start.elapsed().as_millis() as u64;
                return reply;
            }
        };

        // Native tool calls are normalized into text blocks so the common
        // parser handles every provider the same way.
        let mut text = completion.content;
        for call in &completion.tool_calls {
            text.push_str(&native_call_to_block(call));
        }

        // Post-processing: reasoning strip, context strip.
        text = sanitize::strip_reasoning_tags(&text);
        text = sanitize::strip_internal_context(&text);

        // Tool dispatch. The sensitive-content filter would misread a
        // well-formed tool block as a leak, so it only runs on replies with
        // no parseable call; failed or hallucinated blocks are stripped.
        let mut tool_dispatched = false;
        if toolcall::contains_tool_call(&text) {
            if let Some(call) = toolcall::parse_tool_call(&text) {
                text = self
                    .dispatch_tool_call(profile, skill_ctx, &call, text, &opts, &mut reply)
                    .await;
                tool_dispatched = true;
            }
            text = sanitize::strip_leaked_tool_blocks(&text);
        }
        if !tool_dispatched {
            text = sanitize::filter_sensitive_content(&text);
        }

        // Final contamination gate.
        let detector = self
            .detectors
            .for_agent(profile.id, &profile.contamination_patterns);
        if let Some(pattern) = detector.check(&text) {
            reply.contamination = Some(pattern.to_string());
            reply.error = Some(format!("Contamination detected: {}", pattern));
            reply.answer = Some(CONTAMINATION_REPLY.to_string());
            reply.execution_time_ms = start.elapsed().as_millis() as u64;
            return reply;
        }

        reply.answer = Some(text);
        reply.execution_time_ms = start.elapsed().as_millis() as u64;
        reply
    }

    async fn dispatch_tool_call(
        &self,
        profile: &AgentProfile,
        skill_ctx: &SkillContext,
        call: &toolcall::ParsedToolCall,
        text: String,
        opts: &ProcessOptions<'_>,
        reply: &mut AgentReply,
    ) -> String {
        info!(
            tool = %call.tool_name,
            command = %call.command_name,
            agent_id = profile.id,
            "tool call detected"
        );

        // Skills win over sandboxed tools; the shell tool answers to both
        // its alias and its registered name.
        let skill_hit = self
            .skills
            .find_skill_by_tool_name(profile.id, &call.tool_name)
            .is_some()
            || self
                .skills
                .find_skill_by_tool_name(profile.id, &call.command_name)
                .is_some();

        if skill_hit {
            let tool_name = if call.tool_name == "shell" || call.command_name == "run_shell_command"
            {
                "run_shell_command"
            } else {
                call.tool_name.as_str()
            };
            match self
                .skills
                .execute_tool_call(skill_ctx, tool_name, &call.parameters_json())
                .await
            {
                Ok(result) => {
                    reply.tool_used = Some(format!("skill:{}", call.tool_name));
                    reply.tool_result = Some(result.output.clone());
                    reply.media_paths.extend(result.media_paths);
                    toolcall::replace_tool_block(&text, &result.output)
                }
                Err(e) => {
                    // Feed the failure back through the substitution path so
                    // the model can explain or adjust.
                    warn!(tool = %call.tool_name, error = %e, "skill tool failed");
                    toolcall::replace_tool_block(&text, &format!("Tool error: {}", e))
                }
            }
        } else {
            match self
                .sandbox
                .execute(
                    &profile.tenant_id,
                    &call.tool_name,
                    &call.command_name,
                    call.parameters.clone(),
                    opts.agent_run_id,
                    opts.follow_up.clone(),
                )
                .await
            {
                Ok(outcome) => {
                    reply.tool_used = Some(format!("custom:{}", call.tool_name));
                    reply.tool_result = Some(outcome.output.clone());
                    reply.tool_backgrounded = outcome.backgrounded;
                    reply.tool_execution_id = Some(outcome.execution_id.clone());
                    toolcall::replace_tool_block(&text, &outcome.output)
                }
                Err(e) => {
                    warn!(tool = %call.tool_name, error = %e, "sandboxed tool failed");
                    toolcall::replace_tool_block(&text, &format!("Tool error: {}", e))
                }
            }
        }
    }

    fn record_usage(
        &self,
        profile: &AgentProfile,
        opts: &ProcessOptions<'_>,
        units: UsageUnits,
        success: bool,
        error_kind: Option<&str>,
    ) {
        let event = UsageEvent {
            operation_type: "message_processing",
            provider: &profile.model_provider,
            model: Some(&profile.model_name),
            agent_id: Some(profile.id),
            sender_key: None,
            message_id: opts.message_id,
            units,
            success,
            error_kind,
        };
        if let Err(e) = self.usage.record(&profile.tenant_id, &event) {
            warn!(error = %e, "failed to record usage event");
        }
    }
}

/// Render a native (structured) tool call as a `[TOOL_CALL]` text block.
fn native_call_to_block(call: &NativeToolCall) -> String {
    let mut block = format!("\n[TOOL_CALL]\ntool_name: {}\n", call.name);
    let command = call.arguments["command"]
        .as_str()
        .unwrap_or(&call.name)
        .to_string();
    block.push_str(&format!("command_name: {}\nparameters:\n", command));
    if let Some(object) = call.arguments.as_object() {
        for (key, value) in object {
            if key == "command" {
                continue;
            }
            let rendered = match value {
                serde_json::Value::String(s) => s.clone(),
                other => other.to_string(),
            };
            block.push_str(&format!("  {}: {}\n", key, rendered));
        }
    }
    block.push_str("[/TOOL_CALL]");
    block
}

/// Provider-backed implementation of the fact extractor's model capability.
pub struct LlmExtractionModel {
    llm: Arc<LlmRegistry>,
    credentials: Arc<CredentialStore>,
    tenant: TenantId,
    provider: String,
    model: String,
}

impl LlmExtractionModel {
    pub fn new(
        llm: Arc<LlmRegistry>,
        credentials: Arc<CredentialStore>,
        tenant: TenantId,
        provider: impl Into<String>,
        model: impl Into<String>,
    ) -> Self {
        Self {
            llm,
            credentials,
            tenant,
            provider: provider.into(),
            model: model.into(),
        }
    }
}

#[async_trait]
impl ExtractionModel for LlmExtractionModel {
    async fn complete(&self, system: &str, user: &str) -> Result<String, MemoryError> {
        let provider = self
            .llm
            .get(&self.provider, &self.credentials, &self.tenant)
            .map_err(|e| MemoryError::ExtractionModel(e.to_string()))?;
        let request = ChatRequest::new(&self.model, system, user);
        let response = provider.execute(&request).await;
        if !response.success {
            let detail = response
                .error
                .map(|e| e.message)
                .unwrap_or_else(|| "unknown provider failure".to_string());
            return Err(MemoryError::ExtractionModel(detail));
        }
        Ok(response
            .payload
            .map(|c| c.content)
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn native_call_normalizes_to_block() {
        let call = NativeToolCall {
            name: "nmap".to_string(),
            arguments: json!({"command": "quick_scan", "target": "example.com"}),
        };
        let block = native_call_to_block(&call);
        assert!(block.contains("tool_name: nmap"));
        assert!(block.contains("command_name: quick_scan"));
        assert!(block.contains("target: example.com"));

        let parsed = toolcall::parse_tool_call(&block).unwrap();
        assert_eq!(parsed.tool_name, "nmap");
        assert_eq!(parsed.command_name, "quick_scan");
    }

    #[test]
    fn native_call_without_command_uses_tool_name() {
        let call = NativeToolCall {
            name: "web_search".to_string(),
            arguments: json!({"query": "rust async"}),
        };
        let parsed = toolcall::parse_tool_call(&native_call_to_block(&call)).unwrap();
        assert_eq!(parsed.command_name, "web_search");
        assert_eq!(parsed.parameters["query"], "rust async");
    }
}
