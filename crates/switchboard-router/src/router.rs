//! The per-message orchestrator.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{error, info, warn};

use switchboard_agent::service::ProcessOptions;
use switchboard_agent::AgentService;
use switchboard_contacts::sessions::SessionStore;
use switchboard_contacts::ContactDirectory;
use switchboard_core::config::SwitchboardConfig;
use switchboard_core::message::{InboundMessage, OutboundMessage};
use switchboard_core::send::ChannelSend;
use switchboard_core::types::{Channel, TenantId};
use switchboard_memory::extractor::ExtractionModel;
use switchboard_memory::format::{format_context_for_prompt, FormatOptions};
use switchboard_memory::manager::KeyScope;
use switchboard_memory::memguard::DetectionMode;
use switchboard_memory::shared::SharedKnowledgePool;
use switchboard_memory::types::{EntryMetadata, MemoryContext};
use switchboard_memory::MemoryManager;
use switchboard_providers::credentials::CredentialStore;
use switchboard_providers::tts::TtsRequest;
use switchboard_providers::{FlightRegistry, LlmRegistry, SearchRegistry, TtsRegistry};
use switchboard_sandbox::executor::FollowUpTarget;
use switchboard_skills::{SkillContext, Transcriber};
use switchboard_threads::engine::ThreadEngine;
use switchboard_threads::lookup as thread_lookup;
use switchboard_threads::ThreadStatus;

use crate::agents::{Agent, AgentStore};
use crate::dedup::DuplicateCache;
use crate::error::Result;
use crate::projects::ProjectStore;
use crate::runs::{AgentRunStore, RunCompletion};
use crate::selection::{self, SelectionContext};
use crate::slash::{self, SlashContext};

/// Which transport instance this router serves.
#[derive(Debug, Clone)]
pub struct TransportBinding {
    pub channel: Channel,
    pub instance_id: Option<i64>,
    /// Only the tenant's designated group-handler instance processes group
    /// messages; every other instance drops them.
    pub is_group_handler: bool,
}

/// Everything a router needs, wired once at startup on the root context.
pub struct RouterDeps {
    pub tenant: TenantId,
    pub config: SwitchboardConfig,
    pub db: Arc<Mutex<Connection>>,
    pub directory: Arc<ContactDirectory>,
    pub memory: Arc<MemoryManager>,
    pub agent_service: Arc<AgentService>,
    pub thread_engine: Arc<ThreadEngine>,
    pub llm: Arc<LlmRegistry>,
    pub search: Arc<SearchRegistry>,
    pub flights: Arc<FlightRegistry>,
    pub tts: Arc<TtsRegistry>,
    pub credentials: Arc<CredentialStore>,
    pub sender: Arc<dyn ChannelSend>,
    pub transcriber: Option<Arc<dyn Transcriber>>,
}

/// PT/EN scheduling intents that break out of an active thread so a
/// reminder can be created by normal skill processing.
const SCHEDULING_BREAKOUT: &[&str] = &[
    "me lembre",
    "lembre-me",
    "lembrar",
    "remind me",
    "reminder",
    "agendar",
    "schedule",
    "agendamento",
    "scheduling",
];

/// Continuation cues for tool-output context injection.
const TOOL_CONTINUATION: &[&str] = &[
    "result",
    "results",
    "output",
    "findings",
    "found",
    "scan",
    "vulnerability",
    "vulnerabilities",
    "the scan",
    "that scan",
    "previous",
    "last time",
    "what did you find",
    "show me",
    "more details",
    "explain",
    "tell me more",
    "elaborate",
    "tool",
    "resultado",
];

const EMPTY_MESSAGE_REPLY: &str =
    "❌ Sorry, I couldn't process your message. If you sent an audio message, please try text or resend it.";

pub struct Router {
    tenant: TenantId,
    config: SwitchboardConfig,
    binding: TransportBinding,
    agents: AgentStore,
    runs: AgentRunStore,
    dedup: DuplicateCache,
    projects: ProjectStore,
    sessions: SessionStore,
    directory: Arc<ContactDirectory>,
    memory: Arc<MemoryManager>,
    agent_service: Arc<AgentService>,
    thread_engine: Arc<ThreadEngine>,
    llm: Arc<LlmRegistry>,
    tts: Arc<TtsRegistry>,
    search: Arc<SearchRegistry>,
    flights: Arc<FlightRegistry>,
    credentials: Arc<CredentialStore>,
    shared_pool: Arc<SharedKnowledgePool>,
    sender: Arc<dyn ChannelSend>,
    transcriber: Option<Arc<dyn Transcriber>>,
}

impl Router {
    pub fn new(deps: RouterDeps, binding: TransportBinding) -> Self {
        Self {
            agents: AgentStore::new(Arc::clone(&deps.db)),
            runs: AgentRunStore::new(Arc::clone(&deps.db)),
            dedup: DuplicateCache::new(Arc::clone(&deps.db)),
            projects: ProjectStore::new(Arc::clone(&deps.db)),
            sessions: SessionStore::new(Arc::clone(&deps.db)),
            shared_pool: Arc::new(SharedKnowledgePool::new(Arc::clone(&deps.db))),
            tenant: deps.tenant,
            config: deps.config,
            binding,
            directory: deps.directory,
            memory: deps.memory,
            agent_service: deps.agent_service,
            thread_engine: deps.thread_engine,
            llm: deps.llm,
            tts: deps.tts,
            search: deps.search,
            flights: deps.flights,
            credentials: deps.credentials,
            sender: deps.sender,
            transcriber: deps.transcriber,
        }
    }

    pub fn agents(&self) -> &AgentStore {
        &self.agents
    }

    pub fn runs(&self) -> &AgentRunStore {
        &self.runs
    }

    /// Entry point: every inbound handler is wrapped so an unhandled error
    /// logs and stops without further side effects.
    pub async fn route_message(&self, msg: InboundMessage, trigger_type: &str) {
        if let Err(e) = self.route_inner(&msg, trigger_type).await {
            error!(
                message_id = %msg.id,
                sender = %msg.sender,
                error = %e,
                "message routing failed"
            );
        }
    }

    async fn route_inner(&self, msg: &InboundMessage, trigger_type: &str) -> Result<()> {
        let sender_key = msg.sender_key().to_string();

        // Old messages usually mean transport-side history sync.
        let now_ts = chrono::Utc::now().timestamp();
        if msg.timestamp > 0 {
            let ts = if msg.timestamp > 10_000_000_000 {
                msg.timestamp / 1000
            } else {
                msg.timestamp
            };
            let age = now_ts - ts;
            if age > 3600 {
                warn!(message_id = %msg.id, age_seconds = age, "processing old message");
            }
        }

        // 1. Self-loop guard: the agent's own outbound must never trigger a
        // reply.
        let agent_phones = self.agents.agent_phone_numbers(&self.tenant)?;
        if agent_phones.iter().any(|p| sender_key.contains(p.as_str())) {
            warn!(sender = %sender_key, "dropping message from an agent-owned number");
            return Ok(());
        }

        // 2. Durable duplicate cache; re-observation is a no-op.
        if !self.dedup.observe(&self.tenant, msg)? {
            return Ok(());
        }

        // 3. Group senders resolve (or auto-create) a contact before any
        // further routing.
        let mut sender_name = msg.sender_name.clone();
        if msg.is_group {
            match self
                .directory
                .ensure_group_sender(&self.tenant, &msg.sender, msg.sender_name.as_deref())
            {
                Ok(contact) => sender_name = Some(contact.friendly_name),
                Err(e) => warn!(error = %e, "group sender auto-resolution failed"),
            }
        }

        // 4. Slash commands (except /inject, which rides along into normal
        // processing).
        if msg.body.starts_with('/') && !msg.body.starts_with("/inject") {
            return self.handle_slash(msg, &sender_key).await;
        }

        // 5. An active conversation thread takes precedence, unless the user
        // is clearly asking to schedule something.
        let body_lower = msg.body.to_lowercase();
        let scheduling_breakout = SCHEDULING_BREAKOUT.iter().any(|k| body_lower.contains(k));
        let active_thread = thread_lookup::find_active_thread(
            self.thread_engine.store(),
            &self.directory,
            &self.tenant,
            &msg.sender,
        );

        if let Some(thread) = active_thread {
            if scheduling_breakout {
                info!(thread_id = thread.id, "scheduling intent detected; bypassing thread");
            } else if self.handle_thread_reply(msg, thread).await? {
                return Ok(());
            }
            // A timed-out thread releases the message into normal flow.
        } else if self
            .thread_engine
            .should_block_post_completion(&self.tenant, &msg.sender)
        {
            // 6. Post-completion quiet period.
            return Ok(());
        }

        // 7. Maintenance mode.
        if self.config.maintenance.enabled {
            info!("maintenance mode active");
            self.send_text(msg, self.config.maintenance.message.clone())
                .await;
            return Ok(());
        }

        // 8. Group fan-out dedup across transport instances.
        if msg.is_group && !self.binding.is_group_handler {
            info!("not the group handler for this tenant; dropping group message");
            return Ok(());
        }

        // 9. Agent selection.
        let selection_ctx = SelectionContext {
            agents: &self.agents,
            directory: &self.directory,
            sessions: &self.sessions,
            tenant: &self.tenant,
            channel: self.binding.channel,
            instance_id: self.binding.instance_id,
        };
        let Some(agent) = selection::select_agent(&selection_ctx, msg)? else {
            info!("no agent selected; skipping message");
            return Ok(());
        };
        info!(agent_id = agent.id, agent = %agent.name, "agent selected");

        // 10. Activity start (observability).
        info!(
            target: "switchboard::activity",
            tenant = %self.tenant,
            agent_id = agent.id,
            sender = %sender_key,
            channel = %msg.channel,
            status = "start",
            "agent processing"
        );

        let result = self
            .process_with_agent(msg, &agent, &sender_key, sender_name.as_deref(), trigger_type)
            .await;

        // 26. Activity end, even on failure.
        info!(
            target: "switchboard::activity",
            tenant = %self.tenant,
            agent_id = agent.id,
            sender = %sender_key,
            channel = %msg.channel,
            status = "end",
            "agent processing"
        );
        result
    }

    async fn handle_slash(&self, msg: &InboundMessage, sender_key: &str) -> Result<()> {
        // /memory clear needs to know which agent currently serves this
        // sender.
        let selection_ctx = SelectionContext {
            agents: &self.agents,
            directory: &self.directory,
            sessions: &self.sessions,
            tenant: &self.tenant,
            channel: self.binding.channel,
            instance_id: self.binding.instance_id,
        };
        let current_agent = selection::select_agent(&selection_ctx, msg)?
            .map(|a| (a.id, a.memory_isolation));

        let ctx = SlashContext {
            tenant: &self.tenant,
            agents: &self.agents,
            sessions: &self.sessions,
            projects: &self.projects,
            memory: &self.memory,
            current_agent,
        };
        if let Some(outcome) = slash::handle_slash_command(&ctx, sender_key, &msg.body).await? {
            info!(command = %msg.body, "slash command handled");
            if outcome.store_in_tool_buffer {
                if let Some((agent_id, _)) = current_agent {
                    self.memory.tool_outputs().add(
                        agent_id,
                        sender_key,
                        "slash",
                        msg.body.trim_start_matches('/'),
                        &outcome.reply,
                    );
                }
            }
            self.send_text(msg, outcome.reply).await;
        }
        Ok(())
    }

    /// Returns `true` when the thread consumed the message; `false` when a
    /// stale thread timed out and normal processing should take over.
    async fn handle_thread_reply(
        &self,
        msg: &InboundMessage,
        thread: switchboard_threads::ConversationThread,
    ) -> Result<bool> {
        info!(thread_id = thread.id, "routing message to conversation thread");
        let agent = self.agents.get(&self.tenant, thread.agent_id)?;
        let profile = agent.to_profile();
        let skill_ctx = self.skill_context(&agent, msg.sender_key());

        // Voice notes transcribe before the thread sees them.
        let mut text = msg.body.clone();
        if msg.media_type.is_some() {
            let processed = self
                .agent_service
                .skills()
                .process_message_with_skills(&skill_ctx, msg, &text)
                .await;
            if processed.text != text {
                info!(chars = processed.text.len(), "audio transcribed for thread");
                text = processed.text;
            }
        }

        let recipient = thread.recipient.clone();
        let reply = self
            .thread_engine
            .process_reply(thread.id, &profile, &skill_ctx, &text, Some(&msg.id))
            .await?;

        if reply.status == ThreadStatus::Timeout {
            // The thread was stale; release the message into normal flow.
            info!("thread timed out; continuing with normal processing");
            return Ok(false);
        }

        if reply.should_reply {
            if let Some(content) = reply.reply_content {
                // Always answer on the thread's own recipient, never the
                // group the message happened to arrive through.
                self.sender
                    .send(&OutboundMessage {
                        channel: msg.channel,
                        recipient,
                        text: content,
                        media_path: None,
                    })
                    .await;
            }
        }
        Ok(true)
    }

    #[allow(clippy::too_many_arguments)]
    async fn process_with_agent(
        &self,
        msg: &InboundMessage,
        agent: &Agent,
        sender_key: &str,
        sender_name: Option<&str>,
        trigger_type: &str,
    ) -> Result<()> {
        let profile = agent.to_profile();
        let skill_ctx = self.skill_context(agent, sender_key);

        // 11. Project context for memory scoping and annotation.
        let project = self.projects.current(&self.tenant, sender_key)?;
        let project_id = project.as_ref().map(|p| p.id);

        // 12. Skill pre-processing (transcription, command-style skills).
        let processed = self
            .agent_service
            .skills()
            .process_message_with_skills(&skill_ctx, msg, &msg.body)
            .await;
        let mut message_text = processed.text.clone();

        if processed.skip_ai {
            if let Some(output) = processed.output {
                info!(skill = ?processed.skill_type, "skill handled message; skipping AI");
                for path in &processed.media_paths {
                    self.send_media(msg, path.clone()).await;
                }
                self.send_text(msg, output).await;
            }
            return Ok(());
        }
        if let Some(output) = &processed.output {
            // Skill produced data for the LLM to present.
            message_text = format!(
                "IMPORTANT: A skill has already executed and returned results. Use them to answer.\n\n\
                 SKILL RESULTS:\n{}\n\nUSER'S ORIGINAL REQUEST:\n{}",
                output, message_text
            );
        }

        // 13. Empty-message guard: empty input makes models hallucinate.
        if message_text.trim().is_empty() {
            warn!(agent_id = agent.id, "empty message after skill processing");
            self.send_text(msg, EMPTY_MESSAGE_REPLY.to_string()).await;
            return Ok(());
        }

        // 14. Sentinel gate BEFORE any memory write, so blocked content
        // cannot poison memory.
        let verdict = self.agent_service.sentinel().analyze(&message_text);
        if verdict.is_blocked() {
            warn!(detection = ?verdict.detection, "sentinel blocked message before memory write");
            self.send_text(
                msg,
                format!(
                    "🛡️ Message blocked for security reasons: {}",
                    verdict.reason.as_deref().unwrap_or("suspicious content")
                ),
            )
            .await;
            return Ok(());
        }
        if let Some(detection) = &verdict.detection {
            info!(detection = %detection, "sentinel detect-only hit; continuing");
        }

        // 15. Memory write (user turn). Contact resolution picks the memory
        // key discriminator, so the same person on WhatsApp and Telegram
        // lands in one partition.
        let contact_id = if msg.is_group {
            None
        } else if msg.channel == Channel::Telegram {
            let telegram_id = msg.telegram_id.as_deref().unwrap_or(&msg.sender);
            self.directory
                .resolve(
                    &self.tenant,
                    switchboard_contacts::types::ChannelIdentifierKind::TelegramId,
                    telegram_id,
                )?
                .map(|c| c.id)
        } else {
            self.directory
                .resolve_sender(&self.tenant, &msg.sender)?
                .map(|c| c.id)
        };
        let scope = KeyScope {
            chat_id: msg.is_group.then_some(msg.chat_id.as_str()),
            contact_id,
            project_id,
        };
        let metadata = EntryMetadata {
            sender_name: sender_name.map(String::from),
            is_group: msg.is_group,
            project_id,
            ..Default::default()
        };
        self.memory.add_message(
            agent.id,
            sender_key,
            agent.memory_isolation,
            &scope,
            "user",
            &message_text,
            Some(&msg.id),
            metadata,
        )?;

        // 16. Context assembly.
        let context = self.memory.get_context(
            &self.tenant,
            agent.id,
            sender_key,
            agent.memory_isolation,
            &scope,
            &msg.body,
            self.config.memory.semantic_results,
            self.config.memory.similarity_threshold,
            true,
        )?;
        let include_tool_context = should_include_tool_context(&msg.body, &context);
        let adaptive = self
            .agent_service
            .skills()
            .has_skill(agent.id, "adaptive_personality");
        let context_str = format_context_for_prompt(
            &context,
            &FormatOptions {
                max_chars: self.config.memory.context_char_limit,
                include_tool_outputs: include_tool_context,
                adaptive_personality: adaptive,
            },
        );

        let mut prefixed = String::new();
        if let Some(p) = &project {
            prefixed.push_str(&format!("[Project: {}]\n", p.name));
            let hits = self.memory.search_knowledge(
                agent.id,
                &msg.body,
                3,
                self.config.memory.similarity_threshold,
            )?;
            for (text, _similarity) in hits {
                prefixed.push_str(&format!("[Project knowledge] {}\n", text));
            }
        }
        if context_str != "[No previous context]" {
            prefixed.push_str(&context_str);
            prefixed.push_str("\n\n");
        }

        // Tool-output layers: the cheap index always, full entries only on
        // reference (or an explicit /inject).
        let buffer = self.memory.tool_outputs();
        buffer.increment_message_count(agent.id, sender_key);
        if let Some(light) = buffer.lightweight_context(agent.id, sender_key) {
            prefixed.push_str(&light);
            prefixed.push('\n');
        }
        if include_tool_context || msg.body.starts_with("/inject") {
            if let Some(full) = buffer.inject_full_context(agent.id, sender_key, &msg.body) {
                prefixed.push_str(&full);
                prefixed.push('\n');
            }
        }

        let display_name = sender_name.unwrap_or("Unknown");
        let final_text = format!(
            "{}[Current message from {}]: {}",
            prefixed, display_name, message_text
        );

        // 17-21. Agent service: prompt assembly, LLM, post-processing, tool
        // dispatch, contamination.
        let run_id = self
            .runs
            .start(&self.tenant, agent.id, trigger_type, sender_key, &msg.body)?;
        let contact_context = self
            .directory
            .format_contacts_for_context(&self.tenant)
            .ok();
        let reply = self
            .agent_service
            .process_message(
                &profile,
                &skill_ctx,
                &final_text,
                ProcessOptions {
                    contact_context,
                    original_query: Some(&msg.body),
                    message_id: Some(&msg.id),
                    agent_run_id: Some(run_id),
                    follow_up: Some(FollowUpTarget {
                        channel: msg.channel,
                        recipient: self.reply_recipient(msg).to_string(),
                    }),
                    skip_sentinel: true,
                },
            )
            .await;

        // 22. Memory write (assistant turn): tool outputs are summarized in
        // conversational memory and kept whole in the tool-output ring.
        if let (Some(tool_used), Some(tool_result)) = (&reply.tool_used, &reply.tool_result) {
            let execution_id = self.memory.tool_outputs().add(
                agent.id,
                sender_key,
                tool_used,
                tool_used.split(':').nth(1).unwrap_or(tool_used),
                tool_result,
            );
            let summary = summarize_tool_output(tool_used, tool_result, &execution_id);
            let metadata = EntryMetadata {
                is_tool_output: true,
                tool_used: Some(tool_used.clone()),
                execution_id: Some(execution_id),
                project_id,
                ..Default::default()
            };
            self.memory.add_message(
                agent.id,
                sender_key,
                agent.memory_isolation,
                &scope,
                "assistant",
                &summary,
                None,
                metadata,
            )?;
        } else if let Some(answer) = &reply.answer {
            self.memory.add_message(
                agent.id,
                sender_key,
                agent.memory_isolation,
                &scope,
                "assistant",
                answer,
                None,
                EntryMetadata {
                    project_id,
                    ..Default::default()
                },
            )?;
        }

        // Automatic fact extraction on the user's turn.
        if agent.auto_extract_facts {
            let model = switchboard_agent::service::LlmExtractionModel::new(
                Arc::clone(&self.llm),
                Arc::clone(&self.credentials),
                self.tenant.clone(),
                agent.model_provider.clone(),
                agent.model_name.clone(),
            );
            if let Err(e) = self
                .memory
                .maybe_extract_facts(
                    agent.id,
                    sender_key,
                    agent.memory_isolation,
                    &scope,
                    &model as &dyn ExtractionModel,
                    DetectionMode::Block,
                )
                .await
            {
                warn!(error = %e, "automatic fact extraction failed");
            }
        }

        // 23. Post-response hooks.
        if let Some(answer) = &reply.answer {
            self.agent_service
                .skills()
                .post_response_hooks(&skill_ctx, msg, answer)
                .await;
        }

        // 24. Persist the run.
        self.runs.finish(
            run_id,
            &RunCompletion {
                output: reply.answer.as_deref(),
                tokens_in: reply.tokens.prompt_units,
                tokens_out: reply.tokens.completion_units,
                skill_used: processed.skill_type.as_deref(),
                tool_used: reply.tool_used.as_deref(),
                execution_time_ms: reply.execution_time_ms,
                error: reply.error.as_deref(),
            },
        )?;

        // 25. Send: media first, then the templated text, then optional TTS.
        for path in &reply.media_paths {
            self.send_media(msg, path.clone()).await;
        }
        if let Some(answer) = &reply.answer {
            let formatted = profile.format_response(answer);
            self.send_text(msg, formatted).await;

            if let Some(tts_provider) = &agent.tts_provider {
                self.send_tts(msg, tts_provider, answer).await;
            }
        }

        Ok(())
    }

    fn skill_context(&self, agent: &Agent, sender_key: &str) -> SkillContext {
        SkillContext {
            tenant: self.tenant.clone(),
            agent_id: agent.id,
            sender_key: sender_key.to_string(),
            search: Arc::clone(&self.search),
            flights: Arc::clone(&self.flights),
            credentials: Arc::clone(&self.credentials),
            shared_pool: Arc::clone(&self.shared_pool),
            transcriber: self.transcriber.clone(),
        }
    }

    fn reply_recipient<'a>(&self, msg: &'a InboundMessage) -> &'a str {
        if msg.chat_id.is_empty() {
            &msg.sender
        } else {
            &msg.chat_id
        }
    }

    async fn send_text(&self, msg: &InboundMessage, text: String) {
        let delivered = self
            .sender
            .send(&OutboundMessage {
                channel: msg.channel,
                recipient: self.reply_recipient(msg).to_string(),
                text,
                media_path: None,
            })
            .await;
        if !delivered {
            // Sends are never retried; the failure lives in the logs and
            // the run record.
            error!(recipient = %self.reply_recipient(msg), "failed to send reply");
        }
    }

    async fn send_media(&self, msg: &InboundMessage, path: String) {
        let delivered = self
            .sender
            .send(&OutboundMessage {
                channel: msg.channel,
                recipient: self.reply_recipient(msg).to_string(),
                text: String::new(),
                media_path: Some(path.clone()),
            })
            .await;
        if delivered {
            // Temp media is deleted after a short delay so the transport
            // finishes its upload first.
            tokio::spawn(async move {
                tokio::time::sleep(std::time::Duration::from_secs(3)).await;
                let _ = tokio::fs::remove_file(&path).await;
            });
        }
    }

    async fn send_tts(&self, msg: &InboundMessage, provider_name: &str, text: &str) {
        let provider = match self.tts.get(provider_name, &self.credentials, &self.tenant) {
            Ok(p) => p,
            Err(e) => {
                warn!(provider = provider_name, error = %e, "TTS provider unavailable");
                return;
            }
        };
        let response = provider.execute(&TtsRequest::new(text)).await;
        let Some(audio) = response.payload else {
            warn!(provider = provider_name, "TTS synthesis failed");
            return;
        };

        let path = std::env::temp_dir().join(format!(
            "switchboard-tts-{}.{}",
            uuid::Uuid::new_v4(),
            audio.format
        ));
        if tokio::fs::write(&path, &audio.bytes).await.is_ok() {
            self.send_media(msg, path.to_string_lossy().to_string()).await;
        }
    }
}

/// Freshness heuristic for tool-output injection: explicit continuation
/// keywords, or a recent tool output plus a very short follow-up message.
fn should_include_tool_context(message_text: &str, context: &MemoryContext) -> bool {
    let lower = message_text.to_lowercase();
    if TOOL_CONTINUATION.iter().any(|k| lower.contains(k)) {
        return true;
    }

    let recent_tool_output = context
        .working
        .iter()
        .rev()
        .take(5)
        .any(|e| e.metadata.is_tool_output);
    recent_tool_output && message_text.split_whitespace().count() <= 5
}

/// Short summary stored in conversational memory in place of a full tool
/// output.
fn summarize_tool_output(tool_used: &str, output: &str, execution_id: &str) -> String {
    let first_line = output.lines().next().unwrap_or("");
    let mut cut = first_line.len().min(200);
    while cut > 0 && !first_line.is_char_boundary(cut) {
        cut -= 1;
    }
    format!(
        "[Tool {} completed, execution {}; {} chars of output] {}",
        tool_used,
        execution_id,
        output.len(),
        &first_line[..cut]
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_memory::types::MemoryEntry;

    fn entry(tool_output: bool) -> MemoryEntry {
        MemoryEntry {
            role: "assistant".into(),
            content: "x".into(),
            metadata: EntryMetadata {
                is_tool_output: tool_output,
                ..Default::default()
            },
            created_at: String::new(),
        }
    }

    #[test]
    fn continuation_keyword_triggers_injection() {
        let ctx = MemoryContext::default();
        assert!(should_include_tool_context("show me the full scan result", &ctx));
        assert!(!should_include_tool_context("bom dia, tudo bem?", &ctx));
    }

    #[test]
    fn short_followup_after_tool_run_triggers_injection() {
        let ctx = MemoryContext {
            working: vec![entry(false), entry(true)],
            ..Default::default()
        };
        assert!(should_include_tool_context("e então?", &ctx));
        assert!(!should_include_tool_context(
            "completely unrelated very long message about my weekend plans",
            &ctx
        ));
    }

    #[test]
    fn tool_summary_is_compact() {
        let long_output = format!("PORT STATE SERVICE\n{}", "x".repeat(10_000));
        let summary = summarize_tool_output("custom:nmap", &long_output, "abc123");
        assert!(summary.len() < 400);
        assert!(summary.contains("abc123"));
        assert!(summary.contains("PORT STATE SERVICE"));
    }
}
