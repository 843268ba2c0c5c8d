//! Per-turn thread processing.
//!
//! Turns on the same (agent, recipient) pair are serialized through a lock
//! map and the row is re-read at the start of every turn, so rapid
//! re-deliveries can neither interleave nor clobber history. Different
//! threads run fully in parallel.

use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use switchboard_agent::service::ProcessOptions;
use switchboard_agent::{AgentProfile, AgentService};
use switchboard_core::config::ThreadLimits;
use switchboard_skills::SkillContext;

use crate::ack;
use crate::db::ThreadStore;
use crate::error::Result;
use crate::goal;
use crate::menu;
use crate::reset;
use crate::stagnation;
use crate::types::{ConversationThread, ThreadStatus, ThreadTurn};

/// Terminal message sent when the stagnation detector closes a thread.
pub const STAGNATION_FAREWELL: &str =
    "Desculpe, parece que estamos tendo dificuldades para avançar. Encerrando esta conversa.";

/// What the router should do after a turn.
#[derive(Debug, Clone)]
pub struct ThreadReply {
    pub should_reply: bool,
    pub reply_content: Option<String>,
    pub status: ThreadStatus,
    pub goal_achieved: bool,
    pub current_turn: u32,
}

impl ThreadReply {
    fn silent(thread: &ConversationThread) -> Self {
        Self {
            should_reply: false,
            reply_content: None,
            status: thread.status,
            goal_achieved: thread.goal_achieved,
            current_turn: thread.current_turn,
        }
    }

    fn speak(thread: &ConversationThread, content: String) -> Self {
        Self {
            should_reply: true,
            reply_content: Some(content),
            status: thread.status,
            goal_achieved: thread.goal_achieved,
            current_turn: thread.current_turn,
        }
    }
}

pub struct ThreadEngine {
    store: Arc<ThreadStore>,
    limits: ThreadLimits,
    agent_service: Arc<AgentService>,
    /// (agent, recipient) → turn lock.
    locks: DashMap<(i64, String), Arc<Mutex<()>>>,
}

impl ThreadEngine {
    pub fn new(store: Arc<ThreadStore>, limits: ThreadLimits, agent_service: Arc<AgentService>) -> Self {
        Self {
            store,
            limits,
            agent_service,
            locks: DashMap::new(),
        }
    }

    pub fn store(&self) -> &Arc<ThreadStore> {
        &self.store
    }

    fn lock_for(&self, agent_id: i64, recipient: &str) -> Arc<Mutex<()>> {
        self.locks
            .entry((agent_id, recipient.to_string()))
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Process one inbound message on an active thread.
    pub async fn process_reply(
        &self,
        thread_id: i64,
        profile: &AgentProfile,
        skill_ctx: &SkillContext,
        message_content: &str,
        message_id: Option<&str>,
    ) -> Result<ThreadReply> {
        // Serialize by recipient, then refresh the row inside the lock.
        let initial = self.store.get(thread_id)?;
        let lock = self.lock_for(initial.agent_id, &initial.recipient);
        let _guard = lock.lock().await;

        let mut thread = self.store.get(thread_id)?;
        if thread.status.is_terminal() {
            return Ok(ThreadReply::silent(&thread));
        }
        let now = Utc::now();

        // ── Safety gates, in order ──────────────────────────────────────

        if thread.current_turn >= self.limits.absolute_max_turns {
            error!(thread_id, "absolute turn cap reached; force-closing");
            self.force_close(
                &mut thread,
                format!(
                    "FORCED CLOSURE: Exceeded {} turns (loop prevention)",
                    self.limits.absolute_max_turns
                ),
            )?;
            return Ok(ThreadReply::silent(&thread));
        }

        let recent = thread.turns_in_last_minute(now);
        if recent >= self.limits.max_messages_per_minute {
            error!(thread_id, recent, "thread rate cap exceeded; force-closing");
            self.force_close(
                &mut thread,
                format!("FORCED CLOSURE: Rate limit exceeded ({} msgs/min)", recent),
            )?;
            return Ok(ThreadReply::silent(&thread));
        }

        let age_minutes = (now - thread.created_at).num_minutes();
        if age_minutes > self.limits.max_duration_minutes {
            error!(thread_id, age_minutes, "thread duration cap exceeded; force-closing");
            self.force_close(
                &mut thread,
                format!(
                    "FORCED CLOSURE: Exceeded {} min duration",
                    self.limits.max_duration_minutes
                ),
            )?;
            return Ok(ThreadReply::silent(&thread));
        }

        let idle_minutes = (now - thread.last_activity_at).num_minutes();
        if idle_minutes >= self.limits.inactivity_timeout_minutes {
            warn!(thread_id, idle_minutes, "thread timed out from inactivity");
            thread.status = ThreadStatus::Timeout;
            thread.completed_at = Some(now);
            thread.goal_summary = Some(format!(
                "Thread timed out after {} minutes of inactivity",
                self.limits.inactivity_timeout_minutes
            ));
            self.store.save(&thread)?;
            return Ok(ThreadReply::silent(&thread));
        }

        if goal::external_session_ended(message_content, thread.current_turn) {
            info!(thread_id, "external bot closed the session");
            thread
                .history
                .push(ThreadTurn::now("user", message_content, message_id.map(String::from)));
            thread.current_turn += 1;
            thread.status = ThreadStatus::GoalAchieved;
            thread.goal_achieved = true;
            thread.goal_summary = Some("External bot closed the session".to_string());
            thread.completed_at = Some(now);
            self.store.save(&thread)?;
            return Ok(ThreadReply::silent(&thread));
        }

        // ── Dedup + append ───────────────────────────────────────────────

        if let Some(id) = message_id {
            if thread.contains_message_id(id) {
                info!(thread_id, message_id = id, "duplicate re-delivery dropped");
                return Ok(ThreadReply::silent(&thread));
            }
        }

        thread
            .history
            .push(ThreadTurn::now("user", message_content, message_id.map(String::from)));
        thread.current_turn += 1;
        thread.last_activity_at = now;
        self.store.save(&thread)?;

        if thread.current_turn >= thread.max_turns {
            info!(thread_id, "thread-level max turns reached");
            thread.status = ThreadStatus::Completed;
            thread.completed_at = Some(now);
            thread.goal_summary = Some(format!("Max turns ({}) reached", thread.max_turns));
            self.store.save(&thread)?;
            return Ok(ThreadReply::silent(&thread));
        }

        // ── Pre-LLM short-circuits, first match wins ────────────────────

        if thread.current_turn <= 2
            && thread.context.session_reset_attempts < 2
            && reset::should_attempt_session_reset(message_content)
        {
            let attempt = thread.context.session_reset_attempts;
            let reply = reset::reset_message_for_attempt(attempt);
            info!(thread_id, attempt, reply, "mid-session detected; resetting external menu");
            thread.context.session_reset_attempts += 1;
            self.append_agent_turn(&mut thread, reply)?;
            return Ok(ThreadReply::speak(&thread, reply.to_string()));
        }

        let signature = menu::menu_signature(message_content);
        let last_selection = match (&signature, &thread.context.last_menu_signature) {
            (Some(sig), Some(prev)) if sig == prev => {
                thread.context.last_menu_selection.as_deref()
            }
            _ => None,
        };
        if let Some(selection) =
            menu::choose_interactive_option(message_content, &thread.objective, last_selection)
        {
            info!(thread_id, selection = %selection, "interactive menu; selecting option");
            if let Some(sig) = signature {
                thread.context.last_menu_signature = Some(sig);
                thread.context.last_menu_selection = Some(selection.clone());
            }
            self.append_agent_turn(&mut thread, &selection)?;
            return Ok(ThreadReply::speak(&thread, selection));
        }

        if ack::should_acknowledge_status(message_content) {
            info!(thread_id, "status update received; acknowledging");
            self.append_agent_turn(&mut thread, ack::ACKNOWLEDGMENT)?;
            // The data arrived; goal detection still runs on this pair.
            if let Some(reason) =
                goal::detect_goal(message_content, ack::ACKNOWLEDGMENT, thread.current_turn)
            {
                self.mark_goal(&mut thread, reason)?;
            }
            return Ok(ThreadReply::speak(&thread, ack::ACKNOWLEDGMENT.to_string()));
        }

        // ── LLM turn ─────────────────────────────────────────────────────

        let mut thread_profile = profile.clone();
        thread_profile.system_prompt = format!(
            "{}\n{}",
            objective_instruction(&thread),
            profile.system_prompt
        );

        let formatted = format_thread_message(&thread, message_content);
        let reply = self
            .agent_service
            .process_message(
                &thread_profile,
                skill_ctx,
                &formatted,
                ProcessOptions {
                    original_query: Some(message_content),
                    skip_sentinel: true,
                    ..Default::default()
                },
            )
            .await;

        if let Some(pattern) = reply.contamination {
            error!(thread_id, pattern = %pattern, "contamination detected; force-closing thread");
            thread.status = ThreadStatus::Completed;
            thread.goal_achieved = false;
            thread.goal_summary = Some(format!("CONTAMINATION DETECTED: {}", pattern));
            thread.completed_at = Some(Utc::now());
            self.store.save(&thread)?;
            return Ok(ThreadReply::silent(&thread));
        }

        let answer = match reply.answer {
            Some(a) if !a.is_empty() => a,
            _ => {
                warn!(thread_id, "no reply generated for thread turn");
                return Ok(ThreadReply::silent(&thread));
            }
        };

        // Belt and braces: strip identity prefixes even from clean replies.
        let detector = self
            .agent_service
            .detectors()
            .for_agent(profile.id, &profile.contamination_patterns);
        let cleaned = detector.clean_response(&answer);

        self.append_agent_turn(&mut thread, &cleaned)?;

        if let Some(reason) = goal::detect_goal(message_content, &cleaned, thread.current_turn) {
            self.mark_goal(&mut thread, reason)?;
            return Ok(ThreadReply::speak(&thread, cleaned));
        }

        // ── Stagnation detector ──────────────────────────────────────────

        if thread.current_turn >= 3 && stagnation::detect_stagnation(&thread.history) {
            warn!(thread_id, "stagnation detected; closing thread");
            thread.status = ThreadStatus::Completed;
            thread.goal_achieved = false;
            thread.goal_summary =
                Some("Conversation stopped due to lack of progress (bot-to-bot loop detected)".to_string());
            thread.completed_at = Some(Utc::now());
            self.store.save(&thread)?;
            return Ok(ThreadReply::speak(&thread, STAGNATION_FAREWELL.to_string()));
        }

        Ok(ThreadReply::speak(&thread, cleaned))
    }

    /// Cooldown check: `(block?, seconds remaining)` for a sender after a
    /// recent closure. Force-closed threads extend the window.
    pub fn should_block_post_completion(
        &self,
        tenant: &switchboard_core::types::TenantId,
        sender: &str,
    ) -> bool {
        let window = self.limits.loop_closure_block_seconds.max(self.limits.post_completion_block_seconds);
        match crate::lookup::seconds_since_completion(&self.store, tenant, sender, window) {
            None => false,
            Some((seconds_ago, forced)) => {
                let limit = if forced {
                    self.limits.loop_closure_block_seconds
                } else {
                    self.limits.post_completion_block_seconds
                };
                if seconds_ago < limit {
                    warn!(
                        sender,
                        seconds_ago, limit, forced, "post-completion cooldown active; dropping message"
                    );
                    true
                } else {
                    false
                }
            }
        }
    }

    fn append_agent_turn(&self, thread: &mut ConversationThread, content: &str) -> Result<()> {
        thread.history.push(ThreadTurn::now("agent", content, None));
        thread.last_activity_at = Utc::now();
        self.store.save(thread)
    }

    fn mark_goal(&self, thread: &mut ConversationThread, reason: goal::GoalReason) -> Result<()> {
        info!(thread_id = thread.id, reason = ?reason, "thread goal achieved");
        thread.status = ThreadStatus::GoalAchieved;
        thread.goal_achieved = true;
        thread.goal_summary = Some(reason.summary().to_string());
        thread.completed_at = Some(Utc::now());
        self.store.save(thread)
    }

    fn force_close(&self, thread: &mut ConversationThread, summary: String) -> Result<()> {
        thread.status = ThreadStatus::Completed;
        thread.goal_achieved = false;
        thread.goal_summary = Some(summary);
        thread.completed_at = Some(Utc::now());
        self.store.save(thread)
    }
}

/// The objective block prepended to the agent's system prompt for thread
/// turns: identity guardrails, anti-echo discipline, selection rules, the
/// objective, and the turn counter.
fn objective_instruction(thread: &ConversationThread) -> String {
    let mid_conversation = thread
        .history
        .first()
        .map(|t| reset::should_attempt_session_reset(&t.content))
        .unwrap_or(false);
    let mid_block = if mid_conversation {
        "\n⚠️ MID-CONVERSATION DETECTED: the external bot has an active session from a previous interaction. First reset to the main menu (\"menu\" or \"0\"), then pursue the objective.\n"
    } else {
        ""
    };

    format!(
        "---\n\
        CRITICAL IDENTITY RULES:\n\
        - You are an AI assistant acting ON BEHALF OF a customer, contacting another service's bot.\n\
        - You are NOT a customer service representative and NOT a bot identifier like \"@movl\".\n\
        - NEVER prefix your messages with identifiers such as \"@name:\".\n\
        - NEVER offer menus, ratings, or ask \"how can I help you?\" — you ARE the customer.\n\
        \n\
        RESPONSE DISCIPLINE:\n\
        - When the external bot provides the information you asked for, reply with a BRIEF acknowledgment (\"Perfeito, obrigado!\", \"Got it, thanks!\").\n\
        - NEVER echo, summarize, or restate the information back; it is captured automatically.\n\
        \n\
        INTERACTIVE SELECTION:\n\
        - For numbered menus, reply ONLY with the number. For option lists, reply ONLY with the exact option text.\n\
        - If your target option is missing, choose \"Outro\"/\"Other\"/\"None of the above\".\n\
        - NEVER explain your selection.\n\
        \n\
        SERVICE EVALUATION:\n\
        - If asked to rate the service, pick the most positive text option.\n\
        {mid}\n\
        CONVERSATION OBJECTIVE: {objective}\n\
        \n\
        Stay focused on this objective. Respond concisely and provide ONLY the information asked for.\n\
        Current turn: {turn} of {max}\n\
        ---",
        mid = mid_block,
        objective = thread.objective,
        turn = thread.current_turn,
        max = thread.max_turns,
    )
}

/// Last ≤10 history turns formatted as `User: … / Agent: …`, then the new
/// message.
fn format_thread_message(thread: &ConversationThread, message_content: &str) -> String {
    let mut out = String::from("Previous conversation:\n");
    let history = &thread.history;
    // The inbound turn was already appended; show everything before it.
    let shown = history.len().saturating_sub(1);
    let start = shown.saturating_sub(10);
    for turn in &history[start..shown] {
        let role = if turn.role == "agent" { "Agent" } else { "User" };
        out.push_str(&format!("{}: {}\n", role, turn.content));
    }
    out.push_str(&format!("\nUser: {}", message_content));
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::ThreadContext;

    fn thread_with(history: Vec<ThreadTurn>, turn: u32) -> ConversationThread {
        ConversationThread {
            id: 1,
            tenant_id: "default".to_string(),
            agent_id: 1,
            recipient: "r".to_string(),
            objective: "obter status rastreio 1234567890123".to_string(),
            current_turn: turn,
            max_turns: 10,
            status: ThreadStatus::Active,
            history,
            goal_achieved: false,
            goal_summary: None,
            persona: None,
            context: ThreadContext::default(),
            created_at: Utc::now(),
            last_activity_at: Utc::now(),
            completed_at: None,
        }
    }

    #[test]
    fn objective_block_carries_turn_counter_and_objective() {
        let t = thread_with(vec![], 4);
        let block = objective_instruction(&t);
        assert!(block.contains("CONVERSATION OBJECTIVE: obter status rastreio 1234567890123"));
        assert!(block.contains("Current turn: 4 of 10"));
        assert!(!block.contains("MID-CONVERSATION"));
    }

    #[test]
    fn mid_conversation_block_appears_when_first_turn_is_a_reset_prompt() {
        let t = thread_with(
            vec![ThreadTurn::now("user", "Há mais algo que eu possa fazer?", None)],
            1,
        );
        assert!(objective_instruction(&t).contains("MID-CONVERSATION DETECTED"));
    }

    #[test]
    fn formatted_message_shows_window_before_current_turn() {
        let mut history = Vec::new();
        for i in 0..14 {
            history.push(ThreadTurn::now("user", &format!("u{}", i), None));
            history.push(ThreadTurn::now("agent", &format!("a{}", i), None));
        }
        history.push(ThreadTurn::now("user", "current", None));
        let t = thread_with(history, 15);

        let formatted = format_thread_message(&t, "current");
        assert!(formatted.ends_with("User: current"));
        // Only the last 10 prior turns appear.
        assert!(!formatted.contains("u3\n"));
        assert!(formatted.contains("a13"));
    }
}
