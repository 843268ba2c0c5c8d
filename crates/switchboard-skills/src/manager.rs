//! Skill manager: registry + per-agent enablement + the pre-processing
//! pipeline.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::{info, warn};

use switchboard_core::message::InboundMessage;
use switchboard_providers::llm::ToolSchema;

use crate::error::Result;
use crate::skill::{Skill, SkillContext, SkillToolResult};
use crate::skills::adaptive_personality::AdaptivePersonalitySkill;
use crate::skills::flight_search::FlightSearchSkill;
use crate::skills::knowledge_sharing::KnowledgeSharingSkill;
use crate::skills::shell::ShellSkill;
use crate::skills::transcription::TranscriptionSkill;
use crate::skills::web_search::WebSearchSkill;

/// Result of running the pre-processing pipeline over one message.
#[derive(Debug, Clone)]
pub struct ProcessedMessage {
    pub text: String,
    pub skip_ai: bool,
    pub output: Option<String>,
    pub skill_type: Option<String>,
    pub media_paths: Vec<String>,
}

pub struct SkillManager {
    db: Arc<Mutex<Connection>>,
    registry: HashMap<&'static str, Arc<dyn Skill>>,
}

impl SkillManager {
    /// Registry with every built-in skill installed.
    pub fn with_builtins(db: Arc<Mutex<Connection>>) -> Self {
        let mut manager = Self {
            db,
            registry: HashMap::new(),
        };
        manager.register(Arc::new(TranscriptionSkill::new()));
        manager.register(Arc::new(ShellSkill));
        manager.register(Arc::new(WebSearchSkill::default()));
        manager.register(Arc::new(FlightSearchSkill::default()));
        manager.register(Arc::new(KnowledgeSharingSkill));
        manager.register(Arc::new(AdaptivePersonalitySkill));
        manager
    }

    pub fn register(&mut self, skill: Arc<dyn Skill>) {
        self.registry.insert(skill.skill_type(), skill);
    }

    /// Skill types enabled for this agent, in registry-stable order.
    pub fn enabled_skills(&self, agent_id: i64) -> Result<Vec<Arc<dyn Skill>>> {
        let types: Vec<String> = {
            let conn = self.db.lock().unwrap();
            let mut stmt = conn.prepare(
                "SELECT skill_type FROM agent_skills
                 WHERE agent_id = ?1 AND is_enabled = 1
                 ORDER BY skill_type",
            )?;
            let rows = stmt.query_map(rusqlite::params![agent_id], |row| row.get(0))?;
            rows.filter_map(|r| r.ok()).collect()
        };

        Ok(types
            .iter()
            .filter_map(|t| {
                let skill = self.registry.get(t.as_str()).cloned();
                if skill.is_none() {
                    warn!(skill_type = %t, agent_id, "enabled skill has no implementation");
                }
                skill
            })
            .collect())
    }

    pub fn has_skill(&self, agent_id: i64, skill_type: &str) -> bool {
        let conn = self.db.lock().unwrap();
        conn.query_row(
            "SELECT 1 FROM agent_skills
             WHERE agent_id = ?1 AND skill_type = ?2 AND is_enabled = 1",
            rusqlite::params![agent_id, skill_type],
            |_| Ok(()),
        )
        .is_ok()
    }

    pub fn enable_skill(&self, agent_id: i64, skill_type: &str) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO agent_skills
             (agent_id, skill_type, is_enabled, config, created_at)
             VALUES (?1, ?2, 1, '{}', ?3)",
            rusqlite::params![agent_id, skill_type, now],
        )?;
        Ok(())
    }

    /// Run each enabled skill's pre-processing hook in order. The first
    /// skill that claims the message (`skip_ai`) wins; text replacements
    /// chain.
    pub async fn process_message_with_skills(
        &self,
        ctx: &SkillContext,
        msg: &InboundMessage,
        text: &str,
    ) -> ProcessedMessage {
        let skills = match self.enabled_skills(ctx.agent_id) {
            Ok(s) => s,
            Err(e) => {
                warn!(agent_id = ctx.agent_id, error = %e, "failed to load skills");
                return ProcessedMessage {
                    text: text.to_string(),
                    skip_ai: false,
                    output: None,
                    skill_type: None,
                    media_paths: Vec::new(),
                };
            }
        };

        let mut current_text = text.to_string();
        let mut output: Option<String> = None;
        let mut skill_type: Option<String> = None;
        let mut media_paths: Vec<String> = Vec::new();

        for skill in &skills {
            match skill.pre_process(ctx, msg, &current_text).await {
                Ok(Some(outcome)) => {
                    if let Some(replaced) = outcome.replaced_text {
                        info!(skill = skill.skill_type(), "skill replaced message text");
                        current_text = replaced;
                    }
                    media_paths.extend(outcome.media_paths);
                    if outcome.output.is_some() {
                        output = outcome.output;
                        skill_type = Some(skill.skill_type().to_string());
                    }
                    if outcome.skip_ai {
                        return ProcessedMessage {
                            text: current_text,
                            skip_ai: true,
                            output,
                            skill_type,
                            media_paths,
                        };
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    warn!(skill = skill.skill_type(), error = %e, "skill pre-processing failed");
                }
            }
        }

        ProcessedMessage {
            text: current_text,
            skip_ai: false,
            output,
            skill_type,
            media_paths,
        }
    }

    /// Tool schemas across the agent's enabled skills, plus their prompt
    /// blocks.
    pub fn skill_tools(&self, agent_id: i64) -> Result<(Vec<ToolSchema>, Vec<String>)> {
        let mut schemas = Vec::new();
        let mut prompts = Vec::new();
        for skill in self.enabled_skills(agent_id)? {
            schemas.extend(skill.tool_definitions());
            if let Some(prompt) = skill.tool_prompt() {
                prompts.push(prompt);
            }
        }
        Ok((schemas, prompts))
    }

    /// Find the enabled skill that registered `tool_name`. The shell tool
    /// answers to both its alias and its registered name.
    pub fn find_skill_by_tool_name(
        &self,
        agent_id: i64,
        tool_name: &str,
    ) -> Option<Arc<dyn Skill>> {
        let effective = if tool_name == "shell" {
            "run_shell_command"
        } else {
            tool_name
        };
        self.enabled_skills(agent_id)
            .ok()?
            .into_iter()
            .find(|s| s.handles_tool(effective))
    }

    pub async fn execute_tool_call(
        &self,
        ctx: &SkillContext,
        tool_name: &str,
        arguments: &serde_json::Value,
    ) -> Result<SkillToolResult> {
        let effective = if tool_name == "shell" {
            "run_shell_command"
        } else {
            tool_name
        };
        let skill = self
            .find_skill_by_tool_name(ctx.agent_id, effective)
            .ok_or_else(|| crate::error::SkillError::NoToolSupport(tool_name.to_string()))?;
        skill.execute_tool(ctx, effective, arguments).await
    }

    /// Fire every enabled skill's post-response hook; failures are logged
    /// and do not affect the already-sent reply.
    pub async fn post_response_hooks(&self, ctx: &SkillContext, msg: &InboundMessage, reply: &str) {
        let skills = match self.enabled_skills(ctx.agent_id) {
            Ok(s) => s,
            Err(_) => return,
        };
        for skill in &skills {
            if let Err(e) = skill.post_response(ctx, msg, reply).await {
                warn!(skill = skill.skill_type(), error = %e, "post-response hook failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::types::{Channel, TenantId};
    use switchboard_memory::shared::SharedKnowledgePool;
    use switchboard_providers::credentials::CredentialStore;

    fn setup() -> (SkillManager, SkillContext) {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        switchboard_memory::db::init_db(&conn).unwrap();
        switchboard_providers::credentials::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let manager = SkillManager::with_builtins(Arc::clone(&db));
        let ctx = SkillContext {
            tenant: TenantId::default_tenant(),
            agent_id: 1,
            sender_key: "u".to_string(),
            search: Arc::new(switchboard_providers::builtin_search_registry()),
            flights: Arc::new(switchboard_providers::builtin_flight_registry()),
            credentials: Arc::new(CredentialStore::new(Arc::clone(&db), None)),
            shared_pool: Arc::new(SharedKnowledgePool::new(db)),
            transcriber: None,
        };
        (manager, ctx)
    }

    fn msg(body: &str) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            sender: "u".into(),
            sender_name: None,
            body: body.into(),
            chat_id: "u".into(),
            chat_name: None,
            is_group: false,
            timestamp: 0,
            media_type: None,
            media_url: None,
            media_path: None,
            channel: Channel::Whatsapp,
            telegram_id: None,
        }
    }

    #[tokio::test]
    async fn pipeline_passes_through_without_skills() {
        let (manager, ctx) = setup();
        let processed = manager
            .process_message_with_skills(&ctx, &msg("hello"), "hello")
            .await;
        assert_eq!(processed.text, "hello");
        assert!(!processed.skip_ai);
    }

    #[test]
    fn enablement_is_per_agent() {
        let (manager, _ctx) = setup();
        manager.enable_skill(1, "shell").unwrap();
        assert!(manager.has_skill(1, "shell"));
        assert!(!manager.has_skill(2, "shell"));
    }

    #[test]
    fn skill_tools_follow_enablement() {
        let (manager, _ctx) = setup();
        let (schemas, _) = manager.skill_tools(1).unwrap();
        assert!(schemas.is_empty());

        manager.enable_skill(1, "shell").unwrap();
        manager.enable_skill(1, "web_search").unwrap();
        let (schemas, prompts) = manager.skill_tools(1).unwrap();
        let names: Vec<_> = schemas.iter().map(|s| s.name.as_str()).collect();
        assert!(names.contains(&"run_shell_command"));
        assert!(names.contains(&"web_search"));
        assert!(!prompts.is_empty());
    }

    #[test]
    fn shell_alias_resolves() {
        let (manager, _ctx) = setup();
        manager.enable_skill(1, "shell").unwrap();
        assert!(manager.find_skill_by_tool_name(1, "shell").is_some());
        assert!(manager
            .find_skill_by_tool_name(1, "run_shell_command")
            .is_some());
        assert!(manager.find_skill_by_tool_name(1, "nope").is_none());
    }
}
