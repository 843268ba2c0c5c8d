//! Slash commands, intercepted before the AI pipeline.
//!
//! `/invoke <agent>`, `/project enter <name>`, `/project exit`,
//! `/memory clear`, `/knowledge add|search`, `/commands`, `/help`.
//! `/inject` is deliberately NOT handled here: it flows through to normal
//! processing where it forces full tool-output injection.

use tracing::info;

use switchboard_contacts::sessions::SessionStore;
use switchboard_core::types::{IsolationMode, TenantId};
use switchboard_memory::manager::KeyScope;
use switchboard_memory::MemoryManager;

use crate::agents::AgentStore;
use crate::error::Result;
use crate::projects::ProjectStore;

/// What a handled command produced.
#[derive(Debug, Clone)]
pub struct SlashOutcome {
    pub reply: String,
    /// Store the reply in the tool-output buffer so follow-up chat can
    /// reference it.
    pub store_in_tool_buffer: bool,
}

pub struct SlashContext<'a> {
    pub tenant: &'a TenantId,
    pub agents: &'a AgentStore,
    pub sessions: &'a SessionStore,
    pub projects: &'a ProjectStore,
    pub memory: &'a MemoryManager,
    /// The agent that would currently serve this sender, for /memory clear.
    pub current_agent: Option<(i64, IsolationMode)>,
}

const HELP_TEXT: &str = "Available commands:\n\
 - /invoke <agent> — route your messages to a specific agent until cleared\n\
 - /invoke clear — clear the saved agent preference\n\
 - /project enter <name> — scope memory to a project\n\
 - /project exit — leave project mode\n\
 - /memory clear — clear your conversation memory with the current agent\n\
 - /knowledge add <name> <text> — store a document in the agent's knowledge base\n\
 - /knowledge search <query> — search the agent's knowledge base\n\
 - /inject [id] — include the full output of a recent tool run\n\
 - /commands, /help — this text";

/// Handle one slash command. `None` means "not a recognized command" and
/// the message continues into normal processing.
pub async fn handle_slash_command(
    ctx: &SlashContext<'_>,
    sender_key: &str,
    body: &str,
) -> Result<Option<SlashOutcome>> {
    let trimmed = body.trim();
    let lower = trimmed.to_lowercase();

    if lower == "/help" || lower == "/commands" {
        return Ok(Some(SlashOutcome {
            reply: HELP_TEXT.to_string(),
            store_in_tool_buffer: false,
        }));
    }

    if let Some(arg) = strip_command(trimmed, "/invoke") {
        if arg.eq_ignore_ascii_case("clear") || arg.is_empty() {
            let cleared = ctx.sessions.clear(ctx.tenant, sender_key)?;
            return Ok(Some(SlashOutcome {
                reply: if cleared {
                    "Agent preference cleared.".to_string()
                } else {
                    "No agent preference was set.".to_string()
                },
                store_in_tool_buffer: false,
            }));
        }
        return Ok(Some(match ctx.agents.find_by_name(ctx.tenant, arg)? {
            Some(agent) => {
                ctx.sessions.set(ctx.tenant, sender_key, agent.id)?;
                info!(agent = %agent.name, sender = sender_key, "agent invoked via slash command");
                SlashOutcome {
                    reply: format!(
                        "Now talking to @{}. Use /invoke clear to go back to automatic routing.",
                        agent.name
                    ),
                    store_in_tool_buffer: false,
                }
            }
            None => SlashOutcome {
                reply: format!("Unknown agent: {}", arg),
                store_in_tool_buffer: false,
            },
        }));
    }

    if let Some(arg) = strip_command(trimmed, "/project") {
        let mut parts = arg.splitn(2, char::is_whitespace);
        match (parts.next().unwrap_or(""), parts.next().map(str::trim)) {
            ("enter", Some(name)) if !name.is_empty() => {
                let project = ctx.projects.get_or_create(ctx.tenant, name)?;
                ctx.projects.enter(ctx.tenant, sender_key, project.id)?;
                return Ok(Some(SlashOutcome {
                    reply: format!(
                        "Entered project \"{}\". Conversation memory is now project-scoped.",
                        project.name
                    ),
                    store_in_tool_buffer: false,
                }));
            }
            ("exit", _) => {
                let left = ctx.projects.exit(ctx.tenant, sender_key)?;
                return Ok(Some(SlashOutcome {
                    reply: if left {
                        "Left project mode.".to_string()
                    } else {
                        "You are not in a project.".to_string()
                    },
                    store_in_tool_buffer: false,
                }));
            }
            _ => {
                return Ok(Some(SlashOutcome {
                    reply: "Usage: /project enter <name> | /project exit".to_string(),
                    store_in_tool_buffer: false,
                }))
            }
        }
    }

    if let Some(arg) = strip_command(trimmed, "/knowledge") {
        let Some((agent_id, _)) = ctx.current_agent else {
            return Ok(Some(SlashOutcome {
                reply: "No agent is currently routed for you.".to_string(),
                store_in_tool_buffer: false,
            }));
        };
        let mut parts = arg.splitn(2, char::is_whitespace);
        match (parts.next().unwrap_or(""), parts.next().map(str::trim)) {
            ("add", Some(rest)) if !rest.is_empty() => {
                let mut pieces = rest.splitn(2, char::is_whitespace);
                let name = pieces.next().unwrap_or("").trim();
                let text = pieces.next().map(str::trim).unwrap_or("");
                if name.is_empty() || text.is_empty() {
                    return Ok(Some(SlashOutcome {
                        reply: "Usage: /knowledge add <name> <text>".to_string(),
                        store_in_tool_buffer: false,
                    }));
                }
                let chunks = ctx.memory.ingest_document(agent_id, name, text).await?;
                return Ok(Some(SlashOutcome {
                    reply: format!(
                        "Stored \"{}\" in the knowledge base ({} chunk{}).",
                        name,
                        chunks,
                        if chunks == 1 { "" } else { "s" }
                    ),
                    store_in_tool_buffer: false,
                }));
            }
            ("search", Some(query)) if !query.is_empty() => {
                let hits = ctx.memory.search_knowledge(agent_id, query, 3, 0.1)?;
                let reply = if hits.is_empty() {
                    format!("No knowledge found for \"{}\".", query)
                } else {
                    let mut out = format!("Knowledge matches for \"{}\":\n", query);
                    for (text, similarity) in &hits {
                        out.push_str(&format!(
                            "- ({}%) {}\n",
                            (similarity * 100.0).round() as u32,
                            text
                        ));
                    }
                    out
                };
                return Ok(Some(SlashOutcome {
                    reply,
                    // Searches are recallable later ("explain the second hit").
                    store_in_tool_buffer: true,
                }));
            }
            _ => {
                return Ok(Some(SlashOutcome {
                    reply: "Usage: /knowledge add <name> <text> | /knowledge search <query>"
                        .to_string(),
                    store_in_tool_buffer: false,
                }))
            }
        }
    }

    if lower == "/memory clear" {
        let Some((agent_id, isolation)) = ctx.current_agent else {
            return Ok(Some(SlashOutcome {
                reply: "No agent is currently routed for you.".to_string(),
                store_in_tool_buffer: false,
            }));
        };
        let project_id = ctx.projects.current(ctx.tenant, sender_key)?.map(|p| p.id);
        ctx.memory.clear_agent_memory(
            agent_id,
            sender_key,
            isolation,
            &KeyScope {
                project_id,
                ..Default::default()
            },
        )?;
        return Ok(Some(SlashOutcome {
            reply: "Memory cleared. Starting fresh.".to_string(),
            store_in_tool_buffer: true,
        }));
    }

    Ok(None)
}

fn strip_command<'a>(body: &'a str, command: &str) -> Option<&'a str> {
    let rest = body.strip_prefix(command)?;
    if rest.is_empty() {
        Some("")
    } else if rest.starts_with(char::is_whitespace) {
        Some(rest.trim())
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use switchboard_memory::agent_memory::AgentMemoryConfig;
    use switchboard_memory::vector::{HashEmbedder, SqliteVectorStore};

    struct Fixture {
        agents: AgentStore,
        sessions: SessionStore,
        projects: ProjectStore,
        memory: MemoryManager,
        tenant: TenantId,
    }

    impl Fixture {
        fn new() -> Self {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            crate::agents::init_db(&conn).unwrap();
            crate::projects::init_db(&conn).unwrap();
            switchboard_contacts::db::init_db(&conn).unwrap();
            switchboard_memory::db::init_db(&conn).unwrap();
            let db = Arc::new(Mutex::new(conn));
            Self {
                agents: AgentStore::new(Arc::clone(&db)),
                sessions: SessionStore::new(Arc::clone(&db)),
                projects: ProjectStore::new(Arc::clone(&db)),
                memory: MemoryManager::new(
                    Arc::clone(&db),
                    Arc::new(SqliteVectorStore::new(Arc::clone(&db))),
                    Arc::new(HashEmbedder),
                    AgentMemoryConfig::default(),
                ),
                tenant: TenantId::default_tenant(),
            }
        }

        fn ctx(&self) -> SlashContext<'_> {
            SlashContext {
                tenant: &self.tenant,
                agents: &self.agents,
                sessions: &self.sessions,
                projects: &self.projects,
                memory: &self.memory,
                current_agent: Some((1, IsolationMode::Isolated)),
            }
        }
    }

    #[tokio::test]
    async fn invoke_sets_and_clears_preference() {
        let f = Fixture::new();
        let id = f
            .agents
            .insert(&crate::agents::sample_agent("default", "scheduler"))
            .unwrap();

        let outcome = handle_slash_command(&f.ctx(), "u1", "/invoke scheduler")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.reply.contains("@scheduler"));
        assert_eq!(f.sessions.get(&f.tenant, "u1").unwrap(), Some(id));

        handle_slash_command(&f.ctx(), "u1", "/invoke clear")
            .await
            .unwrap()
            .unwrap();
        assert!(f.sessions.get(&f.tenant, "u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn invoke_unknown_agent_reports_it() {
        let f = Fixture::new();
        let outcome = handle_slash_command(&f.ctx(), "u1", "/invoke ghost")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.reply.contains("Unknown agent"));
    }

    #[tokio::test]
    async fn project_enter_and_exit() {
        let f = Fixture::new();
        handle_slash_command(&f.ctx(), "u1", "/project enter apollo")
            .await
            .unwrap()
            .unwrap();
        assert!(f.projects.current(&f.tenant, "u1").unwrap().is_some());

        handle_slash_command(&f.ctx(), "u1", "/project exit")
            .await
            .unwrap()
            .unwrap();
        assert!(f.projects.current(&f.tenant, "u1").unwrap().is_none());
    }

    #[tokio::test]
    async fn knowledge_add_and_search_round_trip() {
        let f = Fixture::new();
        let outcome = handle_slash_command(
            &f.ctx(),
            "u1",
            "/knowledge add onboarding.md novos clientes recebem o guia de boas-vindas por email",
        )
        .await
        .unwrap()
        .unwrap();
        assert!(outcome.reply.contains("onboarding.md"));

        let outcome = handle_slash_command(&f.ctx(), "u1", "/knowledge search guia de boas-vindas")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.reply.contains("boas-vindas"));
        assert!(outcome.store_in_tool_buffer);

        let outcome = handle_slash_command(&f.ctx(), "u1", "/knowledge add onlyname")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.reply.contains("Usage"));
    }

    #[tokio::test]
    async fn inject_and_plain_text_fall_through() {
        let f = Fixture::new();
        assert!(handle_slash_command(&f.ctx(), "u1", "/inject abc123")
            .await
            .unwrap()
            .is_none());
        assert!(handle_slash_command(&f.ctx(), "u1", "hello")
            .await
            .unwrap()
            .is_none());
        // Prefix overlap is not a match.
        assert!(handle_slash_command(&f.ctx(), "u1", "/invokers unite")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn help_lists_commands() {
        let f = Fixture::new();
        let outcome = handle_slash_command(&f.ctx(), "u1", "/help")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.reply.contains("/invoke"));
        assert!(outcome.reply.contains("/knowledge"));
        assert!(outcome.reply.contains("/project"));
    }
}
