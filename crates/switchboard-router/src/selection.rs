//! Agent selection: five stages, first match wins.
//!
//! 1. Saved `/invoke` preference (cleared when it stops being valid).
//! 2. Explicit `@name` mention (groups and DMs).
//! 3. Keyword match (case-insensitive substring).
//! 4. Contact→agent mapping (DMs only).
//! 5. Default agent (DMs only).
//!
//! Group messages with no mention or keyword select nothing.

use tracing::{info, warn};

use switchboard_contacts::sessions::SessionStore;
use switchboard_contacts::ContactDirectory;
use switchboard_core::message::InboundMessage;
use switchboard_core::types::{Channel, TenantId};

use crate::agents::{Agent, AgentStore};
use crate::error::Result;

pub struct SelectionContext<'a> {
    pub agents: &'a AgentStore,
    pub directory: &'a ContactDirectory,
    pub sessions: &'a SessionStore,
    pub tenant: &'a TenantId,
    pub channel: Channel,
    pub instance_id: Option<i64>,
}

pub fn select_agent(ctx: &SelectionContext<'_>, msg: &InboundMessage) -> Result<Option<Agent>> {
    let sender_key = msg.sender_key();
    let body_lower = msg.body.to_lowercase();

    // Stage 1: sticky preference set by /invoke.
    if let Some(agent_id) = ctx.sessions.get(ctx.tenant, sender_key)? {
        match ctx.agents.get(ctx.tenant, agent_id) {
            Ok(agent)
                if agent.is_active && agent.is_valid_for_channel(ctx.channel, ctx.instance_id) =>
            {
                info!(agent_id, sender = sender_key, "using saved agent preference");
                return Ok(Some(agent));
            }
            _ => {
                warn!(agent_id, sender = sender_key, "clearing invalid agent preference");
                ctx.sessions.clear(ctx.tenant, sender_key)?;
            }
        }
    }

    // Stage 2: explicit @mention via the agent's contact.
    if let Some(contact) = ctx.directory.mentioned_agent(ctx.tenant, &msg.body)? {
        if let Some(agent) = ctx.agents.agent_by_contact(ctx.tenant, contact.id)? {
            if agent.is_valid_for_channel(ctx.channel, ctx.instance_id) {
                info!(agent_id = agent.id, mention = %contact.friendly_name, "agent mentioned");
                return Ok(Some(agent));
            }
        }
    }

    // Stage 3: keyword triggers.
    for agent in ctx.agents.active_agents(ctx.tenant)? {
        if !agent.is_valid_for_channel(ctx.channel, ctx.instance_id) {
            continue;
        }
        if let Some(keyword) = agent
            .keywords
            .iter()
            .find(|k| body_lower.contains(&k.to_lowercase()))
        {
            info!(agent_id = agent.id, keyword = %keyword, "keyword matched");
            return Ok(Some(agent));
        }
    }

    // Stages 4 and 5 are DM-only; a group message with no explicit
    // invocation is nobody's business.
    if msg.is_group {
        info!("group message with no mention or keyword; not routing");
        return Ok(None);
    }

    // Stage 4: contact→agent mapping.
    if let Some(contact) = ctx.directory.resolve_sender(ctx.tenant, &msg.sender)? {
        if let Some(agent_id) = ctx.directory.agent_for_contact(contact.id)? {
            if let Ok(agent) = ctx.agents.get(ctx.tenant, agent_id) {
                if agent.is_active && agent.is_valid_for_channel(ctx.channel, ctx.instance_id) {
                    info!(agent_id, contact = %contact.friendly_name, "contact mapping matched");
                    return Ok(Some(agent));
                }
            }
        }
    }

    // Stage 5: default agent.
    if let Some(agent) = ctx.agents.default_agent(ctx.tenant)? {
        if agent.is_valid_for_channel(ctx.channel, ctx.instance_id) {
            warn!(agent_id = agent.id, sender = %msg.sender, "default agent fallback");
            return Ok(Some(agent));
        }
    }

    Ok(None)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use switchboard_contacts::types::ContactRole;

    struct Fixture {
        agents: AgentStore,
        directory: ContactDirectory,
        sessions: SessionStore,
        tenant: TenantId,
    }

    impl Fixture {
        fn new() -> Self {
            let conn = rusqlite::Connection::open_in_memory().unwrap();
            crate::agents::init_db(&conn).unwrap();
            switchboard_contacts::db::init_db(&conn).unwrap();
            let db = Arc::new(Mutex::new(conn));
            Self {
                agents: AgentStore::new(Arc::clone(&db)),
                directory: ContactDirectory::new(Arc::clone(&db)),
                sessions: SessionStore::new(db),
                tenant: TenantId::default_tenant(),
            }
        }

        fn ctx(&self) -> SelectionContext<'_> {
            SelectionContext {
                agents: &self.agents,
                directory: &self.directory,
                sessions: &self.sessions,
                tenant: &self.tenant,
                channel: Channel::Whatsapp,
                instance_id: None,
            }
        }
    }

    fn msg(body: &str, is_group: bool) -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            sender: "5511999990000".into(),
            sender_name: None,
            body: body.into(),
            chat_id: "group-1@g.us".into(),
            chat_name: None,
            is_group,
            timestamp: 0,
            media_type: None,
            media_url: None,
            media_path: None,
            channel: Channel::Whatsapp,
            telegram_id: None,
        }
    }

    #[test]
    fn keyword_beats_default() {
        let f = Fixture::new();
        let mut scheduler = crate::agents::sample_agent("default", "scheduler");
        scheduler.keywords = vec!["scheduler".into()];
        f.agents.insert(&scheduler).unwrap();
        let mut fallback = crate::agents::sample_agent("default", "generalist");
        fallback.is_default = true;
        f.agents.insert(&fallback).unwrap();

        let hit = select_agent(&f.ctx(), &msg("hey scheduler remind me tomorrow at 9", false))
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "scheduler");

        let hit = select_agent(&f.ctx(), &msg("hi there", false)).unwrap().unwrap();
        assert_eq!(hit.name, "generalist");
    }

    #[test]
    fn mention_routes_in_groups() {
        let f = Fixture::new();
        let contact = f
            .directory
            .create_contact(&f.tenant, "agendador", ContactRole::Agent, None, None)
            .unwrap();
        let mut agent = crate::agents::sample_agent("default", "agendador");
        agent.contact_id = Some(contact.id);
        f.agents.insert(&agent).unwrap();

        let hit = select_agent(&f.ctx(), &msg("@agendador me lembre em 5 minutos", true))
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "agendador");
    }

    #[test]
    fn group_without_mention_or_keyword_selects_nothing() {
        let f = Fixture::new();
        let mut fallback = crate::agents::sample_agent("default", "generalist");
        fallback.is_default = true;
        f.agents.insert(&fallback).unwrap();

        assert!(select_agent(&f.ctx(), &msg("random chatter", true))
            .unwrap()
            .is_none());
    }

    #[test]
    fn saved_preference_wins_and_invalid_preference_clears() {
        let f = Fixture::new();
        let mut preferred = crate::agents::sample_agent("default", "preferred");
        preferred.keywords = vec![];
        let preferred_id = f.agents.insert(&preferred).unwrap();
        let mut keyworded = crate::agents::sample_agent("default", "keyworded");
        keyworded.keywords = vec!["remind".into()];
        f.agents.insert(&keyworded).unwrap();

        f.sessions
            .set(&f.tenant, "5511999990000", preferred_id)
            .unwrap();
        let hit = select_agent(&f.ctx(), &msg("remind me please", false))
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "preferred");

        // Preference pointing at a Telegram-only agent is cleared and the
        // keyword stage takes over.
        let mut tg_only = crate::agents::sample_agent("default", "tg-only");
        tg_only.enabled_channels = vec!["telegram".into()];
        let tg_id = f.agents.insert(&tg_only).unwrap();
        f.sessions.set(&f.tenant, "5511999990000", tg_id).unwrap();

        let hit = select_agent(&f.ctx(), &msg("remind me please", false))
            .unwrap()
            .unwrap();
        assert_eq!(hit.name, "keyworded");
        assert!(f.sessions.get(&f.tenant, "5511999990000").unwrap().is_none());
    }

    #[test]
    fn contact_mapping_applies_to_dms_only() {
        let f = Fixture::new();
        let contact = f
            .directory
            .create_contact(
                &f.tenant,
                "Alice",
                ContactRole::User,
                Some("5511999990000"),
                None,
            )
            .unwrap();
        let agent_id = f
            .agents
            .insert(&crate::agents::sample_agent("default", "mapped"))
            .unwrap();
        f.directory
            .map_contact_to_agent(&f.tenant, contact.id, agent_id)
            .unwrap();

        let hit = select_agent(&f.ctx(), &msg("hello", false)).unwrap().unwrap();
        assert_eq!(hit.name, "mapped");

        assert!(select_agent(&f.ctx(), &msg("hello", true)).unwrap().is_none());
    }
}
