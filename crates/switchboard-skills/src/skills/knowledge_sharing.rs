//! Knowledge-sharing skill: promotes explicitly flagged information into the
//! tenant's shared pool after the reply goes out.

use async_trait::async_trait;
use tracing::info;

use switchboard_core::message::InboundMessage;
use switchboard_memory::types::AccessLevel;

use crate::error::Result;
use crate::skill::{Skill, SkillContext};

/// PT/EN phrases that mark a message as intended for every agent.
const SHARE_MARKERS: &[&str] = &[
    "todos os agentes",
    "para todos os agentes",
    "all agents should know",
    "share with other agents",
    "compartilhe com os outros",
];

pub struct KnowledgeSharingSkill;

#[async_trait]
impl Skill for KnowledgeSharingSkill {
    fn skill_type(&self) -> &'static str {
        "knowledge_sharing"
    }

    async fn post_response(
        &self,
        ctx: &SkillContext,
        msg: &InboundMessage,
        _reply: &str,
    ) -> Result<()> {
        let body_lower = msg.body.to_lowercase();
        if !SHARE_MARKERS.iter().any(|m| body_lower.contains(m)) {
            return Ok(());
        }

        ctx.shared_pool
            .share(
                &ctx.tenant,
                ctx.agent_id,
                &msg.body,
                "general",
                AccessLevel::Public,
                &[],
            )
            .map_err(|e| crate::error::SkillError::ToolFailed(
                "knowledge_sharing".to_string(),
                e.to_string(),
            ))?;
        info!(agent_id = ctx.agent_id, "message promoted to shared knowledge");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};
    use switchboard_core::types::{Channel, TenantId};
    use switchboard_memory::shared::SharedKnowledgePool;
    use switchboard_providers::credentials::CredentialStore;

    fn ctx() -> SkillContext {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        switchboard_memory::db::init_db(&conn).unwrap();
        switchboard_providers::credentials::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        SkillContext {
            tenant: TenantId::default_tenant(),
            agent_id: 1,
            sender_key: "u".to_string(),
            search: Arc::new(switchboard_providers::builtin_search_registry()),
            flights: Arc::new(switchboard_providers::builtin_flight_registry()),
            credentials: Arc::new(CredentialStore::new(Arc::clone(&db), None)),
            shared_pool: Arc::new(SharedKnowledgePool::new(db)),
            transcriber: None,
        }
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
    async fn shares_flagged_messages() {
        let skill = KnowledgeSharingSkill;
        let ctx = ctx();
        skill
            .post_response(
                &ctx,
                &msg("todos os agentes devem saber: escritório fecha sexta"),
                "anotado!",
            )
            .await
            .unwrap();

        let items = ctx
            .shared_pool
            .accessible_to(&TenantId::default_tenant(), 2)
            .unwrap();
        assert_eq!(items.len(), 1);
        assert!(items[0].content.contains("escritório fecha sexta"));
    }

    #[tokio::test]
    async fn ignores_unflagged_messages() {
        let skill = KnowledgeSharingSkill;
        let ctx = ctx();
        skill
            .post_response(&ctx, &msg("bom dia, tudo bem?"), "tudo ótimo!")
            .await
            .unwrap();
        assert!(ctx
            .shared_pool
            .accessible_to(&TenantId::default_tenant(), 2)
            .unwrap()
            .is_empty());
    }
}
