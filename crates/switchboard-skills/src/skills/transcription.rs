//! Audio transcription: voice notes become text before the LLM sees them.

use async_trait::async_trait;
use tracing::{info, warn};

use switchboard_core::message::{InboundMessage, MediaKind};

use crate::error::Result;
use crate::skill::{Skill, SkillContext, SkillOutcome};

pub struct TranscriptionSkill {
    /// When set, the transcript is sent back verbatim and the LLM is
    /// skipped ("transcript only" mode).
    pub transcript_only: bool,
}

impl TranscriptionSkill {
    pub fn new() -> Self {
        Self {
            transcript_only: false,
        }
    }
}

impl Default for TranscriptionSkill {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Skill for TranscriptionSkill {
    fn skill_type(&self) -> &'static str {
        "audio_transcription"
    }

    async fn pre_process(
        &self,
        ctx: &SkillContext,
        msg: &InboundMessage,
        _text: &str,
    ) -> Result<Option<SkillOutcome>> {
        if msg.media_type != Some(MediaKind::Audio) {
            return Ok(None);
        }
        let Some(path) = msg.media_path.as_deref() else {
            return Ok(None);
        };
        let Some(transcriber) = ctx.transcriber.as_ref() else {
            warn!("audio message received but no transcriber is configured");
            return Ok(None);
        };

        let transcript = transcriber.transcribe(path).await?;
        info!(chars = transcript.len(), "audio transcribed");

        if self.transcript_only {
            return Ok(Some(SkillOutcome {
                output: Some(format!("🎙️ Transcript:\n{}", transcript)),
                skip_ai: true,
                ..Default::default()
            }));
        }
        Ok(Some(SkillOutcome {
            replaced_text: Some(transcript),
            ..Default::default()
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::skill::Transcriber;
    use std::sync::Arc;
    use switchboard_core::types::{Channel, TenantId};
    use switchboard_memory::shared::SharedKnowledgePool;
    use switchboard_providers::credentials::CredentialStore;

    struct Fixed;

    #[async_trait]
    impl Transcriber for Fixed {
        async fn transcribe(&self, _media_path: &str) -> Result<String> {
            Ok("me lembre amanhã às nove".to_string())
        }
    }

    fn ctx(transcriber: Option<Arc<dyn Transcriber>>) -> SkillContext {
        let conn = rusqlite::Connection::open_in_memory().unwrap();
        switchboard_memory::db::init_db(&conn).unwrap();
        switchboard_providers::credentials::init_db(&conn).unwrap();
        let db = Arc::new(std::sync::Mutex::new(conn));
        SkillContext {
            tenant: TenantId::default_tenant(),
            agent_id: 1,
            sender_key: "u".to_string(),
            search: Arc::new(switchboard_providers::builtin_search_registry()),
            flights: Arc::new(switchboard_providers::builtin_flight_registry()),
            credentials: Arc::new(CredentialStore::new(Arc::clone(&db), None)),
            shared_pool: Arc::new(SharedKnowledgePool::new(db)),
            transcriber,
        }
    }

    fn audio_msg() -> InboundMessage {
        InboundMessage {
            id: "m1".into(),
            sender: "u".into(),
            sender_name: None,
            body: String::new(),
            chat_id: "u".into(),
            chat_name: None,
            is_group: false,
            timestamp: 0,
            media_type: Some(MediaKind::Audio),
            media_url: None,
            media_path: Some("/tmp/note.ogg".into()),
            channel: Channel::Whatsapp,
            telegram_id: None,
        }
    }

    #[tokio::test]
    async fn replaces_text_with_transcript() {
        let skill = TranscriptionSkill::new();
        let outcome = skill
            .pre_process(&ctx(Some(Arc::new(Fixed))), &audio_msg(), "")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            outcome.replaced_text.as_deref(),
            Some("me lembre amanhã às nove")
        );
        assert!(!outcome.skip_ai);
    }

    #[tokio::test]
    async fn ignores_text_messages() {
        let skill = TranscriptionSkill::new();
        let mut msg = audio_msg();
        msg.media_type = None;
        assert!(skill
            .pre_process(&ctx(Some(Arc::new(Fixed))), &msg, "hi")
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn transcript_only_skips_ai() {
        let skill = TranscriptionSkill {
            transcript_only: true,
        };
        let outcome = skill
            .pre_process(&ctx(Some(Arc::new(Fixed))), &audio_msg(), "")
            .await
            .unwrap()
            .unwrap();
        assert!(outcome.skip_ai);
        assert!(outcome.output.unwrap().contains("Transcript"));
    }
}
