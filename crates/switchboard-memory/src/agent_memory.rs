//! Per-agent memory façade (working ring + episodic index + facts + shared
//! pool behind one `add_message` / `get_context` surface).

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::{debug, info, warn};

use switchboard_core::types::TenantId;

use crate::error::Result;
use crate::extractor::{self, ExtractionModel};
use crate::facts::FactStore;
use crate::memguard::{self, DetectionMode};
use crate::shared::SharedKnowledgePool;
use crate::types::{EntryMetadata, EpisodicHit, MemoryContext, MemoryEntry};
use crate::vector::{
    episodic_collection, similarity_from_distance, Embedder, MetadataFilter, VectorStore,
};

/// Per-agent memory knobs; derived from the agent row by the caller.
#[derive(Debug, Clone)]
pub struct AgentMemoryConfig {
    /// Working ring size per memory key.
    pub memory_size: usize,
    /// Whether fact extraction runs automatically after user turns.
    pub auto_extract: bool,
    /// User messages accumulated before extraction fires.
    pub extraction_min_user_messages: usize,
    /// The adaptive-personality skill lowers extraction thresholds.
    pub adaptive_personality: bool,
}

impl Default for AgentMemoryConfig {
    fn default() -> Self {
        Self {
            memory_size: 10,
            auto_extract: true,
            extraction_min_user_messages: 3,
            adaptive_personality: false,
        }
    }
}

pub struct AgentMemory {
    agent_id: i64,
    config: AgentMemoryConfig,
    db: Arc<Mutex<Connection>>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    facts: FactStore,
    shared: SharedKnowledgePool,
    /// memory_key → bounded ring. Rebuilt from the DB on startup.
    rings: DashMap<String, VecDeque<MemoryEntry>>,
    /// user_key → user messages since the last extraction.
    since_extraction: DashMap<String, usize>,
}

impl AgentMemory {
    pub fn new(
        agent_id: i64,
        config: AgentMemoryConfig,
        db: Arc<Mutex<Connection>>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
    ) -> Self {
        let mem = Self {
            agent_id,
            config,
            facts: FactStore::new(Arc::clone(&db)),
            shared: SharedKnowledgePool::new(Arc::clone(&db)),
            db,
            vectors,
            embedder,
            rings: DashMap::new(),
            since_extraction: DashMap::new(),
        };
        if let Err(e) = mem.load_from_db() {
            warn!(agent_id, error = %e, "failed to replay working memory from DB");
        }
        mem
    }

    pub fn agent_id(&self) -> i64 {
        self.agent_id
    }

    pub fn config(&self) -> &AgentMemoryConfig {
        &self.config
    }

    pub fn set_adaptive_personality(&mut self, enabled: bool) {
        self.config.adaptive_personality = enabled;
    }

    /// Replay persisted rings into memory. Called once at construction.
    fn load_from_db(&self) -> Result<()> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT memory_key, entries FROM working_memory WHERE agent_id = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![self.agent_id], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;

        let mut restored = 0usize;
        for row in rows.filter_map(|r| r.ok()) {
            let (key, entries_json) = row;
            match serde_json::from_str::<Vec<MemoryEntry>>(&entries_json) {
                Ok(entries) => {
                    restored += entries.len();
                    self.rings.insert(key, entries.into());
                }
                Err(e) => warn!(agent_id = self.agent_id, key, error = %e, "skipping corrupt ring"),
            }
        }
        if restored > 0 {
            debug!(agent_id = self.agent_id, restored, "working memory replayed");
        }
        Ok(())
    }

    /// Append one turn: bounded ring push, durable persist, and (for user
    /// messages) an episodic embedding upsert.
    pub fn add_message(
        &self,
        memory_key: &str,
        role: &str,
        content: &str,
        message_id: Option<&str>,
        metadata: EntryMetadata,
    ) -> Result<()> {
        let entry = MemoryEntry {
            role: role.to_string(),
            content: content.to_string(),
            metadata: metadata.clone(),
            created_at: chrono::Utc::now().to_rfc3339(),
        };

        {
            let mut ring = self.rings.entry(memory_key.to_string()).or_default();
            if ring.len() >= self.config.memory_size {
                ring.pop_front();
            }
            ring.push_back(entry);
        }
        self.persist_ring(memory_key)?;

        // Only user messages are indexed; assistant turns and tool summaries
        // would pollute recall.
        if role == "user" && !metadata.is_tool_output {
            self.index_episodic(memory_key, content, message_id, &metadata)?;
        }
        Ok(())
    }

    fn persist_ring(&self, memory_key: &str) -> Result<()> {
        let entries: Vec<MemoryEntry> = self
            .rings
            .get(memory_key)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();
        let json = serde_json::to_string(&entries)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO working_memory (agent_id, memory_key, entries, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(agent_id, memory_key) DO UPDATE SET
                entries = excluded.entries,
                updated_at = excluded.updated_at",
            rusqlite::params![self.agent_id, memory_key, json, now],
        )?;
        Ok(())
    }

    fn index_episodic(
        &self,
        memory_key: &str,
        content: &str,
        message_id: Option<&str>,
        metadata: &EntryMetadata,
    ) -> Result<()> {
        let vectors = self.embedder.embed(&[content])?;
        let vector = match vectors.first() {
            Some(v) => v,
            None => return Ok(()),
        };
        let id = message_id
            .map(|m| m.to_string())
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let meta = serde_json::json!({
            "memory_key": memory_key,
            "sender_name": metadata.sender_name,
        });
        self.vectors.upsert(
            &episodic_collection(self.agent_id, memory_key),
            &id,
            vector,
            content,
            &meta,
        )
    }

    /// Assemble the four context layers for one turn.
    #[allow(clippy::too_many_arguments)]
    pub fn get_context(
        &self,
        tenant: &TenantId,
        memory_key: &str,
        user_key: &str,
        query: &str,
        max_semantic_results: usize,
        similarity_threshold: f32,
        include_shared: bool,
    ) -> Result<MemoryContext> {
        let working: Vec<MemoryEntry> = self
            .rings
            .get(memory_key)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();

        let episodic = self.search_episodic(
            memory_key,
            query,
            max_semantic_results,
            similarity_threshold,
        )?;

        let facts = self.facts.grouped_by_topic(self.agent_id, user_key)?;

        let shared = if include_shared {
            self.shared.accessible_to(tenant, self.agent_id)?
        } else {
            Vec::new()
        };

        Ok(MemoryContext {
            working,
            episodic,
            facts,
            shared,
        })
    }

    fn search_episodic(
        &self,
        memory_key: &str,
        query: &str,
        k: usize,
        threshold: f32,
    ) -> Result<Vec<EpisodicHit>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed(&[query])?;
        let query_vec = match vectors.first() {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };

        let filter = MetadataFilter::key_equals("memory_key", memory_key);
        let hits = self.vectors.search(
            &episodic_collection(self.agent_id, memory_key),
            query_vec,
            k,
            Some(&filter),
        )?;

        Ok(hits
            .into_iter()
            .filter_map(|h| {
                let similarity = similarity_from_distance(h.distance);
                if similarity < threshold {
                    return None;
                }
                let sender_name = h
                    .metadata
                    .get("sender_name")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string());
                Some(EpisodicHit {
                    content: h.text,
                    similarity,
                    sender_name,
                })
            })
            .collect())
    }

    /// Bump the extraction counter and, if due, run the extractor and store
    /// validated facts. Returns how many facts were stored.
    pub async fn maybe_extract_facts(
        &self,
        memory_key: &str,
        user_key: &str,
        model: &dyn ExtractionModel,
        detection_mode: DetectionMode,
    ) -> Result<usize> {
        let pending = {
            let mut counter = self.since_extraction.entry(user_key.to_string()).or_insert(0);
            *counter += 1;
            *counter
        };

        let conversation: Vec<MemoryEntry> = self
            .rings
            .get(memory_key)
            .map(|r| r.iter().cloned().collect())
            .unwrap_or_default();

        let due = pending >= self.config.extraction_min_user_messages
            || extractor::should_extract(
                &conversation,
                self.config.extraction_min_user_messages,
                self.config.adaptive_personality,
            );
        if !due {
            return Ok(0);
        }

        let extracted = extractor::extract_with(model, &conversation).await?;
        if extracted.is_empty() {
            self.since_extraction.insert(user_key.to_string(), 0);
            return Ok(0);
        }

        let existing = self.facts.get_user_facts(self.agent_id, user_key)?;
        let mut stored = 0usize;
        for fact in extracted {
            let verdict = memguard::validate_fact(&fact, &existing, detection_mode);
            if !verdict.is_valid {
                warn!(
                    agent_id = self.agent_id,
                    user_key,
                    key = %fact.key,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "fact blocked by memguard"
                );
                continue;
            }
            if verdict.flagged {
                info!(
                    agent_id = self.agent_id,
                    user_key,
                    key = %fact.key,
                    reason = verdict.reason.as_deref().unwrap_or(""),
                    "fact flagged (detect-only), storing"
                );
            }
            self.facts.upsert(
                self.agent_id,
                user_key,
                fact.topic,
                &fact.key,
                &fact.value,
                fact.confidence,
            )?;
            stored += 1;
        }

        self.since_extraction.insert(user_key.to_string(), 0);
        Ok(stored)
    }

    /// Clear one memory key's working ring (and optionally the user's facts).
    pub fn clear(&self, memory_key: &str, user_key: &str, clear_facts: bool) -> Result<()> {
        self.rings.remove(memory_key);
        {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "DELETE FROM working_memory WHERE agent_id = ?1 AND memory_key = ?2",
                rusqlite::params![self.agent_id, memory_key],
            )?;
        }
        let filter = MetadataFilter::key_equals("memory_key", memory_key);
        let _ = self
            .vectors
            .delete(&episodic_collection(self.agent_id, memory_key), &filter);
        if clear_facts {
            self.facts.clear_user(self.agent_id, user_key)?;
        }
        Ok(())
    }

    pub fn facts(&self) -> &FactStore {
        &self.facts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{HashEmbedder, SqliteVectorStore};
    use async_trait::async_trait;

    fn memory(size: usize) -> AgentMemory {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        AgentMemory::new(
            1,
            AgentMemoryConfig {
                memory_size: size,
                ..Default::default()
            },
            Arc::clone(&db),
            Arc::new(SqliteVectorStore::new(Arc::clone(&db))),
            Arc::new(HashEmbedder),
        )
    }

    #[test]
    fn ring_is_bounded_and_persisted() {
        let mem = memory(3);
        for i in 0..5 {
            mem.add_message(
                "agent_1:sender_x",
                "user",
                &format!("message {}", i),
                None,
                EntryMetadata::default(),
            )
            .unwrap();
        }
        let ring = mem.rings.get("agent_1:sender_x").unwrap();
        assert_eq!(ring.len(), 3);
        assert_eq!(ring.front().unwrap().content, "message 2");
    }

    #[test]
    fn replay_restores_rings_after_restart() {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let vectors: Arc<dyn VectorStore> = Arc::new(SqliteVectorStore::new(Arc::clone(&db)));

        {
            let mem = AgentMemory::new(
                1,
                AgentMemoryConfig::default(),
                Arc::clone(&db),
                Arc::clone(&vectors),
                Arc::new(HashEmbedder),
            );
            mem.add_message("k", "user", "survive restart", None, EntryMetadata::default())
                .unwrap();
        }

        let mem = AgentMemory::new(
            1,
            AgentMemoryConfig::default(),
            Arc::clone(&db),
            vectors,
            Arc::new(HashEmbedder),
        );
        let ring = mem.rings.get("k").unwrap();
        assert_eq!(ring.back().unwrap().content, "survive restart");
    }

    #[test]
    fn episodic_recall_is_scoped_to_memory_key() {
        let mem = memory(10);
        mem.add_message("key_a", "user", "my dog is called rex", None, EntryMetadata::default())
            .unwrap();
        mem.add_message("key_b", "user", "my cat is called felix", None, EntryMetadata::default())
            .unwrap();

        let ctx = mem
            .get_context(
                &TenantId::default_tenant(),
                "key_a",
                "user1",
                "what is my dog called",
                5,
                0.01,
                false,
            )
            .unwrap();
        assert!(ctx.episodic.iter().any(|h| h.content.contains("rex")));
        assert!(!ctx.episodic.iter().any(|h| h.content.contains("felix")));
    }

    #[test]
    fn tool_output_turns_are_not_indexed() {
        let mem = memory(10);
        mem.add_message(
            "k",
            "user",
            "giant tool dump",
            None,
            EntryMetadata {
                is_tool_output: true,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(
            mem.vectors.count(&episodic_collection(1, "k")).unwrap(),
            0
        );
    }

    struct Canned;

    #[async_trait]
    impl ExtractionModel for Canned {
        async fn complete(&self, _s: &str, _u: &str) -> Result<String> {
            Ok(r#"[{"topic":"preferences","key":"favorite_color","value":"blue","confidence":0.9}]"#.into())
        }
    }

    #[tokio::test]
    async fn extraction_stores_validated_facts() {
        let mem = memory(10);
        for i in 0..3 {
            mem.add_message(
                "k",
                "user",
                &format!("long enough message number {}", i),
                None,
                EntryMetadata::default(),
            )
            .unwrap();
        }

        let mut stored = 0;
        for _ in 0..3 {
            stored += mem
                .maybe_extract_facts("k", "u", &Canned, DetectionMode::Block)
                .await
                .unwrap();
        }
        assert!(stored >= 1);
        let facts = mem.facts().get_user_facts(1, "u").unwrap();
        assert_eq!(facts[0].value, "blue");
    }
}
