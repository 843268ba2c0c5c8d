//! Memory manager (C10): multiplexes per-agent memory and derives the
//! partition key from the agent's isolation mode.

use std::sync::{Arc, Mutex};

use dashmap::DashMap;
use rusqlite::Connection;
use tracing::info;

use switchboard_core::types::{AgentId, IsolationMode, TenantId};

use crate::agent_memory::{AgentMemory, AgentMemoryConfig};
use crate::error::Result;
use crate::extractor::ExtractionModel;
use crate::memguard::DetectionMode;
use crate::tool_output::ToolOutputBuffer;
use crate::types::{EntryMetadata, MemoryContext};
use crate::vector::{
    knowledge_collection, Embedder, MetadataFilter, VectorStore, MAX_UPSERT_BATCH,
};

/// Characters per document chunk, and the overlap carried between
/// consecutive chunks so sentences cut at a boundary still recall.
const CHUNK_CHARS: usize = 1_200;
const CHUNK_OVERLAP: usize = 200;

/// Split a document into overlapping chunks for embedding. Operates on
/// chars, never bytes, so multi-byte text cannot split mid-character.
pub fn chunk_document(text: &str, chunk_chars: usize, overlap: usize) -> Vec<String> {
    let chars: Vec<char> = text.chars().collect();
    if chars.is_empty() {
        return Vec::new();
    }
    let step = chunk_chars.saturating_sub(overlap).max(1);

    let mut chunks = Vec::new();
    let mut start = 0;
    while start < chars.len() {
        let end = (start + chunk_chars).min(chars.len());
        let chunk: String = chars[start..end].iter().collect();
        let trimmed = chunk.trim();
        if !trimmed.is_empty() {
            chunks.push(trimmed.to_string());
        }
        if end == chars.len() {
            break;
        }
        start += step;
    }
    chunks
}

/// Inputs to memory-key derivation. The key is a pure function of these.
#[derive(Debug, Clone, Default)]
pub struct KeyScope<'a> {
    pub chat_id: Option<&'a str>,
    pub contact_id: Option<i64>,
    pub project_id: Option<i64>,
}

/// Derive the opaque partition key for working and episodic memory.
///
/// Project scope beats everything; otherwise the agent's isolation mode
/// picks the discriminator. Pure: same inputs, same key.
pub fn memory_key(
    agent_id: AgentId,
    sender_key: &str,
    isolation: IsolationMode,
    scope: &KeyScope<'_>,
) -> String {
    if let Some(pid) = scope.project_id {
        return format!("project_{}:sender_{}", pid, sender_key);
    }
    match isolation {
        IsolationMode::Shared => format!("agent_{}:shared", agent_id),
        IsolationMode::ChannelIsolated => {
            let channel_id = scope.chat_id.unwrap_or(sender_key);
            format!("agent_{}:channel_{}", agent_id, channel_id)
        }
        IsolationMode::Isolated => match scope.contact_id {
            Some(cid) => format!("agent_{}:contact_{}", agent_id, cid),
            None => format!("agent_{}:sender_{}", agent_id, sender_key),
        },
    }
}

pub struct MemoryManager {
    db: Arc<Mutex<Connection>>,
    vectors: Arc<dyn VectorStore>,
    embedder: Arc<dyn Embedder>,
    tool_outputs: Arc<ToolOutputBuffer>,
    agents: DashMap<AgentId, Arc<AgentMemory>>,
    default_config: AgentMemoryConfig,
}

impl MemoryManager {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        vectors: Arc<dyn VectorStore>,
        embedder: Arc<dyn Embedder>,
        default_config: AgentMemoryConfig,
    ) -> Self {
        Self {
            db,
            vectors,
            embedder,
            tool_outputs: Arc::new(ToolOutputBuffer::new()),
            agents: DashMap::new(),
            default_config,
        }
    }

    /// Register (or replace) an agent's memory with explicit config. Called
    /// when the agent row changes.
    pub fn register_agent(&self, agent_id: AgentId, config: AgentMemoryConfig) {
        let memory = Arc::new(AgentMemory::new(
            agent_id,
            config,
            Arc::clone(&self.db),
            Arc::clone(&self.vectors),
            Arc::clone(&self.embedder),
        ));
        self.agents.insert(agent_id, memory);
    }

    pub fn agent_memory(&self, agent_id: AgentId) -> Arc<AgentMemory> {
        self.agents
            .entry(agent_id)
            .or_insert_with(|| {
                Arc::new(AgentMemory::new(
                    agent_id,
                    self.default_config.clone(),
                    Arc::clone(&self.db),
                    Arc::clone(&self.vectors),
                    Arc::clone(&self.embedder),
                ))
            })
            .clone()
    }

    pub fn tool_outputs(&self) -> &Arc<ToolOutputBuffer> {
        &self.tool_outputs
    }

    /// Append a turn under the derived memory key.
    #[allow(clippy::too_many_arguments)]
    pub fn add_message(
        &self,
        agent_id: AgentId,
        sender_key: &str,
        isolation: IsolationMode,
        scope: &KeyScope<'_>,
        role: &str,
        content: &str,
        message_id: Option<&str>,
        metadata: EntryMetadata,
    ) -> Result<String> {
        let key = memory_key(agent_id, sender_key, isolation, scope);
        self.agent_memory(agent_id)
            .add_message(&key, role, content, message_id, metadata)?;
        Ok(key)
    }

    /// Assemble context for one turn under the derived memory key.
    #[allow(clippy::too_many_arguments)]
    pub fn get_context(
        &self,
        tenant: &TenantId,
        agent_id: AgentId,
        sender_key: &str,
        isolation: IsolationMode,
        scope: &KeyScope<'_>,
        query: &str,
        max_semantic_results: usize,
        similarity_threshold: f32,
        include_shared: bool,
    ) -> Result<MemoryContext> {
        let key = memory_key(agent_id, sender_key, isolation, scope);
        self.agent_memory(agent_id).get_context(
            tenant,
            &key,
            sender_key,
            query,
            max_semantic_results,
            similarity_threshold,
            include_shared,
        )
    }

    /// Run the automatic fact-extraction policy for this turn, if the
    /// agent's config enables it.
    #[allow(clippy::too_many_arguments)]
    pub async fn maybe_extract_facts(
        &self,
        agent_id: AgentId,
        sender_key: &str,
        isolation: IsolationMode,
        scope: &KeyScope<'_>,
        model: &dyn ExtractionModel,
        detection_mode: DetectionMode,
    ) -> Result<usize> {
        let memory = self.agent_memory(agent_id);
        if !memory.config().auto_extract {
            return Ok(0);
        }
        let key = memory_key(agent_id, sender_key, isolation, scope);
        memory
            .maybe_extract_facts(&key, sender_key, model, detection_mode)
            .await
    }

    /// Ingest a document into the agent's RAG collection
    /// (`knowledge_agent_{id}`): chunk, embed, and upsert in batches of at
    /// most [`MAX_UPSERT_BATCH`], yielding between batches so a large
    /// upload never monopolizes the executor. Re-ingesting a document name
    /// replaces its previous chunks.
    pub async fn ingest_document(
        &self,
        agent_id: AgentId,
        document_name: &str,
        text: &str,
    ) -> Result<usize> {
        let chunks = chunk_document(text, CHUNK_CHARS, CHUNK_OVERLAP);
        if chunks.is_empty() {
            return Ok(0);
        }

        let collection = knowledge_collection(agent_id);
        self.vectors.delete(
            &collection,
            &MetadataFilter::key_equals("document_name", document_name),
        )?;

        let mut stored = 0usize;
        for batch in chunks.chunks(MAX_UPSERT_BATCH) {
            let texts: Vec<&str> = batch.iter().map(|c| c.as_str()).collect();
            let embeddings = self.embedder.embed(&texts)?;
            for (chunk, vector) in batch.iter().zip(embeddings.iter()) {
                let id = format!("{}:{}", document_name, stored);
                let metadata = serde_json::json!({
                    "document_name": document_name,
                    "chunk_index": stored,
                });
                self.vectors.upsert(&collection, &id, vector, chunk, &metadata)?;
                stored += 1;
            }
            tokio::task::yield_now().await;
        }

        info!(agent_id, document_name, chunks = stored, "document ingested");
        Ok(stored)
    }

    /// Search the agent's document-RAG collection (`knowledge_agent_{id}`).
    /// Used for project-context annotation and knowledge-base recall.
    pub fn search_knowledge(
        &self,
        agent_id: AgentId,
        query: &str,
        k: usize,
        similarity_threshold: f32,
    ) -> Result<Vec<(String, f32)>> {
        if query.is_empty() || k == 0 {
            return Ok(Vec::new());
        }
        let vectors = self.embedder.embed(&[query])?;
        let query_vec = match vectors.first() {
            Some(v) => v,
            None => return Ok(Vec::new()),
        };
        let hits = self.vectors.search(
            &crate::vector::knowledge_collection(agent_id),
            query_vec,
            k,
            None,
        )?;
        Ok(hits
            .into_iter()
            .filter_map(|h| {
                let similarity = crate::vector::similarity_from_distance(h.distance);
                (similarity >= similarity_threshold).then_some((h.text, similarity))
            })
            .collect())
    }

    pub fn clear_agent_memory(
        &self,
        agent_id: AgentId,
        sender_key: &str,
        isolation: IsolationMode,
        scope: &KeyScope<'_>,
    ) -> Result<()> {
        let key = memory_key(agent_id, sender_key, isolation, scope);
        self.agent_memory(agent_id).clear(&key, sender_key, false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{HashEmbedder, SqliteVectorStore};

    fn manager() -> MemoryManager {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        MemoryManager::new(
            Arc::clone(&db),
            Arc::new(SqliteVectorStore::new(Arc::clone(&db))),
            Arc::new(HashEmbedder),
            AgentMemoryConfig::default(),
        )
    }

    #[test]
    fn memory_key_is_pure_and_mode_driven() {
        let scope = KeyScope::default();
        assert_eq!(
            memory_key(1, "5511999990000", IsolationMode::Isolated, &scope),
            "agent_1:sender_5511999990000"
        );
        assert_eq!(
            memory_key(1, "x", IsolationMode::Shared, &scope),
            "agent_1:shared"
        );
        assert_eq!(
            memory_key(
                1,
                "x",
                IsolationMode::ChannelIsolated,
                &KeyScope {
                    chat_id: Some("g1@g.us"),
                    ..Default::default()
                }
            ),
            "agent_1:channel_g1@g.us"
        );
        // channel_isolated without a chat id falls back to the sender.
        assert_eq!(
            memory_key(1, "x", IsolationMode::ChannelIsolated, &scope),
            "agent_1:channel_x"
        );
    }

    #[test]
    fn contact_resolution_changes_isolated_key() {
        assert_eq!(
            memory_key(
                2,
                "raw",
                IsolationMode::Isolated,
                &KeyScope {
                    contact_id: Some(42),
                    ..Default::default()
                }
            ),
            "agent_2:contact_42"
        );
    }

    #[test]
    fn project_scope_beats_isolation_mode() {
        for mode in [
            IsolationMode::Isolated,
            IsolationMode::Shared,
            IsolationMode::ChannelIsolated,
        ] {
            assert_eq!(
                memory_key(
                    1,
                    "u",
                    mode,
                    &KeyScope {
                        project_id: Some(5),
                        ..Default::default()
                    }
                ),
                "project_5:sender_u"
            );
        }
    }

    #[test]
    fn add_and_get_round_trip() {
        let m = manager();
        let scope = KeyScope::default();
        m.add_message(
            1,
            "u1",
            IsolationMode::Isolated,
            &scope,
            "user",
            "hello there",
            Some("m1"),
            EntryMetadata::default(),
        )
        .unwrap();

        let ctx = m
            .get_context(
                &TenantId::default_tenant(),
                1,
                "u1",
                IsolationMode::Isolated,
                &scope,
                "hello",
                5,
                0.0,
                false,
            )
            .unwrap();
        assert_eq!(ctx.working.len(), 1);
    }

    #[test]
    fn chunking_is_char_safe_and_overlapping() {
        assert!(chunk_document("", 100, 20).is_empty());
        assert_eq!(chunk_document("short note", 100, 20), vec!["short note"]);

        // Multi-byte text never splits mid-character (would panic on a
        // byte-offset implementation).
        let text = "previsão ".repeat(400);
        let chunks = chunk_document(&text, 1_200, 200);
        assert!(chunks.len() > 1);
        for chunk in &chunks {
            assert!(chunk.chars().count() <= 1_200);
        }

        // A token inside the overlap window lands in both chunks. With
        // 6-char tokens, chunk 1 spans chars 0..100 and chunk 2 starts at
        // 80, so token 14 (chars 84..90) is shared.
        let text: String = (0..40).map(|i| format!("w{:04} ", i)).collect();
        let chunks = chunk_document(&text, 100, 20);
        assert!(chunks[0].contains("w0014"));
        assert!(chunks[1].contains("w0014"));
    }

    #[tokio::test]
    async fn ingest_populates_knowledge_and_reingest_replaces() {
        let m = manager();
        let long_doc = (0..900)
            .map(|i| format!("Section {}: the escalation runbook says page the on-call first.", i))
            .collect::<Vec<_>>()
            .join("\n");

        let stored = m.ingest_document(1, "runbook.md", &long_doc).await.unwrap();
        assert!(stored > MAX_UPSERT_BATCH, "expected more than one batch, got {}", stored);

        let hits = m.search_knowledge(1, "escalation runbook on-call", 3, 0.01).unwrap();
        assert!(!hits.is_empty());
        assert!(hits[0].0.contains("escalation runbook"));

        // Re-ingesting the same name replaces, not accumulates.
        let replaced = m.ingest_document(1, "runbook.md", "one tiny revision").await.unwrap();
        assert_eq!(replaced, 1);
        let hits = m.search_knowledge(1, "tiny revision", 3, 0.01).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[tokio::test]
    async fn knowledge_is_scoped_per_agent() {
        let m = manager();
        m.ingest_document(1, "doc", "the wifi password policy lives with agent one")
            .await
            .unwrap();
        assert!(m
            .search_knowledge(2, "wifi password policy", 3, 0.01)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn agents_do_not_share_memory() {
        let m = manager();
        let scope = KeyScope::default();
        m.add_message(
            1,
            "u1",
            IsolationMode::Isolated,
            &scope,
            "user",
            "secret for agent one",
            None,
            EntryMetadata::default(),
        )
        .unwrap();

        let ctx = m
            .get_context(
                &TenantId::default_tenant(),
                2,
                "u1",
                IsolationMode::Isolated,
                &scope,
                "secret",
                5,
                0.0,
                false,
            )
            .unwrap();
        assert!(ctx.working.is_empty());
        assert!(ctx.episodic.is_empty());
    }
}
