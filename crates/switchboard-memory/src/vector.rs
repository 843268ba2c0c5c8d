//! Embedding store (episodic memory + document RAG collections).
//!
//! The store and the embedder are both traits so a real vector database or
//! embedding model can be plugged in; the bundled implementations keep the
//! whole system self-contained: vectors live in SQLite as little-endian f32
//! blobs and search is a brute-force L2 scan over one collection.
//!
//! Collection naming: `knowledge_agent_{id}` for document RAG,
//! `messages_{agent}_{memory_key_hash}` for episodic memory. Distance is
//! monotonic; callers convert to similarity via `1 / (1 + distance)`.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use sha2::{Digest, Sha256};

use crate::error::{MemoryError, Result};

/// Embedding width produced by the shared embedder.
pub const EMBEDDING_DIM: usize = 384;

/// Callers must batch large inserts at most this many texts per call and
/// yield between batches so a document upload cannot monopolize memory.
pub const MAX_UPSERT_BATCH: usize = 50;

/// Equality filter over vector metadata (string-valued keys).
#[derive(Debug, Clone, Default)]
pub struct MetadataFilter {
    pub equals: HashMap<String, String>,
}

impl MetadataFilter {
    pub fn key_equals(key: &str, value: &str) -> Self {
        let mut equals = HashMap::new();
        equals.insert(key.to_string(), value.to_string());
        Self { equals }
    }

    pub fn matches(&self, metadata: &serde_json::Value) -> bool {
        self.equals.iter().all(|(k, v)| {
            metadata
                .get(k)
                .and_then(|m| m.as_str())
                .map(|m| m == v)
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone)]
pub struct VectorHit {
    pub id: String,
    pub distance: f32,
    pub text: String,
    pub metadata: serde_json::Value,
}

/// Pluggable vector collection backend.
pub trait VectorStore: Send + Sync {
    /// Insert or replace. A given (collection, id) has at most one vector.
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;

    /// K-nearest by distance, ascending, after applying the filter.
    fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>>;

    fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize>;

    fn count(&self, collection: &str) -> Result<usize>;
}

/// Pluggable text embedder. One shared instance serves every collection.
pub trait Embedder: Send + Sync {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>>;

    fn dimensions(&self) -> usize {
        EMBEDDING_DIM
    }
}

/// Convert a monotonic distance into a similarity in `(0, 1]`.
pub fn similarity_from_distance(distance: f32) -> f32 {
    1.0 / (1.0 + distance)
}

/// Stable short hash used in episodic collection names so memory keys with
/// separators stay filesystem- and SQL-safe.
pub fn memory_key_hash(memory_key: &str) -> String {
    let digest = Sha256::digest(memory_key.as_bytes());
    hex::encode(&digest[..6])
}

pub fn episodic_collection(agent_id: i64, memory_key: &str) -> String {
    format!("messages_{}_{}", agent_id, memory_key_hash(memory_key))
}

pub fn knowledge_collection(agent_id: i64) -> String {
    format!("knowledge_agent_{}", agent_id)
}

// ---------------------------------------------------------------------------
// Bundled SQLite-backed store
// ---------------------------------------------------------------------------

pub struct SqliteVectorStore {
    db: Arc<Mutex<Connection>>,
}

impl SqliteVectorStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }
}

impl VectorStore for SqliteVectorStore {
    fn upsert(
        &self,
        collection: &str,
        id: &str,
        vector: &[f32],
        text: &str,
        metadata: &serde_json::Value,
    ) -> Result<()> {
        let blob = encode_vector(vector);
        let meta = serde_json::to_string(metadata)?;
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO vectors (collection, id, embedding, text, metadata, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(collection, id) DO UPDATE SET
                embedding = excluded.embedding,
                text = excluded.text,
                metadata = excluded.metadata",
            rusqlite::params![collection, id, blob, text, meta, now],
        )?;
        Ok(())
    }

    fn search(
        &self,
        collection: &str,
        query: &[f32],
        k: usize,
        filter: Option<&MetadataFilter>,
    ) -> Result<Vec<VectorHit>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, embedding, text, metadata FROM vectors WHERE collection = ?1",
        )?;
        let rows = stmt.query_map(rusqlite::params![collection], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, Vec<u8>>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;

        let mut hits: Vec<VectorHit> = Vec::new();
        for row in rows.filter_map(|r| r.ok()) {
            let (id, blob, text, meta_str) = row;
            let metadata: serde_json::Value =
                serde_json::from_str(&meta_str).unwrap_or(serde_json::Value::Null);
            if let Some(f) = filter {
                if !f.matches(&metadata) {
                    continue;
                }
            }
            let vector = decode_vector(&blob);
            if vector.len() != query.len() {
                continue;
            }
            hits.push(VectorHit {
                id,
                distance: l2_distance(query, &vector),
                text,
                metadata,
            });
        }

        hits.sort_by(|a, b| a.distance.total_cmp(&b.distance));
        hits.truncate(k);
        Ok(hits)
    }

    fn delete(&self, collection: &str, filter: &MetadataFilter) -> Result<usize> {
        // Filtered deletes need metadata inspection, so select-then-delete.
        let ids: Vec<String> = {
            let conn = self.db.lock().unwrap();
            let mut stmt =
                conn.prepare("SELECT id, metadata FROM vectors WHERE collection = ?1")?;
            let rows = stmt.query_map(rusqlite::params![collection], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?;
            rows.filter_map(|r| r.ok())
                .filter(|(_, meta)| {
                    let metadata: serde_json::Value =
                        serde_json::from_str(meta).unwrap_or(serde_json::Value::Null);
                    filter.matches(&metadata)
                })
                .map(|(id, _)| id)
                .collect()
        };

        let conn = self.db.lock().unwrap();
        let mut deleted = 0;
        for id in ids {
            deleted += conn.execute(
                "DELETE FROM vectors WHERE collection = ?1 AND id = ?2",
                rusqlite::params![collection, id],
            )?;
        }
        Ok(deleted)
    }

    fn count(&self, collection: &str) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        let n: i64 = conn.query_row(
            "SELECT COUNT(*) FROM vectors WHERE collection = ?1",
            rusqlite::params![collection],
            |row| row.get(0),
        )?;
        Ok(n as usize)
    }
}

fn encode_vector(vector: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(vector.len() * 4);
    for v in vector {
        out.extend_from_slice(&v.to_le_bytes());
    }
    out
}

fn decode_vector(blob: &[u8]) -> Vec<f32> {
    blob.chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn l2_distance(a: &[f32], b: &[f32]) -> f32 {
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y) * (x - y))
        .sum::<f32>()
        .sqrt()
}

// ---------------------------------------------------------------------------
// Bundled deterministic embedder
// ---------------------------------------------------------------------------

/// Token-hash embedder: deterministic, dependency-free stand-in for a real
/// sentence-embedding model. Each lowercase token is hashed into a bucket of
/// the 384-dim vector; the result is L2-normalized so relative distances
/// behave sensibly for recall tests and small installs.
pub struct HashEmbedder;

impl Embedder for HashEmbedder {
    fn embed(&self, texts: &[&str]) -> Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

fn hash_embed(text: &str) -> Vec<f32> {
    let mut vector = vec![0.0f32; EMBEDDING_DIM];
    for token in text
        .to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
    {
        let digest = Sha256::digest(token.as_bytes());
        let bucket = u16::from_le_bytes([digest[0], digest[1]]) as usize % EMBEDDING_DIM;
        let sign = if digest[2] & 1 == 0 { 1.0 } else { -1.0 };
        vector[bucket] += sign;
    }
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm > 0.0 {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
    vector
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SqliteVectorStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SqliteVectorStore::new(Arc::new(Mutex::new(conn)))
    }

    fn embed(text: &str) -> Vec<f32> {
        HashEmbedder.embed(&[text]).unwrap().remove(0)
    }

    #[test]
    fn upsert_replaces_existing_vector() {
        let s = store();
        let meta = serde_json::json!({"memory_key": "k"});
        s.upsert("c", "id1", &embed("first"), "first", &meta).unwrap();
        s.upsert("c", "id1", &embed("second"), "second", &meta)
            .unwrap();
        assert_eq!(s.count("c").unwrap(), 1);

        let hits = s.search("c", &embed("second"), 1, None).unwrap();
        assert_eq!(hits[0].text, "second");
    }

    #[test]
    fn search_ranks_by_distance_and_respects_filter() {
        let s = store();
        s.upsert(
            "c",
            "a",
            &embed("the quick brown fox"),
            "the quick brown fox",
            &serde_json::json!({"memory_key": "k1"}),
        )
        .unwrap();
        s.upsert(
            "c",
            "b",
            &embed("weather report for tomorrow"),
            "weather report for tomorrow",
            &serde_json::json!({"memory_key": "k2"}),
        )
        .unwrap();

        let hits = s
            .search("c", &embed("quick brown fox"), 2, None)
            .unwrap();
        assert_eq!(hits[0].id, "a");

        let filter = MetadataFilter::key_equals("memory_key", "k2");
        let hits = s
            .search("c", &embed("quick brown fox"), 2, Some(&filter))
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id, "b");
    }

    #[test]
    fn delete_by_filter_only_removes_matches() {
        let s = store();
        for (id, key) in [("a", "k1"), ("b", "k1"), ("c", "k2")] {
            s.upsert(
                "c",
                id,
                &embed(id),
                id,
                &serde_json::json!({"memory_key": key}),
            )
            .unwrap();
        }
        let removed = s
            .delete("c", &MetadataFilter::key_equals("memory_key", "k1"))
            .unwrap();
        assert_eq!(removed, 2);
        assert_eq!(s.count("c").unwrap(), 1);
    }

    #[test]
    fn similarity_is_monotone_in_distance() {
        assert!(similarity_from_distance(0.0) > similarity_from_distance(1.0));
        assert!((similarity_from_distance(0.0) - 1.0).abs() < f32::EPSILON);
    }

    #[test]
    fn embedder_is_deterministic_and_normalized() {
        let a = embed("hello world");
        let b = embed("hello world");
        assert_eq!(a, b);
        let norm: f32 = a.iter().map(|v| v * v).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-5);
    }

    #[test]
    fn collection_names_are_stable() {
        assert_eq!(
            episodic_collection(3, "agent_3:sender_x"),
            episodic_collection(3, "agent_3:sender_x")
        );
        assert_eq!(knowledge_collection(9), "knowledge_agent_9");
    }
}
