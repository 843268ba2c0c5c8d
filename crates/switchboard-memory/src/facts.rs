//! Semantic fact store (layer 3).

use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use crate::error::Result;
use crate::types::{Fact, FactTopic};

/// Weight of the new observation when a fact is reinforced with the same
/// value.
const MERGE_NEW_WEIGHT: f64 = 0.4;
/// Per-repetition confidence boost, capped at [`MAX_REPETITION_BOOST`].
const REPETITION_BOOST: f64 = 0.1;
const MAX_REPETITION_BOOST: f64 = 0.2;

pub struct FactStore {
    db: Arc<Mutex<Connection>>,
}

impl FactStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Insert or merge one fact.
    ///
    /// Same value → confidence becomes a weighted average plus a repetition
    /// boost, capped at 1.0. Different value → the higher-confidence side
    /// wins and the loser is discarded.
    pub fn upsert(
        &self,
        agent_id: i64,
        user_key: &str,
        topic: FactTopic,
        key: &str,
        value: &str,
        confidence: f64,
    ) -> Result<()> {
        let confidence = confidence.clamp(0.0, 1.0);
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();

        let existing: Option<(i64, String, f64, i64)> = match conn.query_row(
            "SELECT id, value, confidence, observations FROM facts
             WHERE agent_id = ?1 AND user_key = ?2 AND topic = ?3 AND key = ?4",
            rusqlite::params![agent_id, user_key, topic.as_str(), key],
            |row| {
                Ok((
                    row.get(0)?,
                    row.get(1)?,
                    row.get(2)?,
                    row.get(3)?,
                ))
            },
        ) {
            Ok(row) => Some(row),
            Err(rusqlite::Error::QueryReturnedNoRows) => None,
            Err(e) => return Err(e.into()),
        };

        match existing {
            None => {
                conn.execute(
                    "INSERT INTO facts
                     (agent_id, user_key, topic, key, value, confidence, observations,
                      learned_at, updated_at)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, 1, ?7, ?7)",
                    rusqlite::params![
                        agent_id,
                        user_key,
                        topic.as_str(),
                        key,
                        value,
                        confidence,
                        now
                    ],
                )?;
            }
            Some((id, old_value, old_conf, observations)) if old_value == value => {
                let observations = observations + 1;
                let merged = merged_confidence(old_conf, confidence, observations);
                conn.execute(
                    "UPDATE facts SET confidence = ?1, observations = ?2, updated_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![merged, observations, now, id],
                )?;
            }
            Some((id, _, old_conf, _)) if confidence > old_conf => {
                debug!(agent_id, user_key, key, "fact value changed; higher confidence wins");
                conn.execute(
                    "UPDATE facts SET value = ?1, confidence = ?2, observations = 1,
                            updated_at = ?3
                     WHERE id = ?4",
                    rusqlite::params![value, confidence, now, id],
                )?;
            }
            Some(_) => {
                debug!(agent_id, user_key, key, "fact value changed; keeping existing (higher confidence)");
            }
        }
        Ok(())
    }

    pub fn get_user_facts(&self, agent_id: i64, user_key: &str) -> Result<Vec<Fact>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT topic, key, value, confidence, learned_at, updated_at
             FROM facts
             WHERE agent_id = ?1 AND user_key = ?2
             ORDER BY topic, confidence DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![agent_id, user_key], |row| {
            let topic_str: String = row.get(0)?;
            Ok(Fact {
                topic: topic_str.parse().unwrap_or(FactTopic::PersonalInfo),
                key: row.get(1)?,
                value: row.get(2)?,
                confidence: row.get(3)?,
                learned_at: row.get(4)?,
                updated_at: row.get(5)?,
            })
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Facts grouped by topic string, for context assembly.
    pub fn grouped_by_topic(
        &self,
        agent_id: i64,
        user_key: &str,
    ) -> Result<BTreeMap<String, Vec<Fact>>> {
        let mut grouped: BTreeMap<String, Vec<Fact>> = BTreeMap::new();
        for fact in self.get_user_facts(agent_id, user_key)? {
            grouped
                .entry(fact.topic.as_str().to_string())
                .or_default()
                .push(fact);
        }
        Ok(grouped)
    }

    pub fn clear_user(&self, agent_id: i64, user_key: &str) -> Result<usize> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM facts WHERE agent_id = ?1 AND user_key = ?2",
            rusqlite::params![agent_id, user_key],
        )?;
        Ok(rows)
    }
}

/// One confidence rule for both reinforcement paths: weighted average of the
/// old and new observation, plus a bounded repetition boost.
pub fn merged_confidence(old: f64, new: f64, observations: i64) -> f64 {
    let base = (1.0 - MERGE_NEW_WEIGHT) * old + MERGE_NEW_WEIGHT * new;
    let boost = (REPETITION_BOOST * (observations - 1) as f64).min(MAX_REPETITION_BOOST);
    (base + boost).min(1.0)
}
