use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use rusqlite::Connection;

use switchboard_core::types::TenantId;

use crate::error::{Result, ThreadError};
use crate::types::{ConversationThread, ThreadContext, ThreadStatus, ThreadTurn};

/// Initialise thread tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversation_threads (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id        TEXT NOT NULL,
            agent_id         INTEGER NOT NULL,
            recipient        TEXT NOT NULL,
            objective        TEXT NOT NULL DEFAULT '',
            current_turn     INTEGER NOT NULL DEFAULT 0,
            max_turns        INTEGER NOT NULL DEFAULT 10,
            status           TEXT NOT NULL DEFAULT 'active',
            history          TEXT NOT NULL DEFAULT '[]',
            goal_achieved    INTEGER NOT NULL DEFAULT 0,
            goal_summary     TEXT,
            persona          TEXT,
            context          TEXT NOT NULL DEFAULT '{}',
            created_at       TEXT NOT NULL,
            last_activity_at TEXT NOT NULL,
            completed_at     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_threads_recipient
            ON conversation_threads(tenant_id, recipient, status);
        CREATE INDEX IF NOT EXISTS idx_threads_completed
            ON conversation_threads(tenant_id, completed_at DESC);",
    )
}

pub struct ThreadStore {
    db: Arc<Mutex<Connection>>,
}

impl ThreadStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn create(
        &self,
        tenant: &TenantId,
        agent_id: i64,
        recipient: &str,
        objective: &str,
        max_turns: u32,
        persona: Option<&str>,
    ) -> Result<ConversationThread> {
        let now = Utc::now();
        let now_str = now.to_rfc3339();
        let id = {
            let conn = self.db.lock().unwrap();
            conn.execute(
                "INSERT INTO conversation_threads
                 (tenant_id, agent_id, recipient, objective, max_turns, persona,
                  created_at, last_activity_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
                rusqlite::params![
                    tenant.as_str(),
                    agent_id,
                    recipient,
                    objective,
                    max_turns,
                    persona,
                    now_str
                ],
            )?;
            conn.last_insert_rowid()
        };
        self.get(id)
    }

    /// Load the current row. Called at the start of every turn so rapid
    /// messages never operate on stale history.
    pub fn get(&self, id: i64) -> Result<ConversationThread> {
        let conn = self.db.lock().unwrap();
        let row = conn.query_row(
            "SELECT id, tenant_id, agent_id, recipient, objective, current_turn,
                    max_turns, status, history, goal_achieved, goal_summary, persona,
                    context, created_at, last_activity_at, completed_at
             FROM conversation_threads WHERE id = ?1",
            rusqlite::params![id],
            row_to_thread,
        );
        match row {
            Ok(t) => Ok(t),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(ThreadError::NotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Persist every mutable field. State transitions commit here before
    /// any outward send.
    pub fn save(&self, thread: &ConversationThread) -> Result<()> {
        let history = serde_json::to_string(&thread.history)?;
        let context = serde_json::to_string(&thread.context)?;
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE conversation_threads
             SET current_turn = ?1, status = ?2, history = ?3, goal_achieved = ?4,
                 goal_summary = ?5, context = ?6, last_activity_at = ?7, completed_at = ?8
             WHERE id = ?9",
            rusqlite::params![
                thread.current_turn,
                thread.status.as_str(),
                history,
                thread.goal_achieved as i64,
                thread.goal_summary,
                context,
                thread.last_activity_at.to_rfc3339(),
                thread.completed_at.map(|t| t.to_rfc3339()),
                thread.id
            ],
        )?;
        Ok(())
    }

    /// The most recently active thread whose recipient matches any of the
    /// candidate forms.
    pub fn find_active_for_recipients(
        &self,
        tenant: &TenantId,
        candidates: &[String],
    ) -> Result<Option<ConversationThread>> {
        if candidates.is_empty() {
            return Ok(None);
        }
        let placeholders: Vec<String> = (0..candidates.len())
            .map(|i| format!("?{}", i + 2))
            .collect();
        let sql = format!(
            "SELECT id, tenant_id, agent_id, recipient, objective, current_turn,
                    max_turns, status, history, goal_achieved, goal_summary, persona,
                    context, created_at, last_activity_at, completed_at
             FROM conversation_threads
             WHERE tenant_id = ?1 AND status = 'active' AND recipient IN ({})
             ORDER BY last_activity_at DESC
             LIMIT 1",
            placeholders.join(", ")
        );

        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut params: Vec<&dyn rusqlite::ToSql> = vec![&tenant.0];
        for candidate in candidates {
            params.push(candidate);
        }
        match stmt.query_row(params.as_slice(), row_to_thread) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// The most recently closed thread whose recipient contains the
    /// normalized sender, within `window_secs`. Drives the post-completion
    /// cooldown.
    pub fn recent_completed_for_sender(
        &self,
        tenant: &TenantId,
        sender_normalized: &str,
        window_secs: i64,
        now: DateTime<Utc>,
    ) -> Result<Option<ConversationThread>> {
        let cutoff = (now - chrono::Duration::seconds(window_secs)).to_rfc3339();
        let pattern = format!("%{}%", sender_normalized);
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, agent_id, recipient, objective, current_turn,
                    max_turns, status, history, goal_achieved, goal_summary, persona,
                    context, created_at, last_activity_at, completed_at
             FROM conversation_threads
             WHERE tenant_id = ?1
               AND recipient LIKE ?2
               AND status IN ('completed', 'goal_achieved', 'timeout')
               AND completed_at >= ?3
             ORDER BY completed_at DESC
             LIMIT 1",
        )?;
        match stmt.query_row(
            rusqlite::params![tenant.as_str(), pattern, cutoff],
            row_to_thread,
        ) {
            Ok(t) => Ok(Some(t)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

fn row_to_thread(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationThread> {
    let status_str: String = row.get(7)?;
    let history_json: String = row.get(8)?;
    let context_json: String = row.get(12)?;
    let history: Vec<ThreadTurn> = serde_json::from_str(&history_json).unwrap_or_default();
    let context: ThreadContext = serde_json::from_str(&context_json).unwrap_or_default();

    Ok(ConversationThread {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        agent_id: row.get(2)?,
        recipient: row.get(3)?,
        objective: row.get(4)?,
        current_turn: row.get::<_, i64>(5)? as u32,
        max_turns: row.get::<_, i64>(6)? as u32,
        status: status_str.parse().unwrap_or(ThreadStatus::Completed),
        history,
        goal_achieved: row.get::<_, i64>(9)? != 0,
        goal_summary: row.get(10)?,
        persona: row.get(11)?,
        context,
        created_at: parse_ts(row.get::<_, String>(13)?),
        last_activity_at: parse_ts(row.get::<_, String>(14)?),
        completed_at: row.get::<_, Option<String>>(15)?.map(parse_ts),
    })
}

fn parse_ts(s: String) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(&s)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
