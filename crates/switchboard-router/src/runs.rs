//! Agent-run records: one row per agent invocation.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_core::types::TenantId;

use crate::error::Result;

const PREVIEW_CHARS: usize = 500;

/// Initialise the agent-runs table. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_runs (
            id                INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id         TEXT NOT NULL,
            agent_id          INTEGER NOT NULL,
            trigger_type      TEXT NOT NULL,
            sender_key        TEXT NOT NULL,
            input_preview     TEXT,
            output_preview    TEXT,
            tokens_in         INTEGER NOT NULL DEFAULT 0,
            tokens_out        INTEGER NOT NULL DEFAULT 0,
            skill_used        TEXT,
            tool_used         TEXT,
            execution_time_ms INTEGER NOT NULL DEFAULT 0,
            status            TEXT NOT NULL DEFAULT 'processing',
            error             TEXT,
            created_at        TEXT NOT NULL,
            finished_at       TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_runs_agent
            ON agent_runs(tenant_id, agent_id, created_at DESC);",
    )
}

#[derive(Debug, Clone, Default)]
pub struct RunCompletion<'a> {
    pub output: Option<&'a str>,
    pub tokens_in: u64,
    pub tokens_out: u64,
    pub skill_used: Option<&'a str>,
    pub tool_used: Option<&'a str>,
    pub execution_time_ms: u64,
    pub error: Option<&'a str>,
}

pub struct AgentRunStore {
    db: Arc<Mutex<Connection>>,
}

impl AgentRunStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Open a run in `processing` state; returns its id.
    pub fn start(
        &self,
        tenant: &TenantId,
        agent_id: i64,
        trigger_type: &str,
        sender_key: &str,
        input: &str,
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_runs
             (tenant_id, agent_id, trigger_type, sender_key, input_preview, status, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'processing', ?6)",
            rusqlite::params![
                tenant.as_str(),
                agent_id,
                trigger_type,
                sender_key,
                preview(input),
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn finish(&self, run_id: i64, completion: &RunCompletion<'_>) -> Result<()> {
        let status = if completion.error.is_some() {
            "error"
        } else {
            "success"
        };
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE agent_runs
             SET output_preview = ?1, tokens_in = ?2, tokens_out = ?3, skill_used = ?4,
                 tool_used = ?5, execution_time_ms = ?6, status = ?7, error = ?8,
                 finished_at = ?9
             WHERE id = ?10",
            rusqlite::params![
                completion.output.map(preview),
                completion.tokens_in as i64,
                completion.tokens_out as i64,
                completion.skill_used,
                completion.tool_used,
                completion.execution_time_ms as i64,
                status,
                completion.error,
                now,
                run_id
            ],
        )?;
        Ok(())
    }

    pub fn count_for_sender(&self, tenant: &TenantId, sender_key: &str) -> Result<i64> {
        let conn = self.db.lock().unwrap();
        let n = conn.query_row(
            "SELECT COUNT(*) FROM agent_runs WHERE tenant_id = ?1 AND sender_key = ?2",
            rusqlite::params![tenant.as_str(), sender_key],
            |row| row.get(0),
        )?;
        Ok(n)
    }
}

fn preview(text: &str) -> String {
    let mut cut = text.len().min(PREVIEW_CHARS);
    while cut > 0 && !text.is_char_boundary(cut) {
        cut -= 1;
    }
    text[..cut].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lifecycle_and_status() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let runs = AgentRunStore::new(Arc::new(Mutex::new(conn)));
        let tenant = TenantId::default_tenant();

        let id = runs.start(&tenant, 1, "message", "u", "hello world").unwrap();
        runs.finish(
            id,
            &RunCompletion {
                output: Some("hi!"),
                tokens_in: 10,
                tokens_out: 4,
                execution_time_ms: 120,
                ..Default::default()
            },
        )
        .unwrap();
        assert_eq!(runs.count_for_sender(&tenant, "u").unwrap(), 1);
    }

    #[test]
    fn error_sets_error_status() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let db = Arc::new(Mutex::new(conn));
        let runs = AgentRunStore::new(Arc::clone(&db));
        let tenant = TenantId::default_tenant();

        let id = runs.start(&tenant, 1, "message", "u", "boom").unwrap();
        runs.finish(
            id,
            &RunCompletion {
                error: Some("provider timeout"),
                ..Default::default()
            },
        )
        .unwrap();

        let status: String = db
            .lock()
            .unwrap()
            .query_row(
                "SELECT status FROM agent_runs WHERE id = ?1",
                rusqlite::params![id],
                |row| row.get(0),
            )
            .unwrap();
        assert_eq!(status, "error");
    }
}
