use rusqlite::Connection;

/// Initialise the agent-skill assignment table. Safe to call on every
/// startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agent_skills (
            agent_id   INTEGER NOT NULL,
            skill_type TEXT NOT NULL,
            is_enabled INTEGER NOT NULL DEFAULT 1,
            config     TEXT NOT NULL DEFAULT '{}',
            created_at TEXT NOT NULL,
            UNIQUE(agent_id, skill_type)
        );",
    )
}
