use rusqlite::{Connection, Result};

/// Initialise memory tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS working_memory (
            agent_id    INTEGER NOT NULL,
            memory_key  TEXT NOT NULL,
            entries     TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(agent_id, memory_key)
        );

        CREATE TABLE IF NOT EXISTS vectors (
            collection  TEXT NOT NULL,
            id          TEXT NOT NULL,
            embedding   BLOB NOT NULL,
            text        TEXT NOT NULL,
            metadata    TEXT NOT NULL DEFAULT '{}',
            created_at  TEXT NOT NULL,
            UNIQUE(collection, id)
        );
        CREATE INDEX IF NOT EXISTS idx_vectors_collection
            ON vectors(collection);

        CREATE TABLE IF NOT EXISTS facts (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            agent_id    INTEGER NOT NULL,
            user_key    TEXT NOT NULL,
            topic       TEXT NOT NULL,
            key         TEXT NOT NULL,
            value       TEXT NOT NULL,
            confidence  REAL NOT NULL DEFAULT 0.8,
            observations INTEGER NOT NULL DEFAULT 1,
            learned_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            UNIQUE(agent_id, user_key, topic, key)
        );
        CREATE INDEX IF NOT EXISTS idx_facts_user
            ON facts(agent_id, user_key);

        CREATE TABLE IF NOT EXISTS shared_knowledge (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id       TEXT NOT NULL,
            shared_by_agent INTEGER NOT NULL,
            content         TEXT NOT NULL,
            topic           TEXT NOT NULL DEFAULT 'general',
            access_level    TEXT NOT NULL DEFAULT 'public',
            accessible_to   TEXT NOT NULL DEFAULT '[]',
            created_at      TEXT NOT NULL,
            updated_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_shared_tenant
            ON shared_knowledge(tenant_id);",
    )
}
