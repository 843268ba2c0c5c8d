use rusqlite::{Connection, Result};

/// Initialise contact tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS contacts (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id     TEXT NOT NULL,
            friendly_name TEXT NOT NULL,
            role          TEXT NOT NULL DEFAULT 'user',
            is_active     INTEGER NOT NULL DEFAULT 1,
            phone_number  TEXT,
            whatsapp_id   TEXT,
            created_at    TEXT NOT NULL,
            updated_at    TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_contacts_tenant
            ON contacts(tenant_id);
        CREATE INDEX IF NOT EXISTS idx_contacts_phone
            ON contacts(tenant_id, phone_number);
        CREATE INDEX IF NOT EXISTS idx_contacts_whatsapp
            ON contacts(tenant_id, whatsapp_id);

        CREATE TABLE IF NOT EXISTS contact_channel_mappings (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id   TEXT NOT NULL,
            contact_id  INTEGER NOT NULL,
            kind        TEXT NOT NULL,
            identifier  TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(tenant_id, kind, identifier)
        );
        CREATE INDEX IF NOT EXISTS idx_channel_mappings_contact
            ON contact_channel_mappings(contact_id);

        CREATE TABLE IF NOT EXISTS contact_agent_mappings (
            contact_id  INTEGER NOT NULL,
            agent_id    INTEGER NOT NULL,
            tenant_id   TEXT NOT NULL,
            created_at  TEXT NOT NULL,
            UNIQUE(contact_id)
        );

        CREATE TABLE IF NOT EXISTS user_agent_sessions (
            user_identifier TEXT NOT NULL,
            tenant_id       TEXT NOT NULL,
            agent_id        INTEGER NOT NULL,
            created_at      TEXT NOT NULL,
            UNIQUE(tenant_id, user_identifier)
        );",
    )
}
