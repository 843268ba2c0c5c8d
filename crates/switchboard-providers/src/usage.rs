//! Per-call usage/cost events.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_core::types::TenantId;

use crate::error::Result;
use crate::types::UsageUnits;

/// Initialise the usage table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS usage_events (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id        TEXT NOT NULL,
            operation_type   TEXT NOT NULL,
            provider         TEXT NOT NULL,
            model            TEXT,
            agent_id         INTEGER,
            sender_key       TEXT,
            message_id       TEXT,
            prompt_units     INTEGER NOT NULL DEFAULT 0,
            completion_units INTEGER NOT NULL DEFAULT 0,
            success          INTEGER NOT NULL DEFAULT 1,
            error_kind       TEXT,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_usage_tenant
            ON usage_events(tenant_id, created_at);",
    )
}

#[derive(Debug, Clone, Default)]
pub struct UsageEvent<'a> {
    pub operation_type: &'a str,
    pub provider: &'a str,
    pub model: Option<&'a str>,
    pub agent_id: Option<i64>,
    pub sender_key: Option<&'a str>,
    pub message_id: Option<&'a str>,
    pub units: UsageUnits,
    pub success: bool,
    pub error_kind: Option<&'a str>,
}

pub struct UsageTracker {
    db: Arc<Mutex<Connection>>,
}

impl UsageTracker {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn record(&self, tenant: &TenantId, event: &UsageEvent<'_>) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO usage_events
             (tenant_id, operation_type, provider, model, agent_id, sender_key,
              message_id, prompt_units, completion_units, success, error_kind, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            rusqlite::params![
                tenant.as_str(),
                event.operation_type,
                event.provider,
                event.model,
                event.agent_id,
                event.sender_key,
                event.message_id,
                event.units.prompt_units as i64,
                event.units.completion_units as i64,
                event.success as i64,
                event.error_kind,
                now
            ],
        )?;
        Ok(())
    }
}
