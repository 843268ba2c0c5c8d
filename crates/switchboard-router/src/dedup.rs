//! Durable message-id cache: the idempotence anchor.
//!
//! `(tenant, external id)` is globally unique. The first observation
//! inserts the row; every later observation of the same id is a no-op and
//! the message must not be processed again.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::debug;

use switchboard_core::message::InboundMessage;
use switchboard_core::types::TenantId;

use crate::error::Result;

/// Initialise the cache table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS message_cache (
            source_id   TEXT NOT NULL,
            tenant_id   TEXT NOT NULL,
            chat_id     TEXT NOT NULL DEFAULT '',
            chat_name   TEXT,
            sender      TEXT,
            sender_name TEXT,
            body        TEXT NOT NULL DEFAULT '',
            timestamp   INTEGER NOT NULL DEFAULT 0,
            is_group    INTEGER NOT NULL DEFAULT 0,
            channel     TEXT,
            created_at  TEXT NOT NULL,
            UNIQUE(tenant_id, source_id)
        );",
    )
}

pub struct DuplicateCache {
    db: Arc<Mutex<Connection>>,
}

impl DuplicateCache {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Record the message. Returns `true` on first observation, `false` on
    /// a duplicate.
    pub fn observe(&self, tenant: &TenantId, msg: &InboundMessage) -> Result<bool> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO message_cache
             (source_id, tenant_id, chat_id, chat_name, sender, sender_name, body,
              timestamp, is_group, channel, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            rusqlite::params![
                msg.id,
                tenant.as_str(),
                msg.chat_id,
                msg.chat_name,
                msg.sender,
                msg.sender_name,
                msg.body,
                msg.timestamp,
                msg.is_group as i64,
                msg.channel.as_str(),
                now
            ],
        )?;
        if inserted == 0 {
            debug!(message_id = %msg.id, "duplicate message observation ignored");
        }
        Ok(inserted > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::types::Channel;

    fn msg(id: &str) -> InboundMessage {
        InboundMessage {
            id: id.to_string(),
            sender: "s".into(),
            sender_name: None,
            body: "hello".into(),
            chat_id: "c".into(),
            chat_name: None,
            is_group: false,
            timestamp: 1,
            media_type: None,
            media_url: None,
            media_path: None,
            channel: Channel::Whatsapp,
            telegram_id: None,
        }
    }

    #[test]
    fn second_observation_is_a_noop() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let cache = DuplicateCache::new(Arc::new(Mutex::new(conn)));
        let tenant = TenantId::default_tenant();

        assert!(cache.observe(&tenant, &msg("m1")).unwrap());
        assert!(!cache.observe(&tenant, &msg("m1")).unwrap());
        assert!(cache.observe(&tenant, &msg("m2")).unwrap());
    }

    #[test]
    fn same_id_in_different_tenants_is_distinct() {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        let cache = DuplicateCache::new(Arc::new(Mutex::new(conn)));

        assert!(cache.observe(&TenantId::new("a"), &msg("m1")).unwrap());
        assert!(cache.observe(&TenantId::new("b"), &msg("m1")).unwrap());
    }
}
