use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use switchboard_core::types::{AgentId, TenantId};

use crate::error::Result;

/// Sticky `/invoke` preferences: sender identifier → agent.
///
/// Overrides every routing heuristic until explicitly cleared or the agent
/// stops being valid for the channel (the router clears it then).
pub struct SessionStore {
    db: Arc<Mutex<Connection>>,
}

impl SessionStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn set(&self, tenant: &TenantId, user_identifier: &str, agent_id: AgentId) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO user_agent_sessions
             (user_identifier, tenant_id, agent_id, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![user_identifier, tenant.as_str(), agent_id, now],
        )?;
        info!(tenant = %tenant, user_identifier, agent_id, "agent preference saved");
        Ok(())
    }

    pub fn get(&self, tenant: &TenantId, user_identifier: &str) -> Result<Option<AgentId>> {
        let conn = self.db.lock().unwrap();
        match conn.query_row(
            "SELECT agent_id FROM user_agent_sessions
             WHERE tenant_id = ?1 AND user_identifier = ?2",
            rusqlite::params![tenant.as_str(), user_identifier],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(id) => Ok(Some(id)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn clear(&self, tenant: &TenantId, user_identifier: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM user_agent_sessions
             WHERE tenant_id = ?1 AND user_identifier = ?2",
            rusqlite::params![tenant.as_str(), user_identifier],
        )?;
        Ok(rows > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> SessionStore {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SessionStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn set_get_clear_round_trip() {
        let s = store();
        let t = TenantId::default_tenant();
        assert!(s.get(&t, "5511999990000").unwrap().is_none());

        s.set(&t, "5511999990000", 7).unwrap();
        assert_eq!(s.get(&t, "5511999990000").unwrap(), Some(7));

        // Re-invoking replaces the previous preference.
        s.set(&t, "5511999990000", 9).unwrap();
        assert_eq!(s.get(&t, "5511999990000").unwrap(), Some(9));

        assert!(s.clear(&t, "5511999990000").unwrap());
        assert!(s.get(&t, "5511999990000").unwrap().is_none());
    }

    #[test]
    fn sessions_are_tenant_scoped() {
        let s = store();
        s.set(&TenantId::new("a"), "user1", 1).unwrap();
        assert!(s.get(&TenantId::new("b"), "user1").unwrap().is_none());
    }
}
