//! Project mode: `/project enter <name>` scopes a sender's memory and
//! annotates their messages with project context until `/project exit`.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_core::types::TenantId;

use crate::error::Result;

/// Initialise project tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS projects (
            id         INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id  TEXT NOT NULL,
            name       TEXT NOT NULL,
            created_at TEXT NOT NULL,
            UNIQUE(tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS project_sessions (
            tenant_id  TEXT NOT NULL,
            sender_key TEXT NOT NULL,
            project_id INTEGER NOT NULL,
            entered_at TEXT NOT NULL,
            UNIQUE(tenant_id, sender_key)
        );",
    )
}

#[derive(Debug, Clone)]
pub struct Project {
    pub id: i64,
    pub name: String,
}

pub struct ProjectStore {
    db: Arc<Mutex<Connection>>,
}

impl ProjectStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    /// Find by name, creating the project on first entry.
    pub fn get_or_create(&self, tenant: &TenantId, name: &str) -> Result<Project> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT OR IGNORE INTO projects (tenant_id, name, created_at) VALUES (?1, ?2, ?3)",
            rusqlite::params![tenant.as_str(), name, now],
        )?;
        let id = conn.query_row(
            "SELECT id FROM projects WHERE tenant_id = ?1 AND name = ?2",
            rusqlite::params![tenant.as_str(), name],
            |row| row.get(0),
        )?;
        Ok(Project {
            id,
            name: name.to_string(),
        })
    }

    pub fn enter(&self, tenant: &TenantId, sender_key: &str, project_id: i64) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT OR REPLACE INTO project_sessions (tenant_id, sender_key, project_id, entered_at)
             VALUES (?1, ?2, ?3, ?4)",
            rusqlite::params![tenant.as_str(), sender_key, project_id, now],
        )?;
        Ok(())
    }

    pub fn exit(&self, tenant: &TenantId, sender_key: &str) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM project_sessions WHERE tenant_id = ?1 AND sender_key = ?2",
            rusqlite::params![tenant.as_str(), sender_key],
        )?;
        Ok(rows > 0)
    }

    /// The sender's current project, if they entered one.
    pub fn current(&self, tenant: &TenantId, sender_key: &str) -> Result<Option<Project>> {
        let conn = self.db.lock().unwrap();
        match conn.query_row(
            "SELECT p.id, p.name FROM project_sessions s
             JOIN projects p ON p.id = s.project_id
             WHERE s.tenant_id = ?1 AND s.sender_key = ?2",
            rusqlite::params![tenant.as_str(), sender_key],
            |row| {
                Ok(Project {
                    id: row.get(0)?,
                    name: row.get(1)?,
                })
            },
        ) {
            Ok(p) => Ok(Some(p)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> ProjectStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ProjectStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn enter_current_exit_round_trip() {
        let s = store();
        let tenant = TenantId::default_tenant();
        let project = s.get_or_create(&tenant, "apollo").unwrap();
        s.enter(&tenant, "u1", project.id).unwrap();

        let current = s.current(&tenant, "u1").unwrap().unwrap();
        assert_eq!(current.name, "apollo");
        assert!(s.current(&tenant, "u2").unwrap().is_none());

        assert!(s.exit(&tenant, "u1").unwrap());
        assert!(s.current(&tenant, "u1").unwrap().is_none());
        assert!(!s.exit(&tenant, "u1").unwrap());
    }

    #[test]
    fn get_or_create_is_idempotent() {
        let s = store();
        let tenant = TenantId::default_tenant();
        let a = s.get_or_create(&tenant, "apollo").unwrap();
        let b = s.get_or_create(&tenant, "apollo").unwrap();
        assert_eq!(a.id, b.id);
    }
}
