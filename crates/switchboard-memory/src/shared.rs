//! Tenant-scoped shared-knowledge pool (layer 4).

use std::sync::{Arc, Mutex};

use rusqlite::Connection;
use tracing::info;

use switchboard_core::types::TenantId;

use crate::error::Result;
use crate::types::{AccessLevel, SharedKnowledge};

pub struct SharedKnowledgePool {
    db: Arc<Mutex<Connection>>,
}

impl SharedKnowledgePool {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn share(
        &self,
        tenant: &TenantId,
        shared_by_agent: i64,
        content: &str,
        topic: &str,
        access_level: AccessLevel,
        accessible_to: &[i64],
    ) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let acl = serde_json::to_string(accessible_to)?;
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO shared_knowledge
             (tenant_id, shared_by_agent, content, topic, access_level, accessible_to,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)",
            rusqlite::params![
                tenant.as_str(),
                shared_by_agent,
                content,
                topic,
                access_level.as_str(),
                acl,
                now
            ],
        )?;
        let id = conn.last_insert_rowid();
        info!(tenant = %tenant, shared_by_agent, topic, "knowledge shared");
        Ok(id)
    }

    /// Items the given agent may read: everything public in its tenant, its
    /// own items, and restricted items whose ACL names it. Private items are
    /// visible only to their author.
    pub fn accessible_to(&self, tenant: &TenantId, agent_id: i64) -> Result<Vec<SharedKnowledge>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, shared_by_agent, content, topic, access_level,
                    accessible_to, created_at
             FROM shared_knowledge
             WHERE tenant_id = ?1
             ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], row_to_item)?;

        Ok(rows
            .filter_map(|r| r.ok())
            .filter(|item| {
                item.shared_by_agent == agent_id
                    || match item.access_level {
                        AccessLevel::Public => true,
                        AccessLevel::Restricted => item.accessible_to.contains(&agent_id),
                        AccessLevel::Private => false,
                    }
            })
            .collect())
    }

    pub fn delete(&self, tenant: &TenantId, id: i64) -> Result<bool> {
        let conn = self.db.lock().unwrap();
        let rows = conn.execute(
            "DELETE FROM shared_knowledge WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), id],
        )?;
        Ok(rows > 0)
    }
}

fn row_to_item(row: &rusqlite::Row<'_>) -> rusqlite::Result<SharedKnowledge> {
    let level_str: String = row.get(5)?;
    let acl_str: String = row.get(6)?;
    Ok(SharedKnowledge {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        shared_by_agent: row.get(2)?,
        content: row.get(3)?,
        topic: row.get(4)?,
        access_level: level_str.parse().unwrap_or(AccessLevel::Private),
        accessible_to: serde_json::from_str(&acl_str).unwrap_or_default(),
        created_at: row.get(7)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pool() -> SharedKnowledgePool {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        SharedKnowledgePool::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn public_items_visible_to_all_tenant_agents() {
        let p = pool();
        let t = TenantId::default_tenant();
        p.share(&t, 1, "the user prefers pt-BR", "preferences", AccessLevel::Public, &[])
            .unwrap();

        assert_eq!(p.accessible_to(&t, 2).unwrap().len(), 1);
    }

    #[test]
    fn restricted_items_honor_acl() {
        let p = pool();
        let t = TenantId::default_tenant();
        p.share(&t, 1, "vip customer", "general", AccessLevel::Restricted, &[3])
            .unwrap();

        assert!(p.accessible_to(&t, 2).unwrap().is_empty());
        assert_eq!(p.accessible_to(&t, 3).unwrap().len(), 1);
        // The author always sees its own items.
        assert_eq!(p.accessible_to(&t, 1).unwrap().len(), 1);
    }

    #[test]
    fn private_items_visible_only_to_author() {
        let p = pool();
        let t = TenantId::default_tenant();
        p.share(&t, 1, "draft note", "general", AccessLevel::Private, &[])
            .unwrap();
        assert!(p.accessible_to(&t, 2).unwrap().is_empty());
        assert_eq!(p.accessible_to(&t, 1).unwrap().len(), 1);
    }

    #[test]
    fn pool_is_tenant_scoped() {
        let p = pool();
        p.share(
            &TenantId::new("a"),
            1,
            "tenant-a secret",
            "general",
            AccessLevel::Public,
            &[],
        )
        .unwrap();
        assert!(p
            .accessible_to(&TenantId::new("b"), 1)
            .unwrap()
            .is_empty());
    }
}
