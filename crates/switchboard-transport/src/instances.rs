//! Transport instance rows: one per live WhatsApp MCP container or
//! Telegram bot.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_core::types::{Channel, TenantId};

use crate::error::{Result, TransportError};

/// Instance roles. TESTER instances exist for QA and are never used to
/// deliver agent replies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceType {
    Agent,
    Tester,
}

impl InstanceType {
    pub fn as_str(&self) -> &'static str {
        match self {
            InstanceType::Agent => "AGENT",
            InstanceType::Tester => "TESTER",
        }
    }
}

impl std::str::FromStr for InstanceType {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "AGENT" => Ok(InstanceType::Agent),
            "TESTER" => Ok(InstanceType::Tester),
            other => Err(format!("unknown instance type: {}", other)),
        }
    }
}

#[derive(Debug, Clone)]
pub struct TransportInstance {
    pub id: i64,
    pub tenant_id: String,
    pub channel: Channel,
    pub phone_number: Option<String>,
    /// MCP API base URL (WhatsApp) or empty for Telegram.
    pub api_url: String,
    pub api_secret: Option<String>,
    /// Telegram bot token, when `channel == Telegram`.
    pub bot_token: Option<String>,
    pub status: String,
    pub instance_type: InstanceType,
    pub is_group_handler: bool,
    pub created_at: String,
}

/// Initialise the instances table. Safe to call on every startup
/// (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS transport_instances (
            id               INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id        TEXT NOT NULL,
            channel          TEXT NOT NULL,
            phone_number     TEXT,
            api_url          TEXT NOT NULL DEFAULT '',
            api_secret       TEXT,
            bot_token        TEXT,
            status           TEXT NOT NULL DEFAULT 'running',
            instance_type    TEXT NOT NULL DEFAULT 'AGENT',
            is_group_handler INTEGER NOT NULL DEFAULT 0,
            created_at       TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_instances_tenant
            ON transport_instances(tenant_id, channel, status);",
    )
}

pub struct InstanceStore {
    db: Arc<Mutex<Connection>>,
}

impl InstanceStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn insert(&self, instance: &TransportInstance) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO transport_instances
             (tenant_id, channel, phone_number, api_url, api_secret, bot_token, status,
              instance_type, is_group_handler, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            rusqlite::params![
                instance.tenant_id,
                instance.channel.as_str(),
                instance.phone_number,
                instance.api_url,
                instance.api_secret,
                instance.bot_token,
                instance.status,
                instance.instance_type.as_str(),
                instance.is_group_handler as i64,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, id: i64) -> Result<TransportInstance> {
        let conn = self.db.lock().unwrap();
        match conn.query_row(
            &format!("{} WHERE id = ?1", SELECT),
            rusqlite::params![id],
            row_to_instance,
        ) {
            Ok(i) => Ok(i),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(TransportError::InstanceNotFound(id)),
            Err(e) => Err(e.into()),
        }
    }

    /// Live instances ("running" or "starting") for one tenant.
    pub fn list_active(&self, tenant: &TenantId) -> Result<Vec<TransportInstance>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND status IN ('running', 'starting') ORDER BY id",
            SELECT
        ))?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], row_to_instance)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// The tenant's first active AGENT-type WhatsApp instance, used when an
    /// agent has no pinned integration. TESTER instances never qualify.
    pub fn first_agent_whatsapp(&self, tenant: &TenantId) -> Result<Option<TransportInstance>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND channel = 'whatsapp'
                 AND status IN ('running', 'starting') AND instance_type = 'AGENT'
             ORDER BY id LIMIT 1",
            SELECT
        ))?;
        match stmt.query_row(rusqlite::params![tenant.as_str()], row_to_instance) {
            Ok(i) => Ok(Some(i)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Flip the group-handler flag to exactly one instance per tenant.
    pub fn set_group_handler(&self, tenant: &TenantId, instance_id: i64) -> Result<()> {
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE transport_instances SET is_group_handler = 0 WHERE tenant_id = ?1",
            rusqlite::params![tenant.as_str()],
        )?;
        conn.execute(
            "UPDATE transport_instances SET is_group_handler = 1
             WHERE tenant_id = ?1 AND id = ?2",
            rusqlite::params![tenant.as_str(), instance_id],
        )?;
        Ok(())
    }
}

const SELECT: &str = "SELECT id, tenant_id, channel, phone_number, api_url, api_secret,
        bot_token, status, instance_type, is_group_handler, created_at
 FROM transport_instances";

fn row_to_instance(row: &rusqlite::Row<'_>) -> rusqlite::Result<TransportInstance> {
    let channel: String = row.get(2)?;
    let itype: String = row.get(8)?;
    Ok(TransportInstance {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        channel: channel.parse().unwrap_or(Channel::Whatsapp),
        phone_number: row.get(3)?,
        api_url: row.get(4)?,
        api_secret: row.get(5)?,
        bot_token: row.get(6)?,
        status: row.get(7)?,
        instance_type: itype.parse().unwrap_or(InstanceType::Agent),
        is_group_handler: row.get::<_, i64>(9)? != 0,
        created_at: row.get(10)?,
    })
}

#[cfg(test)]
pub fn sample_instance(tenant: &str, channel: Channel) -> TransportInstance {
    TransportInstance {
        id: 0,
        tenant_id: tenant.to_string(),
        channel,
        phone_number: Some("5511666660000".to_string()),
        api_url: "http://localhost:9901".to_string(),
        api_secret: Some("secret".to_string()),
        bot_token: None,
        status: "running".to_string(),
        instance_type: InstanceType::Agent,
        is_group_handler: false,
        created_at: String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> InstanceStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        InstanceStore::new(Arc::new(Mutex::new(conn)))
    }

    #[test]
    fn group_handler_election_is_exclusive() {
        let s = store();
        let tenant = TenantId::default_tenant();
        let a = s.insert(&sample_instance("default", Channel::Whatsapp)).unwrap();
        let b = s.insert(&sample_instance("default", Channel::Whatsapp)).unwrap();

        s.set_group_handler(&tenant, a).unwrap();
        s.set_group_handler(&tenant, b).unwrap();

        assert!(!s.get(a).unwrap().is_group_handler);
        assert!(s.get(b).unwrap().is_group_handler);
    }

    #[test]
    fn tester_instances_are_never_the_send_fallback() {
        let s = store();
        let tenant = TenantId::default_tenant();
        let mut tester = sample_instance("default", Channel::Whatsapp);
        tester.instance_type = InstanceType::Tester;
        s.insert(&tester).unwrap();
        assert!(s.first_agent_whatsapp(&tenant).unwrap().is_none());

        s.insert(&sample_instance("default", Channel::Whatsapp)).unwrap();
        assert!(s.first_agent_whatsapp(&tenant).unwrap().is_some());
    }
}
