//! Agent rows and their store.

use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_agent::prompt::apply_persona;
use switchboard_agent::AgentProfile;
use switchboard_core::types::{Channel, IsolationMode, TenantId};

use crate::error::{Result, RouterError};

#[derive(Debug, Clone)]
pub struct Agent {
    pub id: i64,
    pub tenant_id: String,
    pub name: String,
    pub model_provider: String,
    pub model_name: String,
    pub system_prompt: String,
    pub memory_isolation: IsolationMode,
    /// Case-insensitive trigger substrings.
    pub keywords: Vec<String>,
    pub is_default: bool,
    pub is_active: bool,
    pub enabled_channels: Vec<String>,
    pub whatsapp_integration_id: Option<i64>,
    pub telegram_integration_id: Option<i64>,
    /// Contact row representing this agent, for `@name` mentions.
    pub contact_id: Option<i64>,
    /// The agent's own phone number, for self-loop protection.
    pub phone_number: Option<String>,
    pub response_template: String,
    pub contamination_patterns: Vec<String>,
    pub persona: Option<String>,
    /// TTS provider name when replies should also be voiced.
    pub tts_provider: Option<String>,
    pub auto_extract_facts: bool,
}

impl Agent {
    /// Channel validity: the channel must be enabled AND, when the agent is
    /// pinned to an integration, the watcher's instance must match.
    pub fn is_valid_for_channel(&self, channel: Channel, instance_id: Option<i64>) -> bool {
        if !self
            .enabled_channels
            .iter()
            .any(|c| c == channel.as_str())
        {
            return false;
        }
        let pinned = match channel {
            Channel::Whatsapp => self.whatsapp_integration_id,
            Channel::Telegram => self.telegram_integration_id,
            Channel::Playground => None,
        };
        match (pinned, instance_id) {
            (Some(pin), Some(instance)) => pin == instance,
            (Some(_), None) => false,
            (None, _) => true,
        }
    }

    pub fn to_profile(&self) -> AgentProfile {
        AgentProfile {
            id: self.id,
            tenant_id: TenantId::new(self.tenant_id.clone()),
            name: self.name.clone(),
            model_provider: self.model_provider.clone(),
            model_name: self.model_name.clone(),
            system_prompt: apply_persona(&self.system_prompt, self.persona.as_deref()),
            response_template: self.response_template.clone(),
            isolation_mode: self.memory_isolation,
            contamination_patterns: self.contamination_patterns.clone(),
        }
    }
}

/// Initialise the agents table. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS agents (
            id                      INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id               TEXT NOT NULL,
            name                    TEXT NOT NULL,
            model_provider          TEXT NOT NULL,
            model_name              TEXT NOT NULL,
            system_prompt           TEXT NOT NULL DEFAULT '',
            memory_isolation        TEXT NOT NULL DEFAULT 'isolated',
            keywords                TEXT NOT NULL DEFAULT '[]',
            is_default              INTEGER NOT NULL DEFAULT 0,
            is_active               INTEGER NOT NULL DEFAULT 1,
            enabled_channels        TEXT NOT NULL DEFAULT '[\"playground\",\"whatsapp\"]',
            whatsapp_integration_id INTEGER,
            telegram_integration_id INTEGER,
            contact_id              INTEGER,
            phone_number            TEXT,
            response_template       TEXT NOT NULL DEFAULT '@{agent_name}: {response}',
            contamination_patterns  TEXT NOT NULL DEFAULT '[]',
            persona                 TEXT,
            tts_provider            TEXT,
            auto_extract_facts      INTEGER NOT NULL DEFAULT 1,
            created_at              TEXT NOT NULL,
            updated_at              TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_agents_tenant
            ON agents(tenant_id, is_active);",
    )
}

pub struct AgentStore {
    db: Arc<Mutex<Connection>>,
}

impl AgentStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn insert(&self, agent: &Agent) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO agents
             (tenant_id, name, model_provider, model_name, system_prompt, memory_isolation,
              keywords, is_default, is_active, enabled_channels, whatsapp_integration_id,
              telegram_integration_id, contact_id, phone_number, response_template,
              contamination_patterns, persona, tts_provider, auto_extract_facts,
              created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                     ?17, ?18, ?19, ?20, ?20)",
            rusqlite::params![
                agent.tenant_id,
                agent.name,
                agent.model_provider,
                agent.model_name,
                agent.system_prompt,
                agent.memory_isolation.as_str(),
                serde_json::to_string(&agent.keywords).unwrap_or_else(|_| "[]".into()),
                agent.is_default as i64,
                agent.is_active as i64,
                serde_json::to_string(&agent.enabled_channels).unwrap_or_else(|_| "[]".into()),
                agent.whatsapp_integration_id,
                agent.telegram_integration_id,
                agent.contact_id,
                agent.phone_number,
                agent.response_template,
                serde_json::to_string(&agent.contamination_patterns)
                    .unwrap_or_else(|_| "[]".into()),
                agent.persona,
                agent.tts_provider,
                agent.auto_extract_facts as i64,
                now,
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get(&self, tenant: &TenantId, agent_id: i64) -> Result<Agent> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!("{} WHERE id = ?1 AND tenant_id = ?2", SELECT))?;
        match stmt.query_row(rusqlite::params![agent_id, tenant.as_str()], row_to_agent) {
            Ok(a) => Ok(a),
            Err(rusqlite::Error::QueryReturnedNoRows) => Err(RouterError::AgentNotFound(agent_id)),
            Err(e) => Err(e.into()),
        }
    }

    pub fn active_agents(&self, tenant: &TenantId) -> Result<Vec<Agent>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND is_active = 1 ORDER BY id",
            SELECT
        ))?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], row_to_agent)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn default_agent(&self, tenant: &TenantId) -> Result<Option<Agent>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND is_default = 1 AND is_active = 1 LIMIT 1",
            SELECT
        ))?;
        match stmt.query_row(rusqlite::params![tenant.as_str()], row_to_agent) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub fn agent_by_contact(&self, tenant: &TenantId, contact_id: i64) -> Result<Option<Agent>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND contact_id = ?2 AND is_active = 1 LIMIT 1",
            SELECT
        ))?;
        match stmt.query_row(rusqlite::params![tenant.as_str(), contact_id], row_to_agent) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Every phone number owned by an agent in this tenant, for the
    /// self-loop guard.
    pub fn agent_phone_numbers(&self, tenant: &TenantId) -> Result<Vec<String>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT phone_number FROM agents
             WHERE tenant_id = ?1 AND phone_number IS NOT NULL",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], |row| {
            row.get::<_, String>(0)
        })?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn find_by_name(&self, tenant: &TenantId, name: &str) -> Result<Option<Agent>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(&format!(
            "{} WHERE tenant_id = ?1 AND LOWER(name) = LOWER(?2) AND is_active = 1 LIMIT 1",
            SELECT
        ))?;
        match stmt.query_row(rusqlite::params![tenant.as_str(), name], row_to_agent) {
            Ok(a) => Ok(Some(a)),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }
}

const SELECT: &str = "SELECT id, tenant_id, name, model_provider, model_name, system_prompt,
        memory_isolation, keywords, is_default, is_active, enabled_channels,
        whatsapp_integration_id, telegram_integration_id, contact_id, phone_number,
        response_template, contamination_patterns, persona, tts_provider,
        auto_extract_facts
 FROM agents";

fn row_to_agent(row: &rusqlite::Row<'_>) -> rusqlite::Result<Agent> {
    let isolation: String = row.get(6)?;
    let keywords: String = row.get(7)?;
    let channels: String = row.get(10)?;
    let patterns: String = row.get(16)?;
    Ok(Agent {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        model_provider: row.get(3)?,
        model_name: row.get(4)?,
        system_prompt: row.get(5)?,
        memory_isolation: isolation.parse().unwrap_or_default(),
        keywords: serde_json::from_str(&keywords).unwrap_or_default(),
        is_default: row.get::<_, i64>(8)? != 0,
        is_active: row.get::<_, i64>(9)? != 0,
        enabled_channels: serde_json::from_str(&channels).unwrap_or_default(),
        whatsapp_integration_id: row.get(11)?,
        telegram_integration_id: row.get(12)?,
        contact_id: row.get(13)?,
        phone_number: row.get(14)?,
        response_template: row.get(15)?,
        contamination_patterns: serde_json::from_str(&patterns).unwrap_or_default(),
        persona: row.get(17)?,
        tts_provider: row.get(18)?,
        auto_extract_facts: row.get::<_, i64>(19)? != 0,
    })
}

#[cfg(test)]
pub fn sample_agent(tenant: &str, name: &str) -> Agent {
    Agent {
        id: 0,
        tenant_id: tenant.to_string(),
        name: name.to_string(),
        model_provider: "anthropic".to_string(),
        model_name: "claude-sonnet-4-6".to_string(),
        system_prompt: "You are a helpful assistant.".to_string(),
        memory_isolation: IsolationMode::Isolated,
        keywords: Vec::new(),
        is_default: false,
        is_active: true,
        enabled_channels: vec!["playground".into(), "whatsapp".into(), "telegram".into()],
        whatsapp_integration_id: None,
        telegram_integration_id: None,
        contact_id: None,
        phone_number: None,
        response_template: "@{agent_name}: {response}".to_string(),
        contamination_patterns: Vec::new(),
        persona: None,
        tts_provider: None,
        auto_extract_facts: true,
    }
}
