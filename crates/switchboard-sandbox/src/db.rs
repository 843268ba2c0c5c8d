use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use switchboard_core::types::TenantId;

use crate::error::{Result, SandboxError};
use crate::types::{SandboxedTool, SandboxedToolCommand};

/// Initialise sandbox tables. Safe to call on every startup (idempotent).
///
/// Commands and parameters are stored as a JSON manifest on the tool row;
/// manifests are authored by the admin surface and read-only here.
pub fn init_db(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS sandboxed_tools (
            id             INTEGER PRIMARY KEY AUTOINCREMENT,
            tenant_id      TEXT NOT NULL,
            name           TEXT NOT NULL,
            description    TEXT NOT NULL DEFAULT '',
            container_name TEXT,
            commands       TEXT NOT NULL DEFAULT '[]',
            created_at     TEXT NOT NULL,
            updated_at     TEXT NOT NULL,
            UNIQUE(tenant_id, name)
        );

        CREATE TABLE IF NOT EXISTS tool_executions (
            id           TEXT PRIMARY KEY,
            tool_id      INTEGER NOT NULL,
            tenant_id    TEXT NOT NULL,
            command_name TEXT NOT NULL,
            parameters   TEXT NOT NULL DEFAULT '{}',
            status       TEXT NOT NULL DEFAULT 'pending',
            stdout       TEXT,
            stderr       TEXT,
            exit_code    INTEGER,
            agent_run_id INTEGER,
            started_at   TEXT NOT NULL,
            finished_at  TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_tool_exec_tool
            ON tool_executions(tool_id, started_at DESC);",
    )
}

pub struct ToolStore {
    db: Arc<Mutex<Connection>>,
}

impl ToolStore {
    pub fn new(db: Arc<Mutex<Connection>>) -> Self {
        Self { db }
    }

    pub fn get(&self, tenant: &TenantId, tool_id: i64) -> Result<SandboxedTool> {
        let conn = self.db.lock().unwrap();
        let row = conn.query_row(
            "SELECT id, tenant_id, name, description, container_name, commands
             FROM sandboxed_tools WHERE id = ?1 AND tenant_id = ?2",
            rusqlite::params![tool_id, tenant.as_str()],
            row_to_tool,
        );
        match row {
            Ok(t) => Ok(t),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(SandboxError::UnknownTool(tool_id.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn get_by_name(&self, tenant: &TenantId, name: &str) -> Result<SandboxedTool> {
        let conn = self.db.lock().unwrap();
        let row = conn.query_row(
            "SELECT id, tenant_id, name, description, container_name, commands
             FROM sandboxed_tools WHERE tenant_id = ?1 AND name = ?2",
            rusqlite::params![tenant.as_str(), name],
            row_to_tool,
        );
        match row {
            Ok(t) => Ok(t),
            Err(rusqlite::Error::QueryReturnedNoRows) => {
                Err(SandboxError::UnknownTool(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self, tenant: &TenantId) -> Result<Vec<SandboxedTool>> {
        let conn = self.db.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, tenant_id, name, description, container_name, commands
             FROM sandboxed_tools WHERE tenant_id = ?1 ORDER BY name",
        )?;
        let rows = stmt.query_map(rusqlite::params![tenant.as_str()], row_to_tool)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    pub fn insert(&self, tool: &SandboxedTool) -> Result<i64> {
        let now = chrono::Utc::now().to_rfc3339();
        let commands = serde_json::to_string(&tool.commands)
            .unwrap_or_else(|_| "[]".to_string());
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO sandboxed_tools
             (tenant_id, name, description, container_name, commands, created_at, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)",
            rusqlite::params![
                tool.tenant_id,
                tool.name,
                tool.description,
                tool.container_name,
                commands,
                now
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn record_execution_start(
        &self,
        execution_id: &str,
        tool: &SandboxedTool,
        command_name: &str,
        parameters: &str,
        agent_run_id: Option<i64>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "INSERT INTO tool_executions
             (id, tool_id, tenant_id, command_name, parameters, status, agent_run_id, started_at)
             VALUES (?1, ?2, ?3, ?4, ?5, 'pending', ?6, ?7)",
            rusqlite::params![
                execution_id,
                tool.id,
                tool.tenant_id,
                command_name,
                parameters,
                agent_run_id,
                now
            ],
        )?;
        Ok(())
    }

    pub fn record_execution_end(
        &self,
        execution_id: &str,
        status: &str,
        stdout: &str,
        stderr: &str,
        exit_code: Option<i32>,
    ) -> Result<()> {
        let now = chrono::Utc::now().to_rfc3339();
        let conn = self.db.lock().unwrap();
        conn.execute(
            "UPDATE tool_executions
             SET status = ?1, stdout = ?2, stderr = ?3, exit_code = ?4, finished_at = ?5
             WHERE id = ?6",
            rusqlite::params![status, stdout, stderr, exit_code, now, execution_id],
        )?;
        Ok(())
    }
}

fn row_to_tool(row: &rusqlite::Row<'_>) -> rusqlite::Result<SandboxedTool> {
    let commands_json: String = row.get(5)?;
    let commands: Vec<SandboxedToolCommand> =
        serde_json::from_str(&commands_json).unwrap_or_default();
    Ok(SandboxedTool {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        name: row.get(2)?,
        description: row.get(3)?,
        container_name: row.get(4)?,
        commands,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SandboxedToolParameter;

    fn store() -> ToolStore {
        let conn = Connection::open_in_memory().unwrap();
        init_db(&conn).unwrap();
        ToolStore::new(Arc::new(Mutex::new(conn)))
    }

    fn sample_tool(tenant: &str) -> SandboxedTool {
        SandboxedTool {
            id: 0,
            tenant_id: tenant.to_string(),
            name: "nmap".to_string(),
            description: "network scanner".to_string(),
            container_name: None,
            commands: vec![SandboxedToolCommand {
                name: "quick_scan".to_string(),
                description: "fast TCP scan".to_string(),
                template: "nmap -T4 -F <target>".to_string(),
                timeout_secs: 120,
                is_long_running: false,
                parameters: vec![SandboxedToolParameter {
                    name: "target".to_string(),
                    description: "host to scan".to_string(),
                    required: true,
                    default: None,
                }],
            }],
        }
    }

    #[test]
    fn insert_and_fetch_round_trip() {
        let s = store();
        let id = s.insert(&sample_tool("default")).unwrap();
        let tool = s.get(&TenantId::default_tenant(), id).unwrap();
        assert_eq!(tool.name, "nmap");
        assert_eq!(tool.commands.len(), 1);
        assert_eq!(tool.command("quick_scan").unwrap().timeout_secs, 120);
    }

    #[test]
    fn tools_are_tenant_scoped() {
        let s = store();
        let id = s.insert(&sample_tool("tenant-a")).unwrap();
        assert!(s.get(&TenantId::new("tenant-b"), id).is_err());
        assert!(s.get_by_name(&TenantId::new("tenant-b"), "nmap").is_err());
    }
}
