use serde::{Deserialize, Serialize};

/// A parameter slot in a command template.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxedToolParameter {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub required: bool,
    #[serde(default)]
    pub default: Option<String>,
}

/// One runnable command of a tool. The template contains `<param>` or
/// `{param}` placeholders; substitution never does shell interpolation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxedToolCommand {
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub template: String,
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub is_long_running: bool,
    #[serde(default)]
    pub parameters: Vec<SandboxedToolParameter>,
}

fn default_timeout() -> u64 {
    60
}

/// A declarative tool runnable in the tenant container.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxedTool {
    pub id: i64,
    pub tenant_id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    /// Docker container name; `None` executes directly in the workspace.
    #[serde(default)]
    pub container_name: Option<String>,
    pub commands: Vec<SandboxedToolCommand>,
}

impl SandboxedTool {
    pub fn command(&self, name: &str) -> Option<&SandboxedToolCommand> {
        self.commands.iter().find(|c| c.name == name)
    }
}

/// Terminal status of one execution row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
        }
    }
}

/// What the caller gets back from `execute`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    pub execution_id: String,
    pub output: String,
    pub status: ExecutionStatus,
    /// Set when the command bifurcated into a background run; the real
    /// result arrives via the follow-up callback.
    pub backgrounded: bool,
}
