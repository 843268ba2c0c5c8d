//! Command execution with timeout, OOM mapping, and long-running
//! bifurcation.

use std::collections::HashMap;
use std::process::Stdio;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use rusqlite::Connection;
use tokio::process::Command;
use tracing::{error, info, warn};
use uuid::Uuid;

use switchboard_core::message::OutboundMessage;
use switchboard_core::send::ChannelSend;
use switchboard_core::types::{Channel, TenantId};

use crate::db::ToolStore;
use crate::error::Result;
use crate::template;
use crate::types::{ExecutionOutcome, ExecutionStatus, SandboxedTool, SandboxedToolCommand};
use crate::workspace::{truncate_output, WorkspaceManager};

/// Result size cap before truncation.
const OUTPUT_CAP_CHARS: usize = 5_000;
/// Conventional exit code for a SIGKILL, which is what the OOM killer sends.
const OOM_EXIT_CODE: i32 = 137;

/// Where a long-running command's eventual result should be delivered.
#[derive(Debug, Clone)]
pub struct FollowUpTarget {
    pub channel: Channel,
    pub recipient: String,
}

pub struct SandboxExecutor {
    tools: Arc<ToolStore>,
    workspaces: Arc<WorkspaceManager>,
    /// Narrow send capability for long-running follow-ups; absent in tests.
    sender: Option<Arc<dyn ChannelSend>>,
}

impl SandboxExecutor {
    pub fn new(
        db: Arc<Mutex<Connection>>,
        workspace_root: impl Into<std::path::PathBuf>,
        sender: Option<Arc<dyn ChannelSend>>,
    ) -> Self {
        Self {
            tools: Arc::new(ToolStore::new(db)),
            workspaces: Arc::new(WorkspaceManager::new(workspace_root)),
            sender,
        }
    }

    pub fn tools(&self) -> &ToolStore {
        &self.tools
    }

    /// System-prompt block describing the tenant's tools, with the mandatory
    /// execute-don't-describe directive appended by the prompt assembler.
    pub fn tool_prompts(&self, tenant: &TenantId) -> Result<Option<String>> {
        let tools = self.tools.list(tenant)?;
        if tools.is_empty() {
            return Ok(None);
        }
        let mut out = String::from("## Available Tools\n");
        for tool in &tools {
            out.push_str(&format!("\n### {} — {}\n", tool.name, tool.description));
            for cmd in &tool.commands {
                out.push_str(&format!("- `{}`: {}", cmd.name, cmd.description));
                if !cmd.parameters.is_empty() {
                    let params: Vec<String> = cmd
                        .parameters
                        .iter()
                        .map(|p| {
                            if p.required {
                                format!("{} (required)", p.name)
                            } else {
                                p.name.clone()
                            }
                        })
                        .collect();
                    out.push_str(&format!(" [params: {}]", params.join(", ")));
                }
                out.push('\n');
            }
        }
        Ok(Some(out))
    }

    /// Execute one command by tool name. Long-running commands return an
    /// immediate acknowledgement and complete in the background.
    pub async fn execute(
        &self,
        tenant: &TenantId,
        tool_name: &str,
        command_name: &str,
        parameters: HashMap<String, String>,
        agent_run_id: Option<i64>,
        follow_up: Option<FollowUpTarget>,
    ) -> Result<ExecutionOutcome> {
        let tool = self.tools.get_by_name(tenant, tool_name)?;
        let command = tool
            .command(command_name)
            .ok_or_else(|| crate::error::SandboxError::UnknownCommand {
                tool: tool_name.to_string(),
                command: command_name.to_string(),
            })?
            .clone();

        let rendered = template::render(&command.template, &parameters, &command.parameters)?;
        let execution_id = Uuid::new_v4().to_string();
        let params_json =
            serde_json::to_string(&parameters).unwrap_or_else(|_| "{}".to_string());
        self.tools.record_execution_start(
            &execution_id,
            &tool,
            command_name,
            &params_json,
            agent_run_id,
        )?;

        info!(
            tool = %tool.name,
            command = %command.name,
            execution_id = %execution_id,
            long_running = command.is_long_running,
            "executing sandboxed command"
        );

        if command.is_long_running {
            self.spawn_background(tool, command, rendered, execution_id.clone(), follow_up);
            return Ok(ExecutionOutcome {
                execution_id,
                output: "⏳ Starting — this can take a while. I'll send the result when it completes.".to_string(),
                status: ExecutionStatus::Running,
                backgrounded: true,
            });
        }

        let (output, status, exit_code) =
            run_command(&self.workspaces, &tool, &command, &rendered).await;
        self.tools.record_execution_end(
            &execution_id,
            status.as_str(),
            &output,
            "",
            exit_code,
        )?;
        Ok(ExecutionOutcome {
            execution_id,
            output,
            status,
            backgrounded: false,
        })
    }

    fn spawn_background(
        &self,
        tool: SandboxedTool,
        command: SandboxedToolCommand,
        rendered: String,
        execution_id: String,
        follow_up: Option<FollowUpTarget>,
    ) {
        let tools = Arc::clone(&self.tools);
        let workspaces = Arc::clone(&self.workspaces);
        let sender = self.sender.clone();

        tokio::spawn(async move {
            let (output, status, exit_code) =
                run_command(&workspaces, &tool, &command, &rendered).await;
            if let Err(e) = tools.record_execution_end(
                &execution_id,
                status.as_str(),
                &output,
                "",
                exit_code,
            ) {
                error!(execution_id = %execution_id, error = %e, "failed to record execution end");
            }

            let (Some(sender), Some(target)) = (sender, follow_up) else {
                return;
            };
            let text = format!("✅ {}:{} finished:\n\n{}", tool.name, command.name, output);
            let delivered = sender
                .send(&OutboundMessage {
                    channel: target.channel,
                    recipient: target.recipient.clone(),
                    text,
                    media_path: None,
                })
                .await;
            if !delivered {
                warn!(
                    recipient = %target.recipient,
                    execution_id = %execution_id,
                    "long-running tool follow-up could not be delivered"
                );
            }
        });
    }
}

/// Run the rendered command, in the tenant container when one is configured
/// or directly in the tool workspace otherwise. Never returns an error:
/// timeouts, OOM kills, and failures all become human-readable output the
/// LLM can act on.
async fn run_command(
    workspaces: &WorkspaceManager,
    tool: &SandboxedTool,
    command: &SandboxedToolCommand,
    rendered: &str,
) -> (String, ExecutionStatus, Option<i32>) {
    let mut cmd = match &tool.container_name {
        Some(container) => {
            let mut c = Command::new("docker");
            c.args(["exec", "-w", "/workspace", container, "sh", "-c", rendered]);
            c
        }
        None => {
            let workdir = match workspaces.dir_for(&tool.name) {
                Ok(d) => d,
                Err(e) => {
                    return (
                        format!("Workspace unavailable: {}", e),
                        ExecutionStatus::Failed,
                        None,
                    )
                }
            };
            let mut c = Command::new("sh");
            c.args(["-c", rendered]).current_dir(workdir);
            c
        }
    };
    cmd.stdout(Stdio::piped()).stderr(Stdio::piped());

    let timeout = Duration::from_secs(command.timeout_secs);
    let result = tokio::time::timeout(timeout, cmd.output()).await;

    match result {
        Err(_) => (
            format!(
                "Command timed out after {}s. Try reducing scope.",
                command.timeout_secs
            ),
            ExecutionStatus::Failed,
            None,
        ),
        Ok(Err(e)) => (
            format!("Failed to start command: {}", e),
            ExecutionStatus::Failed,
            None,
        ),
        Ok(Ok(output)) => {
            let exit_code = output.status.code();
            let mut text = String::from_utf8_lossy(&output.stdout).to_string();
            let stderr = String::from_utf8_lossy(&output.stderr);
            if !stderr.trim().is_empty() {
                if !text.is_empty() {
                    text.push('\n');
                }
                text.push_str(stderr.trim());
            }
            let text = truncate_output(&text, OUTPUT_CAP_CHARS);

            if exit_code == Some(OOM_EXIT_CODE) {
                return (
                    "Command was killed (out of memory). Try reducing scope or output size."
                        .to_string(),
                    ExecutionStatus::Failed,
                    exit_code,
                );
            }
            if output.status.success() {
                (text, ExecutionStatus::Completed, exit_code)
            } else {
                let text = if text.trim().is_empty() {
                    format!("Command failed with exit code {:?}.", exit_code)
                } else {
                    text
                };
                (text, ExecutionStatus::Failed, exit_code)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::SandboxedToolParameter;

    fn executor() -> SandboxExecutor {
        let conn = Connection::open_in_memory().unwrap();
        crate::db::init_db(&conn).unwrap();
        let root = std::env::temp_dir().join(format!("sb-exec-{}", Uuid::new_v4()));
        SandboxExecutor::new(Arc::new(Mutex::new(conn)), root, None)
    }

    fn echo_tool(timeout_secs: u64, long_running: bool) -> SandboxedTool {
        SandboxedTool {
            id: 0,
            tenant_id: "default".to_string(),
            name: "echo".to_string(),
            description: "echo tool".to_string(),
            container_name: None,
            commands: vec![SandboxedToolCommand {
                name: "say".to_string(),
                description: "echo a message".to_string(),
                template: "echo <message>".to_string(),
                timeout_secs,
                is_long_running: long_running,
                parameters: vec![SandboxedToolParameter {
                    name: "message".to_string(),
                    description: String::new(),
                    required: true,
                    default: None,
                }],
            }],
        }
    }

    fn params(message: &str) -> HashMap<String, String> {
        let mut p = HashMap::new();
        p.insert("message".to_string(), message.to_string());
        p
    }

    #[tokio::test]
    async fn executes_and_captures_output() {
        let ex = executor();
        ex.tools().insert(&echo_tool(10, false)).unwrap();

        let outcome = ex
            .execute(
                &TenantId::default_tenant(),
                "echo",
                "say",
                params("hello sandbox"),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Completed);
        assert!(outcome.output.contains("hello sandbox"));
        assert!(!outcome.backgrounded);
    }

    #[tokio::test]
    async fn missing_mandatory_parameter_is_an_error() {
        let ex = executor();
        ex.tools().insert(&echo_tool(10, false)).unwrap();

        let err = ex
            .execute(
                &TenantId::default_tenant(),
                "echo",
                "say",
                HashMap::new(),
                None,
                None,
            )
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            crate::error::SandboxError::MissingParameter(_)
        ));
    }

    #[tokio::test]
    async fn timeout_produces_guidance_not_error() {
        let ex = executor();
        let mut tool = echo_tool(1, false);
        tool.commands[0].template = "sleep 5".to_string();
        tool.commands[0].parameters.clear();
        ex.tools().insert(&tool).unwrap();

        let outcome = ex
            .execute(
                &TenantId::default_tenant(),
                "echo",
                "say",
                HashMap::new(),
                None,
                None,
            )
            .await
            .unwrap();
        assert_eq!(outcome.status, ExecutionStatus::Failed);
        assert!(outcome.output.contains("timed out after 1s"));
        assert!(outcome.output.contains("reducing scope"));
    }

    #[tokio::test]
    async fn long_running_returns_immediate_ack() {
        let ex = executor();
        ex.tools().insert(&echo_tool(10, true)).unwrap();

        let outcome = ex
            .execute(
                &TenantId::default_tenant(),
                "echo",
                "say",
                params("background run"),
                None,
                None,
            )
            .await
            .unwrap();
        assert!(outcome.backgrounded);
        assert_eq!(outcome.status, ExecutionStatus::Running);
        assert!(outcome.output.contains("⏳"));
    }

    #[tokio::test]
    async fn unknown_tool_and_command_are_errors() {
        let ex = executor();
        ex.tools().insert(&echo_tool(10, false)).unwrap();

        assert!(ex
            .execute(
                &TenantId::default_tenant(),
                "ghost",
                "say",
                HashMap::new(),
                None,
                None
            )
            .await
            .is_err());
        assert!(ex
            .execute(
                &TenantId::default_tenant(),
                "echo",
                "ghost",
                HashMap::new(),
                None,
                None
            )
            .await
            .is_err());
    }
}
