//! Workspace UI commands: open a file, run all cells, restart the kernel.
//!
//! These tools do not act on the filesystem themselves. They forward a
//! named command to whatever front-end hosts the session, through a
//! [`CommandExecutor`] supplied by the host.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use cellpilot_core::error::ToolError;
use cellpilot_core::tool::{Tool, ToolResult};
use serde_json::{Value, json};
use std::sync::Arc;
use tracing::debug;

/// Executes front-end commands by id (e.g. `docmanager:open`).
#[async_trait]
pub trait CommandExecutor: Send + Sync {
    async fn execute_command(&self, command: &str, args: Value) -> Result<Value, ToolError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkspaceCommand {
    OpenFile,
    RunAllCells,
    RestartKernel,
}

impl WorkspaceCommand {
    pub const ALL: [WorkspaceCommand; 3] = [Self::OpenFile, Self::RunAllCells, Self::RestartKernel];

    pub fn tool_name(&self) -> &'static str {
        match self {
            Self::OpenFile => "open_file",
            Self::RunAllCells => "run_all_cells",
            Self::RestartKernel => "restart_kernel",
        }
    }

    pub fn command_id(&self) -> &'static str {
        match self {
            Self::OpenFile => "docmanager:open",
            Self::RunAllCells => "notebook:run-all-cells",
            Self::RestartKernel => "notebook:restart-kernel",
        }
    }

    fn description(&self) -> &'static str {
        match self {
            Self::OpenFile => "Open a file in the workspace main area.",
            Self::RunAllCells => "Run all cells in the currently active notebook.",
            Self::RestartKernel => {
                "Restart the notebook kernel, useful when new packages are installed."
            }
        }
    }
}

pub struct WorkspaceCommandTool {
    command: WorkspaceCommand,
    executor: Arc<dyn CommandExecutor>,
    sandbox: Sandbox,
}

impl WorkspaceCommandTool {
    pub fn new(command: WorkspaceCommand, executor: Arc<dyn CommandExecutor>, sandbox: Sandbox) -> Self {
        Self {
            command,
            executor,
            sandbox,
        }
    }

    /// One tool per [`WorkspaceCommand`], all sharing the executor.
    pub fn all(executor: Arc<dyn CommandExecutor>, sandbox: Sandbox) -> Vec<Self> {
        WorkspaceCommand::ALL
            .into_iter()
            .map(|c| Self::new(c, executor.clone(), sandbox.clone()))
            .collect()
    }
}

#[async_trait]
impl Tool for WorkspaceCommandTool {
    fn name(&self) -> &str {
        self.command.tool_name()
    }

    fn description(&self) -> &str {
        self.command.description()
    }

    fn parameters_schema(&self) -> Value {
        match self.command {
            WorkspaceCommand::OpenFile => json!({
                "type": "object",
                "properties": {
                    "path": { "type": "string", "description": "File path relative to the workspace root" }
                },
                "required": ["path"]
            }),
            _ => json!({ "type": "object", "properties": {} }),
        }
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let args = match self.command {
            WorkspaceCommand::OpenFile => {
                let path = arguments["path"]
                    .as_str()
                    .ok_or_else(|| ToolError::InvalidArguments("Missing 'path' argument".into()))?;
                let resolved = self.sandbox.resolve(path)?;
                json!({ "path": self.sandbox.display_relative(&resolved) })
            }
            _ => json!({}),
        };

        let command_id = self.command.command_id();
        debug!(command = command_id, "Forwarding workspace command");
        let response = self.executor.execute_command(command_id, args).await?;

        let output = match &response {
            Value::Null => String::new(),
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        Ok(ToolResult::success(output).with_data(response))
    }
}
