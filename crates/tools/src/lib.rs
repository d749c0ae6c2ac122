//! Built-in tools for CellPilot.
//!
//! Tools let the agent act inside the workspace: read and edit notebooks,
//! search files, run shell commands, and drive the workspace UI. Every
//! file-touching tool is confined to one [`Sandbox`] root.

pub mod notebook;
pub mod notebook_tools;
pub mod sandbox;
pub mod search;
pub mod shell;
pub mod workspace;

use std::sync::Arc;
use std::time::Duration;

use cellpilot_config::ToolsConfig;
use cellpilot_core::error::ToolError;
use cellpilot_core::tool::ToolRegistry;
use tracing::info;

pub use sandbox::Sandbox;
pub use workspace::{CommandExecutor, WorkspaceCommand, WorkspaceCommandTool};

/// Assemble a registry from the enabled tool groups.
///
/// Workspace-command tools are only registered when an executor is given.
pub fn build_registry(
    config: &ToolsConfig,
    executor: Option<Arc<dyn CommandExecutor>>,
) -> Result<ToolRegistry, ToolError> {
    let sandbox = Sandbox::new(config.root())?;
    let mut registry = ToolRegistry::new();

    if config.notebook {
        registry.register(Box::new(notebook_tools::ReadNotebookTool::new(sandbox.clone())))?;
        registry.register(Box::new(notebook_tools::AddCellTool::new(sandbox.clone())))?;
        registry.register(Box::new(notebook_tools::EditCellTool::new(sandbox.clone())))?;
        registry.register(Box::new(notebook_tools::DeleteCellTool::new(sandbox.clone())))?;
    }
    if config.search {
        let max = config.search_max_results;
        registry.register(Box::new(search::GlobSearchTool::new(sandbox.clone(), max)))?;
        registry.register(Box::new(search::GrepSearchTool::new(sandbox.clone(), max)))?;
    }
    if config.shell {
        registry.register(Box::new(shell::ShellTool::new(
            sandbox.clone(),
            config.shell_allowlist.clone(),
            Duration::from_secs(config.shell_timeout_secs),
        )))?;
    }
    if config.workspace_commands {
        if let Some(executor) = executor {
            for tool in WorkspaceCommandTool::all(executor, sandbox.clone()) {
                registry.register(Box::new(tool))?;
            }
        }
    }

    info!(
        root = %sandbox.root().display(),
        tools = registry.len(),
        "Tool registry ready"
    );
    Ok(registry)
}
