//! Shell tool — run a command in the workspace root.
//!
//! Supports command allowlisting and a wall-clock timeout. The working
//! directory is always the sandbox root.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use cellpilot_core::error::ToolError;
use cellpilot_core::tool::{Tool, ToolResult, ToolStatus};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, warn};

/// Execute shell commands with safety constraints.
pub struct ShellTool {
    sandbox: Sandbox,
    /// If non-empty, only these commands are allowed.
    allowed_commands: Vec<String>,
    timeout: Duration,
}

impl ShellTool {
    pub fn new(sandbox: Sandbox, allowed_commands: Vec<String>, timeout: Duration) -> Self {
        Self {
            sandbox,
            allowed_commands,
            timeout,
        }
    }

    fn is_command_allowed(&self, command: &str) -> bool {
        if self.allowed_commands.is_empty() {
            return true;
        }

        let base_cmd = command.split_whitespace().next().unwrap_or("").trim();
        self.allowed_commands.iter().any(|a| a == base_cmd)
    }
}

#[async_trait]
impl Tool for ShellTool {
    fn name(&self) -> &str {
        "shell"
    }

    fn description(&self) -> &str {
        "Execute a shell command in the workspace root and return stdout/stderr. Use this for running scripts, listing files, git operations, installing packages, etc."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "command": {
                    "type": "string",
                    "description": "The shell command to execute"
                }
            },
            "required": ["command"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value) -> Result<ToolResult, ToolError> {
        let command = arguments["command"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'command' argument".into()))?;

        if !self.is_command_allowed(command) {
            return Err(ToolError::PermissionDenied {
                tool_name: "shell".into(),
                reason: format!(
                    "Command '{}' not in allowlist",
                    command.split_whitespace().next().unwrap_or("")
                ),
            });
        }

        debug!(command = %command, cwd = %self.sandbox.root().display(), "Executing shell command");

        let child = Command::new("sh")
            .args(["-c", command])
            .current_dir(self.sandbox.root())
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ToolError::ExecutionFailed {
                tool_name: "shell".into(),
                reason: e.to_string(),
            })?;

        let output = match tokio::time::timeout(self.timeout, child.wait_with_output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(e)) => {
                return Err(ToolError::ExecutionFailed {
                    tool_name: "shell".into(),
                    reason: e.to_string(),
                });
            }
            Err(_) => {
                warn!(command = %command, timeout_secs = self.timeout.as_secs(), "Command timed out");
                return Err(ToolError::Timeout {
                    tool_name: "shell".into(),
                    timeout_secs: self.timeout.as_secs(),
                });
            }
        };

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();
        let success = output.status.success();

        let result_text = if success {
            if stderr.is_empty() {
                stdout
            } else {
                format!("{stdout}\n[stderr]: {stderr}")
            }
        } else {
            let code = output.status.code().unwrap_or(-1);
            warn!(command = %command, exit_code = code, "Command failed");
            format!("[exit code: {code}]\n{stdout}\n{stderr}")
        };

        let mut result = ToolResult::success(result_text.trim());
        if !success {
            result.status = ToolStatus::Error;
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tool(allow: &[&str], timeout_secs: u64) -> (tempfile::TempDir, ShellTool) {
        let dir = tempfile::tempdir().unwrap();
        let sandbox = Sandbox::new(dir.path()).unwrap();
        let allow = allow.iter().map(|s| s.to_string()).collect();
        (dir, ShellTool::new(sandbox, allow, Duration::from_secs(timeout_secs)))
    }

    #[test]
    fn allowlist_check() {
        let (_dir, tool) = tool(&["ls", "cat", "git"], 5);
        assert!(tool.is_command_allowed("ls -la"));
        assert!(tool.is_command_allowed("git status"));
        assert!(!tool.is_command_allowed("rm -rf /"));
        assert!(!tool.is_command_allowed("sudo something"));
    }

    #[test]
    fn empty_allowlist_allows_all() {
        let (_dir, tool) = tool(&[], 5);
        assert!(tool.is_command_allowed("anything goes"));
    }

    #[tokio::test]
    async fn runs_in_workspace_root() {
        let (dir, tool) = tool(&[], 5);
        std::fs::write(dir.path().join("marker.txt"), "found me").unwrap();
        let result = tool
            .execute(serde_json::json!({"command": "cat marker.txt"}))
            .await
            .unwrap();
        assert!(!result.is_error());
        assert_eq!(result.output, "found me");
    }

    #[tokio::test]
    async fn non_zero_exit_is_reported() {
        let (_dir, tool) = tool(&[], 5);
        let result = tool
            .execute(serde_json::json!({"command": "echo oops >&2; exit 3"}))
            .await
            .unwrap();
        assert!(result.is_error());
        assert!(result.output.contains("[exit code: 3]"));
        assert!(result.output.contains("oops"));
    }

    #[tokio::test]
    async fn blocked_command() {
        let (_dir, tool) = tool(&["echo"], 5);
        let err = tool
            .execute(serde_json::json!({"command": "rm -rf /"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::PermissionDenied { .. }));
    }

    #[tokio::test]
    async fn slow_command_times_out() {
        let (_dir, tool) = tool(&[], 1);
        let err = tool
            .execute(serde_json::json!({"command": "sleep 5"}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Timeout { timeout_secs: 1, .. }));
    }

    #[tokio::test]
    async fn missing_command_argument() {
        let (_dir, tool) = tool(&[], 5);
        let err = tool.execute(serde_json::json!({})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }
}
