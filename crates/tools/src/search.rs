//! File search tools — glob over paths and grep over contents.
//!
//! Both walk the workspace root (or a directory below it), skipping hidden
//! files and directories and whatever `.gitignore` excludes, and cap their
//! output at a configured count.

use crate::sandbox::Sandbox;
use async_trait::async_trait;
use cellpilot_core::error::ToolError;
use cellpilot_core::tool::{Tool, ToolResult};
use globset::{GlobBuilder, GlobMatcher};
use ignore::{DirEntry, WalkBuilder};
use regex_lite::Regex;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use tracing::debug;

/// Files larger than this are not searched by content.
const MAX_GREP_FILE_BYTES: u64 = 10 * 1024 * 1024;

/// Compile a glob over `/`-separated relative paths.
///
/// `*` stays within one path component; `**/` spans any number of them.
fn compile_glob(pattern: &str) -> Result<GlobMatcher, ToolError> {
    GlobBuilder::new(pattern)
        .literal_separator(true)
        .build()
        .map(|glob| glob.compile_matcher())
        .map_err(|e| ToolError::InvalidArguments(format!("bad glob '{pattern}': {e}")))
}

/// Every regular file below `dir`, skipping hidden entries and anything
/// excluded by `.gitignore` or `.ignore` files.
fn walk_files(dir: &Path) -> Vec<DirEntry> {
    let mut builder = WalkBuilder::new(dir);
    builder.hidden(true);
    builder.follow_links(false);
    builder.require_git(false);

    builder
        .build()
        .filter_map(Result::ok)
        .filter(|entry| entry.file_type().is_some_and(|t| t.is_file()))
        .collect()
}

fn relative(entry: &DirEntry, base: &Path) -> Option<String> {
    let rel = entry.path().strip_prefix(base).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}

/// Resolve the optional `path` argument to a directory inside the sandbox.
fn search_base(sandbox: &Sandbox, arguments: &Value) -> Result<PathBuf, ToolError> {
    let base = sandbox.resolve(arguments["path"].as_str().unwrap_or("."))?;
    if !base.is_dir() {
        return Err(ToolError::ExecutionFailed {
            tool_name: "search".into(),
            reason: format!("'{}' is not a directory", sandbox.display_relative(&base)),
        });
    }
    Ok(base)
}

/// Find files by glob pattern, newest first.
pub struct GlobSearchTool {
    sandbox: Sandbox,
    max_results: usize,
}

impl GlobSearchTool {
    pub fn new(sandbox: Sandbox, max_results: usize) -> Self {
        Self { sandbox, max_results }
    }
}

#[async_trait]
impl Tool for GlobSearchTool {
    fn name(&self) -> &str {
        "glob_search"
    }

    fn description(&self) -> &str {
        "Find files whose path matches a glob pattern (e.g. '**/*.ipynb', 'data/*.csv'). Returns paths relative to the search directory, most recently modified first."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Glob pattern, e.g. **/*.py" },
                "path": { "type": "string", "description": "Directory to search in, relative to the workspace root. Defaults to the root." }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let pattern = arguments["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'pattern' argument".into()))?;
        let matcher = compile_glob(pattern)?;
        let base = search_base(&self.sandbox, &arguments)?;

        let mut hits: Vec<(SystemTime, String)> = tokio::task::spawn_blocking(move || {
            walk_files(&base)
                .into_iter()
                .filter_map(|entry| {
                    let rel = relative(&entry, &base)?;
                    if !matcher.is_match(&rel) {
                        return None;
                    }
                    let modified = entry
                        .metadata()
                        .ok()
                        .and_then(|m| m.modified().ok())
                        .unwrap_or(SystemTime::UNIX_EPOCH);
                    Some((modified, rel))
                })
                .collect::<Vec<_>>()
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "glob_search".into(),
            reason: format!("directory walk aborted: {e}"),
        })?;
        hits.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| a.1.cmp(&b.1)));

        let total = hits.len();
        debug!(pattern, total, "glob_search finished");
        if total == 0 {
            return Ok(ToolResult::success("No files found"));
        }

        let mut output: Vec<String> = hits.into_iter().take(self.max_results).map(|h| h.1).collect();
        if total > self.max_results {
            output.push(format!("... ({} more not shown)", total - self.max_results));
        }
        Ok(ToolResult::success(output.join("\n")).with_data(serde_json::json!({ "total": total })))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GrepOutput {
    FilesWithMatches,
    Content,
    Count,
}

/// Search file contents with a regular expression.
pub struct GrepSearchTool {
    sandbox: Sandbox,
    max_results: usize,
}

impl GrepSearchTool {
    pub fn new(sandbox: Sandbox, max_results: usize) -> Self {
        Self { sandbox, max_results }
    }
}

#[async_trait]
impl Tool for GrepSearchTool {
    fn name(&self) -> &str {
        "grep_search"
    }

    fn description(&self) -> &str {
        "Search file contents with a regular expression. Optionally restrict to files matching an include glob. output_mode is 'files_with_matches' (default), 'content' (matching lines) or 'count'."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "pattern": { "type": "string", "description": "Regular expression to search for" },
                "path": { "type": "string", "description": "Directory to search in, relative to the workspace root" },
                "include": { "type": "string", "description": "Only search files matching this glob, e.g. *.py" },
                "output_mode": {
                    "type": "string",
                    "enum": ["files_with_matches", "content", "count"]
                }
            },
            "required": ["pattern"]
        })
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let pattern = arguments["pattern"]
            .as_str()
            .ok_or_else(|| ToolError::InvalidArguments("Missing 'pattern' argument".into()))?;
        let regex = Regex::new(pattern)
            .map_err(|e| ToolError::InvalidArguments(format!("Invalid regex '{pattern}': {e}")))?;
        let include = arguments["include"].as_str().map(compile_glob).transpose()?;
        let mode = match arguments["output_mode"].as_str().unwrap_or("files_with_matches") {
            "files_with_matches" => GrepOutput::FilesWithMatches,
            "content" => GrepOutput::Content,
            "count" => GrepOutput::Count,
            other => {
                return Err(ToolError::InvalidArguments(format!("Unknown output_mode '{other}'")));
            }
        };
        let base = search_base(&self.sandbox, &arguments)?;
        let max_results = self.max_results;

        let lines = tokio::task::spawn_blocking(move || {
            let mut files = walk_files(&base);
            files.sort_by(|a, b| a.path().cmp(b.path()));

            let mut lines = Vec::new();
            for entry in files {
                let Some(rel) = relative(&entry, &base) else {
                    continue;
                };
                if let Some(include) = &include
                    && !include.is_match(&rel)
                    && !include.is_match(entry.file_name())
                {
                    continue;
                }
                if entry.metadata().map(|m| m.len()).unwrap_or(u64::MAX) > MAX_GREP_FILE_BYTES {
                    continue;
                }
                let Ok(text) = std::fs::read_to_string(entry.path()) else {
                    continue; // binary or unreadable
                };

                let matching: Vec<(usize, &str)> = text
                    .lines()
                    .enumerate()
                    .filter(|(_, line)| regex.is_match(line))
                    .collect();
                if matching.is_empty() {
                    continue;
                }
                match mode {
                    GrepOutput::FilesWithMatches => lines.push(rel),
                    GrepOutput::Count => lines.push(format!("{rel}:{}", matching.len())),
                    GrepOutput::Content => {
                        for (n, line) in matching {
                            lines.push(format!("{rel}:{}:{line}", n + 1));
                        }
                    }
                }
                if lines.len() > max_results {
                    break;
                }
            }
            lines
        })
        .await
        .map_err(|e| ToolError::ExecutionFailed {
            tool_name: "grep_search".into(),
            reason: format!("search aborted: {e}"),
        })?;

        if lines.is_empty() {
            return Ok(ToolResult::success("No matches found"));
        }
        let truncated = lines.len() > max_results;
        let mut shown: Vec<String> = lines.into_iter().take(max_results).collect();
        if truncated {
            shown.push(format!("... (results truncated at {max_results})"));
        }
        Ok(ToolResult::success(shown.join("\n")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn workspace() -> (tempfile::TempDir, Sandbox) {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        std::fs::create_dir_all(root.join("src/pkg")).unwrap();
        std::fs::create_dir_all(root.join(".git")).unwrap();
        std::fs::write(root.join("main.py"), "import os\nprint('hello')\n").unwrap();
        std::fs::write(root.join("src/util.py"), "def helper():\n    return 42\n").unwrap();
        std::fs::write(root.join("src/pkg/deep.py"), "# TODO: hello again\n").unwrap();
        std::fs::write(root.join("notes.md"), "hello notes\n").unwrap();
        std::fs::write(root.join(".git/config.py"), "hello hidden\n").unwrap();
        let sandbox = Sandbox::new(root).unwrap();
        (dir, sandbox)
    }

    #[test]
    fn glob_matching() {
        let glob = compile_glob("**/*.py").unwrap();
        assert!(glob.is_match("main.py"));
        assert!(glob.is_match("src/pkg/deep.py"));
        assert!(!glob.is_match("notes.md"));

        let glob = compile_glob("*.py").unwrap();
        assert!(glob.is_match("main.py"));
        assert!(!glob.is_match("src/util.py"));

        let glob = compile_glob("data/*.{csv,json}").unwrap();
        assert!(glob.is_match("data/a.csv"));
        assert!(glob.is_match("data/b.json"));
        assert!(!glob.is_match("data/c.txt"));

        let glob = compile_glob("file[0-9].txt").unwrap();
        assert!(glob.is_match("file7.txt"));
        assert!(!glob.is_match("fileA.txt"));

        assert!(matches!(compile_glob("broken["), Err(ToolError::InvalidArguments(_))));
    }

    #[tokio::test]
    async fn gitignored_files_are_not_searched() {
        let (dir, sb) = workspace();
        std::fs::create_dir_all(dir.path().join("build")).unwrap();
        std::fs::write(dir.path().join("build/generated.py"), "hello build\n").unwrap();
        std::fs::write(dir.path().join(".gitignore"), "build/\n").unwrap();

        let found = GlobSearchTool::new(sb.clone(), 100)
            .execute(json!({"pattern": "**/*.py"}))
            .await
            .unwrap();
        assert!(!found.output.contains("generated.py"));
        assert_eq!(found.data.unwrap()["total"], 3);

        let matches = GrepSearchTool::new(sb, 100)
            .execute(json!({"pattern": "hello"}))
            .await
            .unwrap()
            .output;
        assert!(!matches.contains("build/"));
        assert!(!matches.contains(".gitignore"));
    }

    #[tokio::test]
    async fn glob_finds_recursively_and_skips_hidden() {
        let (_dir, sb) = workspace();
        let tool = GlobSearchTool::new(sb, 100);
        let result = tool.execute(json!({"pattern": "**/*.py"})).await.unwrap();
        assert!(result.output.contains("main.py"));
        assert!(result.output.contains("src/pkg/deep.py"));
        assert!(!result.output.contains(".git"));
        assert_eq!(result.data.unwrap()["total"], 3);
    }

    #[tokio::test]
    async fn glob_respects_subdirectory_and_cap() {
        let (_dir, sb) = workspace();
        let tool = GlobSearchTool::new(sb, 1);
        let result = tool
            .execute(json!({"pattern": "**/*.py", "path": "src"}))
            .await
            .unwrap();
        assert!(result.output.contains("1 more not shown"));
        assert!(!result.output.contains("main.py"));
    }

    #[tokio::test]
    async fn glob_reports_no_matches() {
        let (_dir, sb) = workspace();
        let tool = GlobSearchTool::new(sb, 100);
        let result = tool.execute(json!({"pattern": "*.rs"})).await.unwrap();
        assert_eq!(result.output, "No files found");
    }

    #[tokio::test]
    async fn grep_modes() {
        let (_dir, sb) = workspace();
        let tool = GrepSearchTool::new(sb, 100);

        let files = tool.execute(json!({"pattern": "hello"})).await.unwrap().output;
        assert!(files.contains("main.py"));
        assert!(files.contains("notes.md"));
        assert!(!files.contains("config.py"));

        let content = tool
            .execute(json!({"pattern": "hel+o", "include": "*.py", "output_mode": "content"}))
            .await
            .unwrap()
            .output;
        assert!(content.contains("main.py:2:print('hello')"));
        assert!(!content.contains("notes.md"));

        let count = tool
            .execute(json!({"pattern": "return", "output_mode": "count"}))
            .await
            .unwrap()
            .output;
        assert_eq!(count, "src/util.py:1");
    }

    #[tokio::test]
    async fn grep_rejects_bad_input() {
        let (_dir, sb) = workspace();
        let tool = GrepSearchTool::new(sb, 100);
        let err = tool.execute(json!({"pattern": "("})).await.unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));

        let err = tool
            .execute(json!({"pattern": "x", "path": "../.."}))
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::SandboxViolation(_)));
    }
}
