//! Notebook toolkit — read and edit `.ipynb` files under the workspace root.
//!
//! These are structured tools: each call loads the document model, applies
//! one operation and saves it back. They fail only on bad arguments.

use crate::notebook::{Cell, CellType, Notebook, NotebookError};
use crate::sandbox::Sandbox;
use async_trait::async_trait;
use cellpilot_core::error::ToolError;
use cellpilot_core::tool::{Tool, ToolResult, ToolTier};
use serde_json::Value;
use std::path::PathBuf;
use tracing::debug;

fn invalid(e: NotebookError) -> ToolError {
    ToolError::InvalidArguments(e.to_string())
}

fn str_arg<'a>(arguments: &'a Value, key: &str) -> Result<&'a str, ToolError> {
    arguments[key]
        .as_str()
        .ok_or_else(|| ToolError::InvalidArguments(format!("Missing '{key}' argument")))
}

/// A cell reference may be an id string or a numeric index.
fn cell_arg(arguments: &Value) -> Result<String, ToolError> {
    match &arguments["cell"] {
        Value::String(s) if !s.is_empty() => Ok(s.clone()),
        Value::Number(n) if n.is_u64() => Ok(n.to_string()),
        _ => Err(ToolError::InvalidArguments(
            "Missing 'cell' argument (cell id or index)".into(),
        )),
    }
}

fn notebook_path(sandbox: &Sandbox, arguments: &Value) -> Result<PathBuf, ToolError> {
    let path = str_arg(arguments, "path")?;
    if !path.ends_with(".ipynb") {
        return Err(ToolError::InvalidArguments(format!(
            "'{path}' is not a notebook (.ipynb) path"
        )));
    }
    sandbox.resolve(path)
}

fn path_schema() -> Value {
    serde_json::json!({
        "type": "string",
        "description": "Notebook path relative to the workspace root (must end in .ipynb)"
    })
}

fn cell_schema() -> Value {
    serde_json::json!({
        "type": ["string", "integer"],
        "description": "Cell id, or zero-based cell index"
    })
}

/// Read a notebook as numbered cells.
pub struct ReadNotebookTool {
    sandbox: Sandbox,
}

impl ReadNotebookTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for ReadNotebookTool {
    fn name(&self) -> &str {
        "read_notebook"
    }

    fn description(&self) -> &str {
        "Read a Jupyter notebook and return its cells with their index, type, id and source."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": { "path": path_schema() },
            "required": ["path"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Structured
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let path = notebook_path(&self.sandbox, &arguments)?;
        let notebook = Notebook::load(&path).await.map_err(invalid)?;
        Ok(ToolResult::success(notebook.render())
            .with_data(serde_json::json!({ "cells": notebook.cells.len() })))
    }
}

/// Insert a new cell, creating the notebook if needed.
pub struct AddCellTool {
    sandbox: Sandbox,
}

impl AddCellTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for AddCellTool {
    fn name(&self) -> &str {
        "add_cell"
    }

    fn description(&self) -> &str {
        "Add a code or markdown cell to a notebook, at a given index or at the end. Creates the notebook if it does not exist."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": path_schema(),
                "source": { "type": "string", "description": "The cell contents" },
                "cell_type": {
                    "type": "string",
                    "enum": ["code", "markdown", "raw"],
                    "description": "Defaults to code"
                },
                "index": { "type": "integer", "description": "Insert position; appends when omitted" }
            },
            "required": ["path", "source"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Structured
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let path = notebook_path(&self.sandbox, &arguments)?;
        let source = str_arg(&arguments, "source")?;
        let cell_type = match arguments["cell_type"].as_str() {
            None => CellType::Code,
            Some(t) => CellType::parse(t)
                .ok_or_else(|| ToolError::InvalidArguments(format!("Unknown cell_type '{t}'")))?,
        };
        let index = match &arguments["index"] {
            Value::Null => None,
            v => Some(v.as_u64().ok_or_else(|| {
                ToolError::InvalidArguments("'index' must be a non-negative integer".into())
            })? as usize),
        };

        let mut notebook = if path.exists() {
            Notebook::load(&path).await.map_err(invalid)?
        } else {
            Notebook::default()
        };

        let cell = Cell::new(cell_type, source);
        let id = cell.id.clone().unwrap_or_default();
        let at = notebook.insert(index, cell).map_err(invalid)?;
        notebook.save(&path).await.map_err(invalid)?;

        debug!(path = %path.display(), index = at, "Added notebook cell");
        Ok(ToolResult::success(format!(
            "Added {} cell {id} at index {at} in {}",
            cell_type.as_str(),
            self.sandbox.display_relative(&path)
        ))
        .with_data(serde_json::json!({ "cell_id": id, "index": at })))
    }
}

/// Replace a cell's source.
pub struct EditCellTool {
    sandbox: Sandbox,
}

impl EditCellTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for EditCellTool {
    fn name(&self) -> &str {
        "edit_cell"
    }

    fn description(&self) -> &str {
        "Replace the source of an existing notebook cell, identified by id or index. Clears the cell's outputs."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": path_schema(),
                "cell": cell_schema(),
                "source": { "type": "string", "description": "The new cell contents" }
            },
            "required": ["path", "cell", "source"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Structured
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let path = notebook_path(&self.sandbox, &arguments)?;
        let cell = cell_arg(&arguments)?;
        let source = str_arg(&arguments, "source")?;

        let mut notebook = Notebook::load(&path).await.map_err(invalid)?;
        let index = notebook.locate(&cell).map_err(invalid)?;
        notebook.cells[index].set_source(source);
        notebook.save(&path).await.map_err(invalid)?;

        Ok(ToolResult::success(format!(
            "Updated cell {index} in {}",
            self.sandbox.display_relative(&path)
        )))
    }
}

/// Remove a cell.
pub struct DeleteCellTool {
    sandbox: Sandbox,
}

impl DeleteCellTool {
    pub fn new(sandbox: Sandbox) -> Self {
        Self { sandbox }
    }
}

#[async_trait]
impl Tool for DeleteCellTool {
    fn name(&self) -> &str {
        "delete_cell"
    }

    fn description(&self) -> &str {
        "Delete a notebook cell, identified by id or index."
    }

    fn parameters_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "path": path_schema(),
                "cell": cell_schema()
            },
            "required": ["path", "cell"]
        })
    }

    fn tier(&self) -> ToolTier {
        ToolTier::Structured
    }

    async fn execute(&self, arguments: Value) -> Result<ToolResult, ToolError> {
        let path = notebook_path(&self.sandbox, &arguments)?;
        let cell = cell_arg(&arguments)?;

        let mut notebook = Notebook::load(&path).await.map_err(invalid)?;
        let index = notebook.locate(&cell).map_err(invalid)?;
        let removed = notebook.remove(index).map_err(invalid)?;
        notebook.save(&path).await.map_err(invalid)?;

        Ok(ToolResult::success(format!(
            "Deleted {} cell {index} from {}",
            removed.cell_type.as_str(),
            self.sandbox.display_relative(&path)
        )))
    }
}
