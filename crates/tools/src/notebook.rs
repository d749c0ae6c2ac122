//! In-process notebook document model (a subset of nbformat v4).
//!
//! Only what the notebook tools need is typed: cell ids, types and sources.
//! Every other field round-trips untouched through the `extra` maps.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::{Map, Value};
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CellType {
    Code,
    Markdown,
    Raw,
}

impl CellType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "code" => Some(Self::Code),
            "markdown" => Some(Self::Markdown),
            "raw" => Some(Self::Raw),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Code => "code",
            Self::Markdown => "markdown",
            Self::Raw => "raw",
        }
    }
}

/// One notebook cell.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Cell {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,

    pub cell_type: CellType,

    #[serde(serialize_with = "source_to_lines", deserialize_with = "source_from_json")]
    pub source: String,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    /// outputs, execution_count, attachments, ...
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Cell {
    pub fn new(cell_type: CellType, source: impl Into<String>) -> Self {
        let mut extra = Map::new();
        if cell_type == CellType::Code {
            extra.insert("outputs".into(), Value::Array(vec![]));
            extra.insert("execution_count".into(), Value::Null);
        }
        Self {
            id: Some(short_cell_id()),
            cell_type,
            source: source.into(),
            metadata: Map::new(),
            extra,
        }
    }

    /// Replace the source. Code cells lose their stale outputs.
    pub fn set_source(&mut self, source: impl Into<String>) {
        self.source = source.into();
        if self.cell_type == CellType::Code {
            self.extra.insert("outputs".into(), Value::Array(vec![]));
            self.extra.insert("execution_count".into(), Value::Null);
        }
    }
}

/// A whole notebook document.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notebook {
    #[serde(default)]
    pub cells: Vec<Cell>,

    #[serde(default)]
    pub metadata: Map<String, Value>,

    #[serde(default = "default_nbformat")]
    pub nbformat: u32,

    #[serde(default = "default_nbformat_minor")]
    pub nbformat_minor: u32,
}

fn default_nbformat() -> u32 {
    4
}
fn default_nbformat_minor() -> u32 {
    5
}

impl Default for Notebook {
    fn default() -> Self {
        Self {
            cells: Vec::new(),
            metadata: Map::new(),
            nbformat: default_nbformat(),
            nbformat_minor: default_nbformat_minor(),
        }
    }
}

/// Errors from the document model. The tools turn these into invalid-argument errors.
#[derive(Debug, thiserror::Error)]
pub enum NotebookError {
    #[error("cannot read notebook {path}: {reason}")]
    Read { path: String, reason: String },

    #[error("{path} is not a valid notebook: {reason}")]
    Parse { path: String, reason: String },

    #[error("cannot write notebook {path}: {reason}")]
    Write { path: String, reason: String },

    #[error("cell index {index} out of range (notebook has {len} cells)")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("no cell with id '{0}'")]
    UnknownCellId(String),
}

impl Notebook {
    pub async fn load(path: &Path) -> Result<Self, NotebookError> {
        let text = tokio::fs::read_to_string(path).await.map_err(|e| NotebookError::Read {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        serde_json::from_str(&text).map_err(|e| NotebookError::Parse {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub async fn save(&self, path: &Path) -> Result<(), NotebookError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| NotebookError::Write {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;
        tokio::fs::write(path, text + "\n")
            .await
            .map_err(|e| NotebookError::Write {
                path: path.display().to_string(),
                reason: e.to_string(),
            })
    }

    /// Find a cell by id, or by index when `cell` is a plain number.
    pub fn locate(&self, cell: &str) -> Result<usize, NotebookError> {
        if let Some(pos) = self.cells.iter().position(|c| c.id.as_deref() == Some(cell)) {
            return Ok(pos);
        }
        match cell.parse::<usize>() {
            Ok(index) if index < self.cells.len() => Ok(index),
            Ok(index) => Err(NotebookError::IndexOutOfRange {
                index,
                len: self.cells.len(),
            }),
            Err(_) => Err(NotebookError::UnknownCellId(cell.to_string())),
        }
    }

    /// Insert at `index` (append when `None`). Returns the position used.
    pub fn insert(&mut self, index: Option<usize>, cell: Cell) -> Result<usize, NotebookError> {
        let len = self.cells.len();
        let at = index.unwrap_or(len);
        if at > len {
            return Err(NotebookError::IndexOutOfRange { index: at, len });
        }
        self.cells.insert(at, cell);
        Ok(at)
    }

    pub fn remove(&mut self, index: usize) -> Result<Cell, NotebookError> {
        if index >= self.cells.len() {
            return Err(NotebookError::IndexOutOfRange {
                index,
                len: self.cells.len(),
            });
        }
        Ok(self.cells.remove(index))
    }

    /// Plain-text rendering for the model.
    pub fn render(&self) -> String {
        let mut out = String::new();
        for (i, cell) in self.cells.iter().enumerate() {
            let id = cell.id.as_deref().unwrap_or("-");
            out.push_str(&format!("[{i}] {} (id: {id})\n", cell.cell_type.as_str()));
            out.push_str(&cell.source);
            if !cell.source.ends_with('\n') {
                out.push('\n');
            }
            out.push('\n');
        }
        if out.is_empty() {
            out.push_str("(empty notebook)\n");
        }
        out
    }
}

fn short_cell_id() -> String {
    uuid::Uuid::new_v4().simple().to_string()[..8].to_string()
}

fn source_from_json<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Source {
        Text(String),
        Lines(Vec<String>),
    }
    Ok(match Source::deserialize(deserializer)? {
        Source::Text(text) => text,
        Source::Lines(lines) => lines.concat(),
    })
}

fn source_to_lines<S: Serializer>(source: &str, serializer: S) -> Result<S::Ok, S::Error> {
    let lines: Vec<&str> = source.split_inclusive('\n').collect();
    lines.serialize(serializer)
}
