//! Error types for the CellPilot domain.
//!
//! Uses `thiserror` for ergonomic error definitions.
//! Each bounded context has its own error variant.

use thiserror::Error;

/// The top-level error type for CellPilot operations outside a turn.
#[derive(Debug, Error)]
pub enum Error {
    // --- Provider errors ---
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    // --- Memory errors ---
    #[error("Memory error: {0}")]
    Memory(#[from] MemoryError),

    // --- Tool errors ---
    #[error("Tool error: {0}")]
    Tool(#[from] ToolError),

    // --- Turn errors ---
    #[error("Turn error: {0}")]
    Turn(#[from] TurnError),

    // --- Configuration errors ---
    #[error("Configuration error: {message}")]
    Config { message: String },

    // --- Serialization ---
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    // --- Generic ---
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Result type alias using our Error.
pub type Result<T> = std::result::Result<T, Error>;

// --- Bounded context errors ---

#[derive(Debug, Clone, Error)]
pub enum ProviderError {
    #[error("API request failed: {message} (status: {status_code})")]
    ApiError {
        status_code: u16,
        message: String,
    },

    #[error("Rate limited by provider, retry after {retry_after_secs}s")]
    RateLimited { retry_after_secs: u64 },

    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    #[error("Model not found: {0}")]
    ModelNotFound(String),

    #[error("Stream interrupted: {0}")]
    StreamInterrupted(String),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("Request timed out: {0}")]
    Timeout(String),

    #[error("Network error: {0}")]
    Network(String),
}

#[derive(Debug, Clone, Error)]
pub enum MemoryError {
    /// The checkpoint store could not be opened (locked, unreadable, bad path).
    #[error("Checkpoint storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Query failed: {0}")]
    QueryFailed(String),

    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// Another writer committed to the same thread since this checkpoint was loaded.
    #[error("Checkpoint version conflict on thread {thread_id}: expected {expected}, found {actual}")]
    VersionConflict {
        thread_id: String,
        expected: u64,
        actual: u64,
    },

    #[error("Checkpoint store has been closed")]
    Closed,
}

#[derive(Debug, Clone, Error)]
pub enum ToolError {
    #[error("Tool not found: {0}")]
    NotFound(String),

    #[error("Tool execution failed: {tool_name} — {reason}")]
    ExecutionFailed { tool_name: String, reason: String },

    #[error("Tool timed out: {tool_name} after {timeout_secs}s")]
    Timeout { tool_name: String, timeout_secs: u64 },

    #[error("Permission denied: {tool_name} — {reason}")]
    PermissionDenied { tool_name: String, reason: String },

    #[error("Sandbox violation: {0}")]
    SandboxViolation(String),

    #[error("Invalid tool arguments: {0}")]
    InvalidArguments(String),

    #[error("Duplicate tool name: {0}")]
    DuplicateName(String),
}

/// Errors that end a single user turn.
///
/// Tool failures never show up here: they are converted into error-tagged
/// tool results and handed back to the model.
#[derive(Debug, Clone, Error)]
pub enum TurnError {
    #[error("Configuration missing: {0}")]
    ConfigurationMissing(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Model invocation failed: {0}")]
    ModelInvocationFailed(#[from] ProviderError),

    #[error("Reasoning loop exceeded {limit} iterations")]
    IterationLimit { limit: u32 },

    #[error("Turn timed out after {secs}s")]
    Timeout { secs: u64 },

    #[error("Turn cancelled")]
    Cancelled,

    #[error("Checkpoint commit failed: {0}")]
    Storage(MemoryError),
}

impl From<MemoryError> for TurnError {
    fn from(err: MemoryError) -> Self {
        match err {
            MemoryError::StorageUnavailable(reason) => TurnError::StorageUnavailable(reason),
            other => TurnError::Storage(other),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn provider_error_displays_correctly() {
        let err = Error::Provider(ProviderError::ApiError {
            status_code: 429,
            message: "Too many requests".into(),
        });
        assert!(err.to_string().contains("429"));
        assert!(err.to_string().contains("Too many requests"));
    }

    #[test]
    fn tool_error_displays_correctly() {
        let err = Error::Tool(ToolError::PermissionDenied {
            tool_name: "shell".into(),
            reason: "command not in allowlist".into(),
        });
        assert!(err.to_string().contains("shell"));
        assert!(err.to_string().contains("allowlist"));
    }

    #[test]
    fn storage_unavailable_maps_to_turn_error() {
        let err: TurnError = MemoryError::StorageUnavailable("database is locked".into()).into();
        assert!(matches!(err, TurnError::StorageUnavailable(ref r) if r.contains("locked")));

        let err: TurnError = MemoryError::Closed.into();
        assert!(matches!(err, TurnError::Storage(MemoryError::Closed)));
    }

    #[test]
    fn version_conflict_names_the_thread() {
        let err = MemoryError::VersionConflict {
            thread_id: "room-1".into(),
            expected: 2,
            actual: 3,
        };
        let text = err.to_string();
        assert!(text.contains("room-1"));
        assert!(text.contains("expected 2"));
    }
}
