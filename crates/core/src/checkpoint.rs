//! Checkpoint trait — durable per-thread conversation state.
//!
//! A checkpoint is the full message history of one thread. Stores keep at
//! most one live checkpoint per thread id and overwrite it on every commit;
//! they never merge two histories.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use crate::error::MemoryError;
use crate::message::{Message, ThreadId};

/// Snapshot of a thread's reasoning state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// The thread this checkpoint belongs to
    pub thread_id: ThreadId,

    /// Commit counter. 0 = never committed.
    pub version: u64,

    /// Ordered message history (user, assistant and tool messages)
    pub messages: Vec<Message>,

    /// When the thread was first committed
    pub created_at: DateTime<Utc>,

    /// When the thread was last committed
    pub updated_at: DateTime<Utc>,
}

impl Checkpoint {
    /// A fresh, never-committed checkpoint.
    pub fn empty(thread_id: ThreadId) -> Self {
        let now = Utc::now();
        Self {
            thread_id,
            version: 0,
            messages: Vec::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Append a message to the history.
    pub fn push(&mut self, message: Message) {
        self.updated_at = Utc::now();
        self.messages.push(message);
    }

    pub fn is_committed(&self) -> bool {
        self.version > 0
    }
}

/// Listing entry for a stored thread.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ThreadSummary {
    pub thread_id: ThreadId,
    pub version: u64,
    pub message_count: usize,
    pub updated_at: DateTime<Utc>,
}

/// The core CheckpointStore trait.
///
/// Implementations: SQLite (durable), in-memory (tests).
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// The backend name (e.g., "sqlite", "in_memory").
    fn name(&self) -> &str;

    /// Load the committed checkpoint of a thread, if any.
    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, MemoryError>;

    /// Overwrite the thread's checkpoint.
    ///
    /// `checkpoint.version` must equal the currently stored version (0 when
    /// the thread has never been committed), otherwise the commit is rejected
    /// with [`MemoryError::VersionConflict`]. Returns the stored checkpoint
    /// with its new version.
    async fn commit(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, MemoryError>;

    /// List stored threads, most recently updated first.
    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, MemoryError>;

    /// Release the backing connection. Later calls fail with [`MemoryError::Closed`].
    async fn close(&self);
}
