//! In-memory checkpoint store — useful for testing and ephemeral sessions.

use async_trait::async_trait;
use cellpilot_core::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use cellpilot_core::error::MemoryError;
use cellpilot_core::message::ThreadId;
use chrono::Utc;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::sync::RwLock;

/// A checkpoint store that keeps every thread in a HashMap.
/// Same commit semantics as the SQLite store, nothing survives the process.
pub struct InMemoryCheckpointStore {
    threads: RwLock<HashMap<String, Checkpoint>>,
    closed: AtomicBool,
}

impl InMemoryCheckpointStore {
    pub fn new() -> Self {
        Self {
            threads: RwLock::new(HashMap::new()),
            closed: AtomicBool::new(false),
        }
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryError::Closed);
        }
        Ok(())
    }
}

impl Default for InMemoryCheckpointStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CheckpointStore for InMemoryCheckpointStore {
    fn name(&self) -> &str {
        "in_memory"
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, MemoryError> {
        self.ensure_open()?;
        Ok(self.threads.read().await.get(thread_id.as_str()).cloned())
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, MemoryError> {
        self.ensure_open()?;
        let mut threads = self.threads.write().await;

        let actual = threads
            .get(checkpoint.thread_id.as_str())
            .map(|cp| cp.version)
            .unwrap_or(0);
        if actual != checkpoint.version {
            return Err(MemoryError::VersionConflict {
                thread_id: checkpoint.thread_id.to_string(),
                expected: checkpoint.version,
                actual,
            });
        }

        let mut committed = checkpoint.clone();
        committed.version = actual + 1;
        committed.updated_at = Utc::now();
        threads.insert(checkpoint.thread_id.0.clone(), committed.clone());
        Ok(committed)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, MemoryError> {
        self.ensure_open()?;
        let threads = self.threads.read().await;
        let mut summaries: Vec<ThreadSummary> = threads
            .values()
            .map(|cp| ThreadSummary {
                thread_id: cp.thread_id.clone(),
                version: cp.version,
                message_count: cp.messages.len(),
                updated_at: cp.updated_at,
            })
            .collect();
        summaries.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(summaries)
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }
}
