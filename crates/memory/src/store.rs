//! Process-scoped memory store.
//!
//! One `MemoryStore` exists per installation. The backing checkpoint store is
//! opened lazily on first use, shared by every thread, and released exactly
//! once. A failed open is not cached, so the next turn tries again.

use cellpilot_core::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use cellpilot_core::error::MemoryError;
use cellpilot_core::message::ThreadId;
use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info};

type Opener =
    Box<dyn Fn() -> BoxFuture<'static, Result<Arc<dyn CheckpointStore>, MemoryError>> + Send + Sync>;

/// Lazily opened, close-once owner of the checkpoint store.
pub struct MemoryStore {
    label: String,
    opener: Opener,
    store: OnceCell<Arc<dyn CheckpointStore>>,
    closed: AtomicBool,
}

impl MemoryStore {
    /// A store backed by the SQLite file at `path`.
    #[cfg(feature = "sqlite")]
    pub fn sqlite(path: impl Into<std::path::PathBuf>, busy_timeout: std::time::Duration) -> Self {
        let path = path.into();
        let label = path.display().to_string();
        Self::with_opener(label, move || {
            let path = path.clone();
            async move {
                let store = crate::sqlite::SqliteCheckpointStore::open(&path, busy_timeout).await?;
                Ok(Arc::new(store) as Arc<dyn CheckpointStore>)
            }
            .boxed()
        })
    }

    /// A store backed by a fresh in-memory checkpoint store.
    pub fn in_memory() -> Self {
        Self::with_opener("in-memory", || {
            async {
                Ok(Arc::new(crate::in_memory::InMemoryCheckpointStore::new())
                    as Arc<dyn CheckpointStore>)
            }
            .boxed()
        })
    }

    /// A store whose backing store is produced by `opener` on first use.
    pub fn with_opener<F>(label: impl Into<String>, opener: F) -> Self
    where
        F: Fn() -> BoxFuture<'static, Result<Arc<dyn CheckpointStore>, MemoryError>>
            + Send
            + Sync
            + 'static,
    {
        Self {
            label: label.into(),
            opener: Box::new(opener),
            store: OnceCell::new(),
            closed: AtomicBool::new(false),
        }
    }

    /// Where the store lives (a path, or a description for non-file stores).
    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_open(&self) -> bool {
        self.store.initialized() && !self.closed.load(Ordering::SeqCst)
    }

    async fn backing(&self) -> Result<Arc<dyn CheckpointStore>, MemoryError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(MemoryError::Closed);
        }
        let store = self
            .store
            .get_or_try_init(|| async {
                debug!(store = %self.label, "Opening checkpoint store");
                (self.opener)().await
            })
            .await?;
        Ok(Arc::clone(store))
    }

    /// Get a handle bound to `thread_id`, opening the store if needed.
    pub async fn get_or_create(&self, thread_id: &ThreadId) -> Result<CheckpointHandle, MemoryError> {
        if thread_id.as_str().trim().is_empty() {
            return Err(MemoryError::Storage("thread id must not be empty".into()));
        }
        let store = self.backing().await?;
        Ok(CheckpointHandle {
            thread_id: thread_id.clone(),
            store,
        })
    }

    /// Every stored thread, most recently updated first.
    pub async fn list_threads(&self) -> Result<Vec<ThreadSummary>, MemoryError> {
        self.backing().await?.list_threads().await
    }

    /// Release the backing store. Only the first call has any effect.
    pub async fn close(&self) {
        if self.closed.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(store) = self.store.get() {
            store.close().await;
            info!(store = %self.label, "Memory store released");
        }
    }

    /// Run `work`, then close the store, whether `work` returns or panics.
    pub async fn scoped<F, T>(&self, work: F) -> T
    where
        F: Future<Output = T>,
    {
        let outcome = AssertUnwindSafe(work).catch_unwind().await;
        self.close().await;
        match outcome {
            Ok(value) => value,
            Err(panic) => std::panic::resume_unwind(panic),
        }
    }
}

impl std::fmt::Debug for MemoryStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryStore")
            .field("label", &self.label)
            .field("open", &self.is_open())
            .finish()
    }
}

/// A checkpoint store bound to one thread.
#[derive(Clone)]
pub struct CheckpointHandle {
    thread_id: ThreadId,
    store: Arc<dyn CheckpointStore>,
}

impl std::fmt::Debug for CheckpointHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CheckpointHandle")
            .field("thread_id", &self.thread_id)
            .finish()
    }
}

impl CheckpointHandle {
    pub fn thread_id(&self) -> &ThreadId {
        &self.thread_id
    }

    /// The last committed checkpoint, or a fresh one for a new thread.
    pub async fn load(&self) -> Result<Checkpoint, MemoryError> {
        Ok(self
            .store
            .load(&self.thread_id)
            .await?
            .unwrap_or_else(|| Checkpoint::empty(self.thread_id.clone())))
    }

    /// Commit `checkpoint` (which must belong to this thread).
    pub async fn commit(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, MemoryError> {
        if checkpoint.thread_id != self.thread_id {
            return Err(MemoryError::Storage(format!(
                "checkpoint for {} committed through handle for {}",
                checkpoint.thread_id, self.thread_id
            )));
        }
        self.store.commit(checkpoint).await
    }
}
