//! SQLite checkpoint store.
//!
//! One database file per installation with a single table:
//! - `checkpoints`: one row per thread, the full history as a JSON array
//!
//! Every commit overwrites the thread's row. The `version` column enforces
//! the commit precondition so a stale writer can never clobber newer state.

use async_trait::async_trait;
use cellpilot_core::checkpoint::{Checkpoint, CheckpointStore, ThreadSummary};
use cellpilot_core::error::MemoryError;
use cellpilot_core::message::{Message, ThreadId};
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// A durable checkpoint store backed by SQLite.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    /// Open (or create) the store at `path`.
    ///
    /// Missing parent directories are created. Anything that keeps the file
    /// from being opened and migrated is reported as
    /// [`MemoryError::StorageUnavailable`].
    pub async fn open(path: &Path, busy_timeout: Duration) -> Result<Self, MemoryError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                MemoryError::StorageUnavailable(format!(
                    "cannot create {}: {e}",
                    parent.display()
                ))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(busy_timeout);

        let store = Self::connect(options).await.map_err(|e| match e {
            MemoryError::StorageUnavailable(reason) => MemoryError::StorageUnavailable(format!(
                "{}: {reason}",
                path.display()
            )),
            other => MemoryError::StorageUnavailable(format!("{}: {other}", path.display())),
        })?;
        info!(path = %path.display(), "SQLite checkpoint store opened");
        Ok(store)
    }

    /// Open a store from a connection URL. Pass `"sqlite::memory:"` for an
    /// ephemeral database.
    pub async fn new(url: &str) -> Result<Self, MemoryError> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| MemoryError::StorageUnavailable(format!("Invalid SQLite URL: {e}")))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self, MemoryError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| MemoryError::StorageUnavailable(format!("Failed to open SQLite: {e}")))?;

        let store = Self { pool };
        store.run_migrations().await?;
        Ok(store)
    }

    async fn run_migrations(&self) -> Result<(), MemoryError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS checkpoints (
                thread_id   TEXT PRIMARY KEY NOT NULL,
                version     INTEGER NOT NULL,
                messages    TEXT NOT NULL DEFAULT '[]',
                created_at  TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("checkpoints table: {e}")))?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_checkpoints_updated_at ON checkpoints(updated_at DESC)",
        )
        .execute(&self.pool)
        .await
        .map_err(|e| MemoryError::MigrationFailed(format!("updated_at index: {e}")))?;

        Ok(())
    }

    fn ensure_open(&self) -> Result<(), MemoryError> {
        if self.pool.is_closed() {
            return Err(MemoryError::Closed);
        }
        Ok(())
    }

    fn parse_time(value: &str) -> DateTime<Utc> {
        DateTime::parse_from_rfc3339(value)
            .map(|dt| dt.with_timezone(&Utc))
            .unwrap_or_else(|_| Utc::now())
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, MemoryError> {
        let thread_id: String = row
            .try_get("thread_id")
            .map_err(|e| MemoryError::QueryFailed(format!("thread_id column: {e}")))?;
        let version: i64 = row
            .try_get("version")
            .map_err(|e| MemoryError::QueryFailed(format!("version column: {e}")))?;
        let messages_json: String = row
            .try_get("messages")
            .map_err(|e| MemoryError::QueryFailed(format!("messages column: {e}")))?;
        let created_at: String = row
            .try_get("created_at")
            .map_err(|e| MemoryError::QueryFailed(format!("created_at column: {e}")))?;
        let updated_at: String = row
            .try_get("updated_at")
            .map_err(|e| MemoryError::QueryFailed(format!("updated_at column: {e}")))?;

        let messages: Vec<Message> = serde_json::from_str(&messages_json)
            .map_err(|e| MemoryError::QueryFailed(format!("corrupt history for {thread_id}: {e}")))?;

        Ok(Checkpoint {
            thread_id: ThreadId(thread_id),
            version: version.max(0) as u64,
            messages,
            created_at: Self::parse_time(&created_at),
            updated_at: Self::parse_time(&updated_at),
        })
    }

    async fn stored_version(&self, thread_id: &ThreadId) -> Result<u64, MemoryError> {
        let row = sqlx::query("SELECT version FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("version lookup: {e}")))?;
        match row {
            Some(row) => {
                let v: i64 = row
                    .try_get("version")
                    .map_err(|e| MemoryError::QueryFailed(format!("version column: {e}")))?;
                Ok(v.max(0) as u64)
            }
            None => Ok(0),
        }
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    fn name(&self) -> &str {
        "sqlite"
    }

    async fn load(&self, thread_id: &ThreadId) -> Result<Option<Checkpoint>, MemoryError> {
        self.ensure_open()?;
        let row = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| MemoryError::QueryFailed(format!("LOAD {thread_id}: {e}")))?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn commit(&self, checkpoint: &Checkpoint) -> Result<Checkpoint, MemoryError> {
        self.ensure_open()?;

        let messages_json = serde_json::to_string(&checkpoint.messages)
            .map_err(|e| MemoryError::Storage(format!("History serialization: {e}")))?;
        let now = Utc::now();
        let expected = checkpoint.version;
        let next = expected + 1;

        // Each statement checks and writes atomically; zero affected rows
        // means another writer got there first.
        let result = if expected == 0 {
            sqlx::query(
                r#"
                INSERT INTO checkpoints (thread_id, version, messages, created_at, updated_at)
                VALUES (?, ?, ?, ?, ?)
                ON CONFLICT(thread_id) DO NOTHING
                "#,
            )
            .bind(checkpoint.thread_id.as_str())
            .bind(next as i64)
            .bind(&messages_json)
            .bind(checkpoint.created_at.to_rfc3339())
            .bind(now.to_rfc3339())
            .execute(&self.pool)
            .await
        } else {
            sqlx::query(
                r#"
                UPDATE checkpoints
                SET version = ?, messages = ?, updated_at = ?
                WHERE thread_id = ? AND version = ?
                "#,
            )
            .bind(next as i64)
            .bind(&messages_json)
            .bind(now.to_rfc3339())
            .bind(checkpoint.thread_id.as_str())
            .bind(expected as i64)
            .execute(&self.pool)
            .await
        };
        let result = result.map_err(|e| {
            MemoryError::Storage(format!("COMMIT {} failed: {e}", checkpoint.thread_id))
        })?;

        if result.rows_affected() == 0 {
            let actual = self.stored_version(&checkpoint.thread_id).await?;
            return Err(MemoryError::VersionConflict {
                thread_id: checkpoint.thread_id.to_string(),
                expected,
                actual,
            });
        }

        debug!(
            thread_id = %checkpoint.thread_id,
            version = next,
            messages = checkpoint.messages.len(),
            "Checkpoint committed"
        );

        let mut committed = checkpoint.clone();
        committed.version = next;
        committed.updated_at = now;
        Ok(committed)
    }

    async fn list_threads(&self) -> Result<Vec<ThreadSummary>, MemoryError> {
        self.ensure_open()?;
        let rows = sqlx::query(
            r#"
            SELECT thread_id, version, json_array_length(messages) AS message_count, updated_at
            FROM checkpoints
            ORDER BY updated_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(|e| MemoryError::QueryFailed(format!("LIST threads: {e}")))?;

        rows.iter()
            .map(|row| {
                let thread_id: String = row
                    .try_get("thread_id")
                    .map_err(|e| MemoryError::QueryFailed(format!("thread_id column: {e}")))?;
                let version: i64 = row
                    .try_get("version")
                    .map_err(|e| MemoryError::QueryFailed(format!("version column: {e}")))?;
                let message_count: i64 = row.try_get("message_count").unwrap_or(0);
                let updated_at: String = row
                    .try_get("updated_at")
                    .map_err(|e| MemoryError::QueryFailed(format!("updated_at column: {e}")))?;
                Ok(ThreadSummary {
                    thread_id: ThreadId(thread_id),
                    version: version.max(0) as u64,
                    message_count: message_count.max(0) as usize,
                    updated_at: Self::parse_time(&updated_at),
                })
            })
            .collect()
    }

    async fn close(&self) {
        if !self.pool.is_closed() {
            self.pool.close().await;
            info!("SQLite checkpoint store closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn open_in(dir: &tempfile::TempDir) -> SqliteCheckpointStore {
        SqliteCheckpointStore::open(&dir.path().join("memory.sqlite"), Duration::from_secs(1))
            .await
            .unwrap()
    }

    fn history(thread: &str, texts: &[&str]) -> Checkpoint {
        let mut cp = Checkpoint::empty(ThreadId::from(thread));
        for t in texts {
            cp.push(Message::user(*t));
        }
        cp
    }

    #[tokio::test]
    async fn first_commit_creates_version_one() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        let committed = store.commit(&history("room-1", &["hello"])).await.unwrap();
        assert_eq!(committed.version, 1);

        let loaded = store.load(&ThreadId::from("room-1")).await.unwrap().unwrap();
        assert_eq!(loaded.version, 1);
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "hello");
    }

    #[tokio::test]
    async fn unknown_thread_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        assert!(store.load(&ThreadId::from("nobody")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn commit_overwrites_never_merges() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        let v1 = store.commit(&history("room-1", &["a", "b"])).await.unwrap();
        let mut next = v1.clone();
        next.messages = vec![Message::user("only")];
        let v2 = store.commit(&next).await.unwrap();
        assert_eq!(v2.version, 2);

        let loaded = store.load(&ThreadId::from("room-1")).await.unwrap().unwrap();
        assert_eq!(loaded.messages.len(), 1);
        assert_eq!(loaded.messages[0].content, "only");
    }

    #[tokio::test]
    async fn stale_commit_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        let v1 = store.commit(&history("room-1", &["a"])).await.unwrap();
        let mut writer_a = v1.clone();
        let mut writer_b = v1.clone();
        writer_a.push(Message::assistant("from a"));
        writer_b.push(Message::assistant("from b"));

        store.commit(&writer_a).await.unwrap();
        let err = store.commit(&writer_b).await.unwrap_err();
        assert!(matches!(
            err,
            MemoryError::VersionConflict { expected: 1, actual: 2, .. }
        ));

        // A second "first" commit for an existing thread also conflicts.
        let err = store.commit(&history("room-1", &["again"])).await.unwrap_err();
        assert!(matches!(err, MemoryError::VersionConflict { expected: 0, .. }));
    }

    #[tokio::test]
    async fn threads_are_isolated() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;

        store.commit(&history("room-1", &["one"])).await.unwrap();
        store.commit(&history("room-2", &["two", "three"])).await.unwrap();

        let one = store.load(&ThreadId::from("room-1")).await.unwrap().unwrap();
        let two = store.load(&ThreadId::from("room-2")).await.unwrap().unwrap();
        assert_eq!(one.messages.len(), 1);
        assert_eq!(two.messages.len(), 2);

        let threads = store.list_threads().await.unwrap();
        assert_eq!(threads.len(), 2);
        let room2 = threads.iter().find(|t| t.thread_id.as_str() == "room-2").unwrap();
        assert_eq!(room2.message_count, 2);
        assert_eq!(room2.version, 1);
    }

    #[tokio::test]
    async fn history_survives_reopen() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = open_in(&dir).await;
            store.commit(&history("room-1", &["persisted"])).await.unwrap();
            store.close().await;
        }
        let store = open_in(&dir).await;
        let loaded = store.load(&ThreadId::from("room-1")).await.unwrap().unwrap();
        assert_eq!(loaded.messages[0].content, "persisted");
    }

    #[tokio::test]
    async fn closed_store_refuses_work() {
        let dir = tempfile::tempdir().unwrap();
        let store = open_in(&dir).await;
        store.close().await;
        store.close().await;
        let err = store.load(&ThreadId::from("room-1")).await.unwrap_err();
        assert!(matches!(err, MemoryError::Closed));
    }

    #[tokio::test]
    async fn unopenable_path_is_storage_unavailable() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("not-a-dir");
        std::fs::write(&blocker, "plain file").unwrap();

        let result =
            SqliteCheckpointStore::open(&blocker.join("memory.sqlite"), Duration::from_secs(1)).await;
        assert!(matches!(result, Err(MemoryError::StorageUnavailable(_))));
    }

    #[tokio::test]
    async fn in_memory_url_works() {
        let store = SqliteCheckpointStore::new("sqlite::memory:").await.unwrap();
        store.commit(&history("room-1", &["x"])).await.unwrap();
        assert_eq!(store.list_threads().await.unwrap().len(), 1);
    }
}
