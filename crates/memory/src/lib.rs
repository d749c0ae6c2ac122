//! Persistent memory for CellPilot: durable per-thread conversation checkpoints.

pub mod in_memory;
pub mod store;

#[cfg(feature = "sqlite")]
pub mod sqlite;

pub use in_memory::InMemoryCheckpointStore;
pub use store::{CheckpointHandle, MemoryStore};

#[cfg(feature = "sqlite")]
pub use sqlite::SqliteCheckpointStore;
