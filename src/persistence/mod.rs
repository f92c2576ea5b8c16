//! 持久化：运行状态检查点（内存 / SQLite）与产物文件

pub mod artifacts;
pub mod checkpoint;

use thiserror::Error;

pub use artifacts::ArtifactSink;
pub use checkpoint::{
    Checkpoint, CheckpointMeta, CheckpointStore, MemoryCheckpointStore, SqliteCheckpointStore,
    ThreadSummary,
};

#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
