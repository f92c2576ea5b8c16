//! 检查点存储：每次状态转移后按 thread_id 写入一个版本
//!
//! - MemoryCheckpointStore：进程内（测试 / 演示）
//! - SqliteCheckpointStore：rusqlite，连接外包 Mutex，阻塞操作放进 spawn_blocking；每次写一个事务

use std::collections::HashMap;
use std::path::Path;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use tokio::sync::RwLock;

use super::PersistenceError;
use crate::core::RunState;

/// 检查点元数据（history 列表用）
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CheckpointMeta {
    pub thread_id: String,
    /// 该 thread 内单调递增的版本号，从 1 开始
    pub version: u64,
    /// 产生本次转移的组件（Supervisor / Planner / Researcher / user ...）
    pub source: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Clone, Debug, PartialEq)]
pub struct Checkpoint {
    pub meta: CheckpointMeta,
    pub state: RunState,
}

/// thread 列表项
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ThreadSummary {
    pub thread_id: String,
    pub latest_version: u64,
    pub updated_at: DateTime<Utc>,
}

/// 检查点存储接口
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// 写入新版本，返回版本号
    async fn put(&self, thread_id: &str, source: &str, state: &RunState)
        -> Result<u64, PersistenceError>;

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError>;

    async fn get(&self, thread_id: &str, version: u64)
        -> Result<Option<Checkpoint>, PersistenceError>;

    /// 按版本升序
    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, PersistenceError>;

    /// 按最近更新时间降序
    async fn threads(&self) -> Result<Vec<ThreadSummary>, PersistenceError>;

    /// 只保留最新 keep 个版本，返回删除数量
    async fn prune(&self, thread_id: &str, keep: usize) -> Result<usize, PersistenceError>;
}

/// 内存检查点存储
#[derive(Debug, Default)]
pub struct MemoryCheckpointStore {
    threads: RwLock<HashMap<String, Vec<Checkpoint>>>,
}

impl MemoryCheckpointStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl CheckpointStore for MemoryCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        source: &str,
        state: &RunState,
    ) -> Result<u64, PersistenceError> {
        let mut threads = self.threads.write().await;
        let lineage = threads.entry(thread_id.to_string()).or_default();
        let version = lineage.last().map(|c| c.meta.version + 1).unwrap_or(1);
        lineage.push(Checkpoint {
            meta: CheckpointMeta {
                thread_id: thread_id.to_string(),
                version,
                source: source.to_string(),
                created_at: Utc::now(),
            },
            state: state.clone(),
        });
        Ok(version)
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .and_then(|l| l.last().cloned()))
    }

    async fn get(
        &self,
        thread_id: &str,
        version: u64,
    ) -> Result<Option<Checkpoint>, PersistenceError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .and_then(|l| l.iter().find(|c| c.meta.version == version).cloned()))
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, PersistenceError> {
        Ok(self
            .threads
            .read()
            .await
            .get(thread_id)
            .map(|l| l.iter().map(|c| c.meta.clone()).collect())
            .unwrap_or_default())
    }

    async fn threads(&self) -> Result<Vec<ThreadSummary>, PersistenceError> {
        let mut out: Vec<ThreadSummary> = self
            .threads
            .read()
            .await
            .values()
            .filter_map(|l| l.last())
            .map(|c| ThreadSummary {
                thread_id: c.meta.thread_id.clone(),
                latest_version: c.meta.version,
                updated_at: c.meta.created_at,
            })
            .collect();
        out.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(out)
    }

    async fn prune(&self, thread_id: &str, keep: usize) -> Result<usize, PersistenceError> {
        let mut threads = self.threads.write().await;
        let Some(lineage) = threads.get_mut(thread_id) else {
            return Ok(0);
        };
        let excess = lineage.len().saturating_sub(keep.max(1));
        lineage.drain(..excess);
        Ok(excess)
    }
}

/// SQLite 检查点存储
#[derive(Clone)]
pub struct SqliteCheckpointStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCheckpointStore {
    /// 打开（必要时创建）数据库文件并建表
    pub fn open(path: impl AsRef<Path>) -> Result<Self, PersistenceError> {
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }
        Self::init(Connection::open(path)?)
    }

    pub fn open_in_memory() -> Result<Self, PersistenceError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, PersistenceError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS checkpoints (
                 id INTEGER PRIMARY KEY AUTOINCREMENT,
                 thread_id TEXT NOT NULL,
                 version INTEGER NOT NULL,
                 source TEXT NOT NULL,
                 state TEXT NOT NULL,
                 created_at TEXT NOT NULL,
                 UNIQUE(thread_id, version)
             );
             CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id, version);",
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// 在阻塞线程池中持锁执行数据库操作
    async fn with_conn<T, F>(&self, f: F) -> Result<T, PersistenceError>
    where
        T: Send + 'static,
        F: FnOnce(&mut Connection) -> Result<T, PersistenceError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || {
            let mut guard = conn
                .lock()
                .map_err(|e| PersistenceError::Storage(format!("Lock error: {}", e)))?;
            f(&mut guard)
        })
        .await
        .map_err(|e| PersistenceError::Storage(format!("Blocking task failed: {}", e)))?
    }
}

fn parse_time(raw: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

fn row_to_checkpoint(
    thread_id: &str,
    version: i64,
    source: String,
    state: String,
    created_at: String,
) -> Result<Checkpoint, PersistenceError> {
    Ok(Checkpoint {
        meta: CheckpointMeta {
            thread_id: thread_id.to_string(),
            version: version as u64,
            source,
            created_at: parse_time(&created_at),
        },
        state: serde_json::from_str(&state)?,
    })
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(
        &self,
        thread_id: &str,
        source: &str,
        state: &RunState,
    ) -> Result<u64, PersistenceError> {
        let thread_id = thread_id.to_string();
        let source = source.to_string();
        let state_json = serde_json::to_string(state)?;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let version: i64 = tx.query_row(
                "SELECT COALESCE(MAX(version), 0) + 1 FROM checkpoints WHERE thread_id = ?1",
                params![thread_id],
                |row| row.get(0),
            )?;
            tx.execute(
                "INSERT INTO checkpoints (thread_id, version, source, state, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![thread_id, version, source, state_json, Utc::now().to_rfc3339()],
            )?;
            tx.commit()?;
            Ok(version as u64)
        })
        .await
    }

    async fn latest(&self, thread_id: &str) -> Result<Option<Checkpoint>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(i64, String, String, String)> = conn
                .query_row(
                    "SELECT version, source, state, created_at FROM checkpoints
                     WHERE thread_id = ?1 ORDER BY version DESC LIMIT 1",
                    params![thread_id],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(|(v, src, st, at)| row_to_checkpoint(&thread_id, v, src, st, at))
                .transpose()
        })
        .await
    }

    async fn get(
        &self,
        thread_id: &str,
        version: u64,
    ) -> Result<Option<Checkpoint>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let row: Option<(i64, String, String, String)> = conn
                .query_row(
                    "SELECT version, source, state, created_at FROM checkpoints
                     WHERE thread_id = ?1 AND version = ?2",
                    params![thread_id, version as i64],
                    |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?, row.get(3)?)),
                )
                .optional()?;
            row.map(|(v, src, st, at)| row_to_checkpoint(&thread_id, v, src, st, at))
                .transpose()
        })
        .await
    }

    async fn history(&self, thread_id: &str) -> Result<Vec<CheckpointMeta>, PersistenceError> {
        let thread_id = thread_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT version, source, created_at FROM checkpoints
                 WHERE thread_id = ?1 ORDER BY version ASC",
            )?;
            let rows = stmt.query_map(params![thread_id], |row| {
                let version: i64 = row.get(0)?;
                let source: String = row.get(1)?;
                let created_at: String = row.get(2)?;
                Ok((version, source, created_at))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (version, source, created_at) = row?;
                out.push(CheckpointMeta {
                    thread_id: thread_id.clone(),
                    version: version as u64,
                    source,
                    created_at: parse_time(&created_at),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn threads(&self) -> Result<Vec<ThreadSummary>, PersistenceError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                "SELECT thread_id, MAX(version), MAX(created_at) FROM checkpoints
                 GROUP BY thread_id ORDER BY MAX(created_at) DESC",
            )?;
            let rows = stmt.query_map([], |row| {
                let thread_id: String = row.get(0)?;
                let version: i64 = row.get(1)?;
                let updated_at: String = row.get(2)?;
                Ok((thread_id, version, updated_at))
            })?;
            let mut out = Vec::new();
            for row in rows {
                let (thread_id, version, updated_at) = row?;
                out.push(ThreadSummary {
                    thread_id,
                    latest_version: version as u64,
                    updated_at: parse_time(&updated_at),
                });
            }
            Ok(out)
        })
        .await
    }

    async fn prune(&self, thread_id: &str, keep: usize) -> Result<usize, PersistenceError> {
        let thread_id = thread_id.to_string();
        let keep = keep.max(1) as i64;
        self.with_conn(move |conn| {
            let tx = conn.transaction()?;
            let deleted = tx.execute(
                "DELETE FROM checkpoints WHERE thread_id = ?1 AND version <= (
                     SELECT COALESCE(MAX(version), 0) - ?2 FROM checkpoints WHERE thread_id = ?1
                 )",
                params![thread_id, keep],
            )?;
            tx.commit()?;
            Ok(deleted)
        })
        .await
    }
}
