//! SQLite-backed durable queue provider.
//!
//! Tasks live in a single `queue_tasks` table. Leasing runs inside an
//! `IMMEDIATE` transaction so that two processes sharing the database file
//! cannot lease the same task. All statements execute on the blocking pool
//! behind one connection guarded by a mutex.

use crate::client::QueueProvider;
use crate::error::{QueueError, SerializationError};
use crate::message::{
    LeasedTask, QueueName, QueueStats, ReceiptHandle, Task, TaskId, TaskState, Timestamp,
};
use crate::provider::{ProviderType, SqliteConfig};
use async_trait::async_trait;
use bytes::Bytes;
use rusqlite::{params, Connection, OptionalExtension, TransactionBehavior};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{debug, info};

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS queue_tasks (
    id               TEXT PRIMARY KEY,
    queue            TEXT NOT NULL,
    task_type        TEXT NOT NULL,
    payload          BLOB NOT NULL,
    state            TEXT NOT NULL,
    retry_count      INTEGER NOT NULL DEFAULT 0,
    max_retry        INTEGER NOT NULL,
    enqueued_at      INTEGER NOT NULL,
    available_at     INTEGER NOT NULL,
    lease_token      TEXT,
    lease_expires_at INTEGER,
    last_error       TEXT
);
CREATE INDEX IF NOT EXISTS idx_queue_tasks_ready
    ON queue_tasks (queue, state, available_at);
";

/// Durable queue provider storing tasks in a SQLite database file
pub struct SqliteProvider {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteProvider {
    /// Open (creating if needed) the database and apply the schema
    pub async fn open(config: SqliteConfig) -> Result<Self, QueueError> {
        let path = config.path.clone();
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, QueueError> {
            if let Some(parent) = config.path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| QueueError::ConnectionFailed {
                        message: format!("cannot create {}: {}", parent.display(), e),
                    })?;
                }
            }

            let conn = Connection::open(&config.path)?;
            conn.busy_timeout(Duration::from_millis(config.busy_timeout_ms))?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| QueueError::Storage {
            message: format!("sqlite open task failed: {}", e),
        })??;

        info!(path = %path.display(), "Opened SQLite task queue");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run a closure against the connection on the blocking pool
    async fn with_conn<F, T>(&self, f: F) -> Result<T, QueueError>
    where
        F: FnOnce(&mut Connection) -> Result<T, QueueError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| QueueError::Storage {
                message: "sqlite connection lock poisoned".to_string(),
            })?;
            f(&mut guard)
        })
        .await
        .map_err(|e| QueueError::Storage {
            message: format!("sqlite task failed: {}", e),
        })?
    }

    /// Settle an active task if the receipt still owns its lease
    async fn settle(
        &self,
        receipt: &ReceiptHandle,
        sql: &'static str,
        values: SettleValues,
    ) -> Result<(), QueueError> {
        let task_id = receipt.task_id().to_string();
        let token = receipt.lease_token().to_string();

        self.with_conn(move |conn| {
            let updated = match values {
                SettleValues::None => conn.execute(sql, params![task_id, token])?,
                SettleValues::Retry {
                    available_at,
                    error,
                } => conn.execute(sql, params![task_id, token, available_at, error])?,
                SettleValues::Archive { reason } => {
                    conn.execute(sql, params![task_id, token, reason])?
                }
            };

            if updated == 1 {
                return Ok(());
            }

            let exists: Option<String> = conn
                .query_row(
                    "SELECT id FROM queue_tasks WHERE id = ?1",
                    params![task_id],
                    |row| row.get(0),
                )
                .optional()?;
            match exists {
                Some(_) => Err(QueueError::LeaseLost { task_id }),
                None => Err(QueueError::TaskNotFound { task_id }),
            }
        })
        .await
    }
}

enum SettleValues {
    None,
    Retry { available_at: i64, error: String },
    Archive { reason: String },
}

fn corrupt(field: &str, message: impl Into<String>) -> QueueError {
    QueueError::SerializationError(SerializationError::CorruptField {
        field: field.to_string(),
        message: message.into(),
    })
}

fn timestamp_from_millis(field: &str, millis: i64) -> Result<Timestamp, QueueError> {
    Timestamp::from_unix_millis(millis).ok_or_else(|| corrupt(field, "timestamp out of range"))
}

#[async_trait]
impl QueueProvider for SqliteProvider {
    async fn enqueue(&self, task: &Task) -> Result<TaskId, QueueError> {
        let id = TaskId::new();
        let row_id = id.to_string();
        let queue = task.queue.to_string();
        let task_type = task.task_type.clone();
        let payload = task.payload.to_vec();
        let max_retry = task.max_retry;
        let now = Timestamp::now().unix_millis();

        self.with_conn(move |conn| {
            conn.execute(
                "INSERT INTO queue_tasks
                     (id, queue, task_type, payload, state, retry_count, max_retry,
                      enqueued_at, available_at)
                 VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?6)",
                params![row_id, queue, task_type, payload, max_retry, now],
            )?;
            Ok(())
        })
        .await?;

        debug!(task_id = %id, "Stored task in SQLite queue");
        Ok(id)
    }

    async fn lease(
        &self,
        queue: &QueueName,
        lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, QueueError> {
        let queue_name = queue.clone();

        self.with_conn(move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let now = Timestamp::now();
            let now_ms = now.unix_millis();

            let row = tx
                .query_row(
                    "SELECT id, task_type, payload, retry_count, max_retry, enqueued_at
                     FROM queue_tasks
                     WHERE queue = ?1
                       AND ((state IN ('pending', 'retry') AND available_at <= ?2)
                         OR (state = 'active' AND lease_expires_at <= ?2))
                     ORDER BY CASE WHEN state = 'active' THEN lease_expires_at ELSE available_at END,
                              rowid
                     LIMIT 1",
                    params![queue_name.as_str(), now_ms],
                    |row| {
                        Ok((
                            row.get::<_, String>(0)?,
                            row.get::<_, String>(1)?,
                            row.get::<_, Vec<u8>>(2)?,
                            row.get::<_, u32>(3)?,
                            row.get::<_, u32>(4)?,
                            row.get::<_, i64>(5)?,
                        ))
                    },
                )
                .optional()?;

            let Some((id, task_type, payload, retry_count, max_retry, enqueued_at)) = row else {
                tx.commit()?;
                return Ok(None);
            };

            let lease_token = uuid::Uuid::new_v4().to_string();
            let lease_expires_at = now.after(lease_duration);
            tx.execute(
                "UPDATE queue_tasks
                 SET state = 'active', lease_token = ?2, lease_expires_at = ?3
                 WHERE id = ?1",
                params![id, lease_token, lease_expires_at.unix_millis()],
            )?;
            tx.commit()?;

            let task_id: TaskId = id
                .parse()
                .map_err(|e: crate::error::ValidationError| corrupt("id", e.to_string()))?;
            Ok(Some(LeasedTask {
                id: task_id.clone(),
                task_type,
                payload: Bytes::from(payload),
                queue: queue_name,
                retry_count,
                max_retry,
                enqueued_at: timestamp_from_millis("enqueued_at", enqueued_at)?,
                lease_expires_at,
                receipt: ReceiptHandle::new(task_id, lease_token),
            }))
        })
        .await
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        self.settle(
            receipt,
            "DELETE FROM queue_tasks WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            SettleValues::None,
        )
        .await
    }

    async fn retry(
        &self,
        receipt: &ReceiptHandle,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), QueueError> {
        let available_at = Timestamp::now().after(delay).unix_millis();
        self.settle(
            receipt,
            "UPDATE queue_tasks
             SET state = 'retry', retry_count = retry_count + 1, available_at = ?3,
                 last_error = ?4, lease_token = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            SettleValues::Retry {
                available_at,
                error: last_error.to_string(),
            },
        )
        .await
    }

    async fn archive(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), QueueError> {
        self.settle(
            receipt,
            "UPDATE queue_tasks
             SET state = 'archived', last_error = ?3, lease_token = NULL, lease_expires_at = NULL
             WHERE id = ?1 AND state = 'active' AND lease_token = ?2",
            SettleValues::Archive {
                reason: reason.to_string(),
            },
        )
        .await
    }

    async fn stats(&self, queue: &QueueName) -> Result<QueueStats, QueueError> {
        let queue_name = queue.to_string();

        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT state, COUNT(*) FROM queue_tasks WHERE queue = ?1 GROUP BY state",
            )?;
            let rows = stmt.query_map(params![queue_name], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
            })?;

            let mut stats = QueueStats::default();
            for row in rows {
                let (state, count) = row?;
                let count = count.max(0) as u64;
                match state.parse::<TaskState>()? {
                    TaskState::Pending => stats.pending = count,
                    TaskState::Active => stats.active = count,
                    TaskState::Retry => stats.scheduled = count,
                    TaskState::Archived => stats.archived = count,
                }
            }
            Ok(stats)
        })
        .await
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::Sqlite
    }
}
