//! SQLite-backed raw event and conversation store.
//!
//! Uniqueness of natural keys is enforced by `UNIQUE` constraints and all
//! creating statements use `ON CONFLICT DO NOTHING`, so concurrent workers
//! racing on the same contact or thread never fail with a constraint error;
//! the loser sees a [`StoreError::Conflict`] and re-reads.
//!
//! Timestamps are stored as RFC 3339 text with nanosecond precision.

use super::{contact_key, AppendOutcome, ConversationStore, EntityKind, RawEvent, RawEventStore, StoreError};
use crate::model::{
    Channel, ChannelType, Contact, Message, NewChannel, NewContact, NewMessage, NewThread, Thread,
    ThreadStatus,
};
use crate::{ChannelId, ContactId, EventId, MessageId, ThreadId, Timestamp, WorkspaceId};
use async_trait::async_trait;
use rusqlite::types::Type;
use rusqlite::{params, Connection, ErrorCode, OptionalExtension, Row, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::info;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS workspaces (
    id         TEXT PRIMARY KEY,
    created_at TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS raw_events (
    id              TEXT PRIMARY KEY,
    provider        TEXT NOT NULL,
    body            TEXT NOT NULL,
    document        TEXT,
    signature_valid INTEGER NOT NULL,
    received_at     TEXT NOT NULL
);
CREATE TABLE IF NOT EXISTS channels (
    id           TEXT PRIMARY KEY,
    workspace_id TEXT NOT NULL,
    channel_type TEXT NOT NULL,
    display_name TEXT NOT NULL,
    UNIQUE (workspace_id, channel_type)
);
CREATE TABLE IF NOT EXISTS contacts (
    id               TEXT PRIMARY KEY,
    workspace_id     TEXT NOT NULL,
    channel_type     TEXT NOT NULL,
    display_name     TEXT NOT NULL,
    external_user_id TEXT NOT NULL,
    UNIQUE (workspace_id, channel_type, external_user_id)
);
CREATE TABLE IF NOT EXISTS threads (
    id                 TEXT PRIMARY KEY,
    workspace_id       TEXT NOT NULL,
    channel_id         TEXT NOT NULL REFERENCES channels (id),
    contact_id         TEXT NOT NULL REFERENCES contacts (id),
    channel_thread_ref TEXT NOT NULL,
    status             TEXT NOT NULL,
    updated_at         TEXT NOT NULL,
    UNIQUE (workspace_id, channel_thread_ref)
);
CREATE TABLE IF NOT EXISTS messages (
    id                  TEXT PRIMARY KEY,
    thread_id           TEXT NOT NULL REFERENCES threads (id),
    direction           TEXT NOT NULL,
    message_type        TEXT NOT NULL,
    content             TEXT NOT NULL,
    external_message_id TEXT NOT NULL,
    external_ts         TEXT,
    created_at          TEXT NOT NULL,
    UNIQUE (thread_id, external_message_id)
);
";

/// Settings for [`SqliteStore`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteStoreConfig {
    pub path: PathBuf,
    pub busy_timeout_ms: u64,
    /// Upper bound for a single store operation
    pub operation_timeout_ms: u64,
}

impl Default for SqliteStoreConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/inbox.db"),
            busy_timeout_ms: 5_000,
            operation_timeout_ms: 5_000,
        }
    }
}

impl From<rusqlite::Error> for StoreError {
    fn from(e: rusqlite::Error) -> Self {
        match e.sqlite_error_code() {
            Some(
                ErrorCode::DatabaseBusy
                | ErrorCode::DatabaseLocked
                | ErrorCode::CannotOpen
                | ErrorCode::SystemIoFailure,
            ) => StoreError::Unavailable {
                message: e.to_string(),
            },
            _ => match e {
                rusqlite::Error::FromSqlConversionFailure(..)
                | rusqlite::Error::InvalidColumnType(..) => StoreError::Serialization {
                    message: e.to_string(),
                },
                other => StoreError::Backend {
                    message: other.to_string(),
                },
            },
        }
    }
}

/// Store persisting to a SQLite database file
pub struct SqliteStore {
    conn: Arc<Mutex<Connection>>,
    operation_timeout: Duration,
}

impl SqliteStore {
    /// Open (creating if needed) the database and apply the schema
    pub async fn open(config: SqliteStoreConfig) -> Result<Self, StoreError> {
        let path = config.path.clone();
        let busy_timeout = Duration::from_millis(config.busy_timeout_ms);
        let conn = tokio::task::spawn_blocking(move || -> Result<Connection, StoreError> {
            if let Some(parent) = path.parent() {
                if !parent.as_os_str().is_empty() {
                    std::fs::create_dir_all(parent).map_err(|e| StoreError::Unavailable {
                        message: format!("cannot create {}: {}", parent.display(), e),
                    })?;
                }
            }

            let conn = Connection::open(&path)?;
            conn.busy_timeout(busy_timeout)?;
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |_| Ok(()))?;
            conn.pragma_update(None, "foreign_keys", true)?;
            conn.execute_batch(SCHEMA)?;
            Ok(conn)
        })
        .await
        .map_err(|e| StoreError::Backend {
            message: format!("sqlite open task failed: {}", e),
        })??;

        info!(path = %config.path.display(), "Opened SQLite store");
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
            operation_timeout: Duration::from_millis(config.operation_timeout_ms),
        })
    }

    /// Run a closure against the connection on the blocking pool, bounded
    /// by the operation timeout
    async fn with_conn<F, T>(&self, operation: &'static str, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Connection) -> Result<T, StoreError> + Send + 'static,
        T: Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        let work = tokio::task::spawn_blocking(move || {
            let mut guard = conn.lock().map_err(|_| StoreError::Backend {
                message: "sqlite connection lock poisoned".to_string(),
            })?;
            f(&mut guard)
        });

        match tokio::time::timeout(self.operation_timeout, work).await {
            Ok(joined) => joined.map_err(|e| StoreError::Backend {
                message: format!("sqlite task failed: {}", e),
            })?,
            Err(_) => Err(StoreError::Timeout {
                operation,
                duration: self.operation_timeout,
            }),
        }
    }
}

// ============================================================================
// Row decoding
// ============================================================================

fn conversion_error(
    idx: usize,
    err: impl std::error::Error + Send + Sync + 'static,
) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}

fn parsed<T>(row: &Row<'_>, idx: usize) -> rusqlite::Result<T>
where
    T: FromStr,
    T::Err: std::error::Error + Send + Sync + 'static,
{
    let text: String = row.get(idx)?;
    text.parse().map_err(|e| conversion_error(idx, e))
}

fn timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Timestamp> {
    let text: String = row.get(idx)?;
    Timestamp::from_rfc3339(&text).map_err(|e| conversion_error(idx, e))
}

fn optional_timestamp(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<Timestamp>> {
    let text: Option<String> = row.get(idx)?;
    text.map(|t| Timestamp::from_rfc3339(&t).map_err(|e| conversion_error(idx, e)))
        .transpose()
}

const RAW_EVENT_COLUMNS: &str = "id, provider, body, document, signature_valid, received_at";

fn raw_event_row(row: &Row<'_>) -> rusqlite::Result<RawEvent> {
    let document: Option<String> = row.get(3)?;
    let document = document
        .map(|d| serde_json::from_str(&d).map_err(|e| conversion_error(3, e)))
        .transpose()?;
    Ok(RawEvent {
        id: parsed(row, 0)?,
        provider: row.get(1)?,
        body: row.get(2)?,
        document,
        signature_valid: row.get(4)?,
        received_at: timestamp(row, 5)?,
    })
}

const CHANNEL_COLUMNS: &str = "id, workspace_id, channel_type, display_name";

fn channel_row(row: &Row<'_>) -> rusqlite::Result<Channel> {
    Ok(Channel {
        id: parsed(row, 0)?,
        workspace_id: parsed(row, 1)?,
        channel_type: parsed(row, 2)?,
        display_name: row.get(3)?,
    })
}

const CONTACT_COLUMNS: &str = "id, workspace_id, channel_type, display_name, external_user_id";

fn contact_row(row: &Row<'_>) -> rusqlite::Result<Contact> {
    Ok(Contact {
        id: parsed(row, 0)?,
        workspace_id: parsed(row, 1)?,
        channel_type: parsed(row, 2)?,
        display_name: row.get(3)?,
        external_user_id: row.get(4)?,
    })
}

const THREAD_COLUMNS: &str =
    "id, workspace_id, channel_id, contact_id, channel_thread_ref, status, updated_at";

fn thread_row(row: &Row<'_>) -> rusqlite::Result<Thread> {
    Ok(Thread {
        id: parsed(row, 0)?,
        workspace_id: parsed(row, 1)?,
        channel_id: parsed(row, 2)?,
        contact_id: parsed(row, 3)?,
        channel_thread_ref: row.get(4)?,
        status: parsed(row, 5)?,
        updated_at: timestamp(row, 6)?,
    })
}

const MESSAGE_COLUMNS: &str = "id, thread_id, direction, message_type, content, \
     external_message_id, external_ts, created_at";

fn message_row(row: &Row<'_>) -> rusqlite::Result<Message> {
    Ok(Message {
        id: parsed(row, 0)?,
        thread_id: parsed(row, 1)?,
        direction: parsed(row, 2)?,
        message_type: parsed(row, 3)?,
        content: row.get(4)?,
        external_message_id: row.get(5)?,
        external_ts: optional_timestamp(row, 6)?,
        created_at: timestamp(row, 7)?,
    })
}

// ============================================================================
// Raw events
// ============================================================================

#[async_trait]
impl RawEventStore for SqliteStore {
    async fn append(&self, event: &RawEvent) -> Result<bool, StoreError> {
        let event = event.clone();
        let document = event
            .document
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(|e| StoreError::Serialization {
                message: e.to_string(),
            })?;

        self.with_conn("append_raw_event", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO raw_events (id, provider, body, document, signature_valid, received_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                 ON CONFLICT (id) DO NOTHING",
                params![
                    event.id.to_string(),
                    event.provider,
                    event.body,
                    document,
                    event.signature_valid,
                    event.received_at.to_rfc3339_nanos(),
                ],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn get(&self, id: &EventId) -> Result<Option<RawEvent>, StoreError> {
        let id = id.to_string();
        self.with_conn("get_raw_event", move |conn| {
            let sql = format!("SELECT {} FROM raw_events WHERE id = ?1", RAW_EVENT_COLUMNS);
            Ok(conn.query_row(&sql, params![id], raw_event_row).optional()?)
        })
        .await
    }
}

// ============================================================================
// Conversations
// ============================================================================

#[async_trait]
impl ConversationStore for SqliteStore {
    async fn ensure_workspace(&self, id: &WorkspaceId) -> Result<bool, StoreError> {
        let id = id.to_string();
        let now = Timestamp::now().to_rfc3339_nanos();
        self.with_conn("ensure_workspace", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO workspaces (id, created_at) VALUES (?1, ?2)
                 ON CONFLICT (id) DO NOTHING",
                params![id, now],
            )?;
            Ok(inserted == 1)
        })
        .await
    }

    async fn workspace_exists(&self, id: &WorkspaceId) -> Result<bool, StoreError> {
        let id = id.to_string();
        self.with_conn("workspace_exists", move |conn| {
            let found: Option<String> = conn
                .query_row(
                    "SELECT id FROM workspaces WHERE id = ?1",
                    params![id],
                    |row| row.get(0),
                )
                .optional()?;
            Ok(found.is_some())
        })
        .await
    }

    async fn find_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
    ) -> Result<Option<Channel>, StoreError> {
        let workspace_id = workspace_id.to_string();
        self.with_conn("find_channel", move |conn| {
            let sql = format!(
                "SELECT {} FROM channels WHERE workspace_id = ?1 AND channel_type = ?2",
                CHANNEL_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![workspace_id, channel_type.as_str()], channel_row)
                .optional()?)
        })
        .await
    }

    async fn insert_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel: &NewChannel,
    ) -> Result<Channel, StoreError> {
        let created = Channel {
            id: ChannelId::new(),
            workspace_id: *workspace_id,
            channel_type: channel.channel_type,
            display_name: channel.display_name.clone(),
        };
        let row = created.clone();

        self.with_conn("insert_channel", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO channels (id, workspace_id, channel_type, display_name)
                 VALUES (?1, ?2, ?3, ?4)
                 ON CONFLICT (workspace_id, channel_type) DO NOTHING",
                params![
                    row.id.to_string(),
                    row.workspace_id.to_string(),
                    row.channel_type.as_str(),
                    row.display_name,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict {
                    entity: EntityKind::Channel,
                    key: row.channel_type.to_string(),
                });
            }
            Ok(())
        })
        .await?;

        Ok(created)
    }

    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
        external_user_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let workspace_id = workspace_id.to_string();
        let external_user_id = external_user_id.to_string();
        self.with_conn("find_contact", move |conn| {
            let sql = format!(
                "SELECT {} FROM contacts
                 WHERE workspace_id = ?1 AND channel_type = ?2 AND external_user_id = ?3",
                CONTACT_COLUMNS
            );
            Ok(conn
                .query_row(
                    &sql,
                    params![workspace_id, channel_type.as_str(), external_user_id],
                    contact_row,
                )
                .optional()?)
        })
        .await
    }

    async fn insert_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact: &NewContact,
    ) -> Result<Contact, StoreError> {
        let created = Contact {
            id: ContactId::new(),
            workspace_id: *workspace_id,
            channel_type: contact.channel_type,
            display_name: contact.display_name.clone(),
            external_user_id: contact.external_user_id.clone(),
        };
        let row = created.clone();

        self.with_conn("insert_contact", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO contacts
                     (id, workspace_id, channel_type, display_name, external_user_id)
                 VALUES (?1, ?2, ?3, ?4, ?5)
                 ON CONFLICT (workspace_id, channel_type, external_user_id) DO NOTHING",
                params![
                    row.id.to_string(),
                    row.workspace_id.to_string(),
                    row.channel_type.as_str(),
                    row.display_name,
                    row.external_user_id,
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict {
                    entity: EntityKind::Contact,
                    key: contact_key(row.channel_type, &row.external_user_id),
                });
            }
            Ok(())
        })
        .await?;

        Ok(created)
    }

    async fn find_thread(
        &self,
        workspace_id: &WorkspaceId,
        channel_thread_ref: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let workspace_id = workspace_id.to_string();
        let channel_thread_ref = channel_thread_ref.to_string();
        self.with_conn("find_thread", move |conn| {
            let sql = format!(
                "SELECT {} FROM threads WHERE workspace_id = ?1 AND channel_thread_ref = ?2",
                THREAD_COLUMNS
            );
            Ok(conn
                .query_row(&sql, params![workspace_id, channel_thread_ref], thread_row)
                .optional()?)
        })
        .await
    }

    async fn insert_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread: &NewThread,
        now: Timestamp,
    ) -> Result<Thread, StoreError> {
        let created = Thread {
            id: ThreadId::new(),
            workspace_id: *workspace_id,
            channel_id: thread.channel_id,
            contact_id: thread.contact_id,
            channel_thread_ref: thread.channel_thread_ref.clone(),
            status: ThreadStatus::Open,
            updated_at: now,
        };
        let row = created.clone();

        self.with_conn("insert_thread", move |conn| {
            let inserted = conn.execute(
                "INSERT INTO threads
                     (id, workspace_id, channel_id, contact_id, channel_thread_ref, status, updated_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT (workspace_id, channel_thread_ref) DO NOTHING",
                params![
                    row.id.to_string(),
                    row.workspace_id.to_string(),
                    row.channel_id.to_string(),
                    row.contact_id.to_string(),
                    row.channel_thread_ref,
                    row.status.as_str(),
                    row.updated_at.to_rfc3339_nanos(),
                ],
            )?;
            if inserted == 0 {
                return Err(StoreError::Conflict {
                    entity: EntityKind::Thread,
                    key: row.channel_thread_ref,
                });
            }
            Ok(())
        })
        .await?;

        Ok(created)
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        let id = id.to_string();
        self.with_conn("get_thread", move |conn| {
            let sql = format!("SELECT {} FROM threads WHERE id = ?1", THREAD_COLUMNS);
            Ok(conn.query_row(&sql, params![id], thread_row).optional()?)
        })
        .await
    }

    async fn append_message(
        &self,
        thread_id: &ThreadId,
        message: &NewMessage,
        created_at: Timestamp,
    ) -> Result<AppendOutcome, StoreError> {
        let created = Message {
            id: MessageId::new(),
            thread_id: *thread_id,
            direction: message.direction,
            message_type: message.message_type,
            content: message.content.clone(),
            external_message_id: message.external_message_id.clone(),
            external_ts: message.external_ts,
            created_at,
        };

        self.with_conn("append_message", move |conn| {
            let tx = conn.transaction_with_behavior(TransactionBehavior::Immediate)?;
            let thread_key = created.thread_id.to_string();

            let updated_at = tx
                .query_row(
                    "SELECT updated_at FROM threads WHERE id = ?1",
                    params![thread_key],
                    |row| timestamp(row, 0),
                )
                .optional()?
                .ok_or_else(|| StoreError::NotFound {
                    entity: EntityKind::Thread,
                    key: thread_key.clone(),
                })?;

            let inserted = tx.execute(
                "INSERT INTO messages
                     (id, thread_id, direction, message_type, content,
                      external_message_id, external_ts, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT (thread_id, external_message_id) DO NOTHING",
                params![
                    created.id.to_string(),
                    thread_key,
                    created.direction.as_str(),
                    created.message_type.as_str(),
                    created.content,
                    created.external_message_id,
                    created.external_ts.map(|ts| ts.to_rfc3339_nanos()),
                    created.created_at.to_rfc3339_nanos(),
                ],
            )?;

            if inserted == 0 {
                let existing: String = tx.query_row(
                    "SELECT id FROM messages WHERE thread_id = ?1 AND external_message_id = ?2",
                    params![thread_key, created.external_message_id],
                    |row| row.get(0),
                )?;
                tx.commit()?;
                let existing = existing.parse::<MessageId>().map_err(|e| {
                    StoreError::Serialization {
                        message: e.to_string(),
                    }
                })?;
                return Ok(AppendOutcome::Duplicate(existing));
            }

            let advanced = updated_at.max(created.created_at);
            tx.execute(
                "UPDATE threads SET updated_at = ?2 WHERE id = ?1",
                params![thread_key, advanced.to_rfc3339_nanos()],
            )?;
            tx.commit()?;
            Ok(AppendOutcome::Inserted(created))
        })
        .await
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        let thread_id = thread_id.to_string();
        self.with_conn("list_messages", move |conn| {
            let sql = format!(
                "SELECT {} FROM messages WHERE thread_id = ?1 ORDER BY rowid",
                MESSAGE_COLUMNS
            );
            let mut stmt = conn.prepare(&sql)?;
            let rows = stmt.query_map(params![thread_id], message_row)?;
            let mut messages = Vec::new();
            for row in rows {
                messages.push(row?);
            }
            Ok(messages)
        })
        .await
    }
}

#[cfg(test)]
#[path = "sqlite_tests.rs"]
mod tests;
