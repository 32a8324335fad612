//! # Persistence
//!
//! Two independent stores:
//!
//! - [`RawEventStore`]: append-only audit log of accepted webhook bodies,
//!   keyed by [`EventId`] so that repeated writes of the same delivery are
//!   no-ops.
//! - [`ConversationStore`]: the canonical channel / contact / thread /
//!   message tables.
//!
//! Insert primitives are "insert if absent": when a row with the same
//! natural key already exists they return [`StoreError::Conflict`] instead
//! of writing. The resolver turns that into a re-read.

use crate::model::{
    Channel, ChannelType, Contact, Message, NewChannel, NewContact, NewMessage, NewThread, Thread,
};
use crate::webhook::WebhookEnvelope;
use crate::{ErrorCategory, EventId, MessageId, ThreadId, Timestamp, WorkspaceId};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

// ============================================================================
// Errors
// ============================================================================

/// Kind of record a store error refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityKind {
    Workspace,
    Channel,
    Contact,
    Thread,
    Message,
    RawEvent,
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Workspace => "workspace",
            Self::Channel => "channel",
            Self::Contact => "contact",
            Self::Thread => "thread",
            Self::Message => "message",
            Self::RawEvent => "raw event",
        };
        f.write_str(name)
    }
}

/// Errors from store operations
#[derive(Debug, Clone, thiserror::Error)]
pub enum StoreError {
    #[error("Store unavailable: {message}")]
    Unavailable { message: String },

    #[error("Store operation '{operation}' timed out after {duration:?}")]
    Timeout {
        operation: &'static str,
        duration: Duration,
    },

    #[error("{entity} with key '{key}' already exists")]
    Conflict { entity: EntityKind, key: String },

    #[error("{entity} '{key}' not found")]
    NotFound { entity: EntityKind, key: String },

    #[error("Inconsistent store state: {message}")]
    Inconsistent { message: String },

    #[error("Stored data could not be decoded: {message}")]
    Serialization { message: String },

    #[error("Store backend error: {message}")]
    Backend { message: String },
}

impl StoreError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Unavailable { .. } => true,
            Self::Timeout { .. } => true,
            Self::Backend { .. } => true,
            Self::Inconsistent { .. } => true,
            Self::Conflict { .. } => false,
            Self::NotFound { .. } => false,
            Self::Serialization { .. } => false,
        }
    }

    /// Get error category for logging and alerting
    pub fn error_category(&self) -> ErrorCategory {
        if self.is_transient() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        }
    }
}

// ============================================================================
// Raw events
// ============================================================================

/// Unmodified record of an accepted webhook delivery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawEvent {
    pub id: EventId,
    pub provider: String,
    /// Exact request body
    pub body: String,
    /// Parsed body, when the body is valid JSON
    pub document: Option<serde_json::Value>,
    pub signature_valid: bool,
    pub received_at: Timestamp,
}

impl RawEvent {
    /// Build the audit record for an envelope under the given event id
    pub fn from_envelope(id: EventId, envelope: &WebhookEnvelope) -> Self {
        Self {
            id,
            provider: envelope.provider.clone(),
            body: envelope.body.clone(),
            document: serde_json::from_str(&envelope.body).ok(),
            signature_valid: envelope.signature_valid,
            received_at: envelope.received,
        }
    }
}

/// Append-only store of raw webhook deliveries
#[async_trait]
pub trait RawEventStore: Send + Sync {
    /// Store the event unless one with the same id exists.
    ///
    /// Returns `true` when the event was newly written.
    async fn append(&self, event: &RawEvent) -> Result<bool, StoreError>;

    async fn get(&self, id: &EventId) -> Result<Option<RawEvent>, StoreError>;
}

// ============================================================================
// Conversations
// ============================================================================

/// Conflict key of a contact, `"{channel_type}:{external_user_id}"`
pub(crate) fn contact_key(channel_type: ChannelType, external_user_id: &str) -> String {
    format!("{}:{}", channel_type, external_user_id)
}

/// Result of appending a message to a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AppendOutcome {
    /// The message was new; the thread's `updated_at` was advanced with it
    Inserted(Message),
    /// A message with the same external id already exists in the thread
    Duplicate(MessageId),
}

/// Canonical conversation tables
#[async_trait]
pub trait ConversationStore: Send + Sync {
    /// Create the workspace if it does not exist; returns `true` when created
    async fn ensure_workspace(&self, id: &WorkspaceId) -> Result<bool, StoreError>;

    async fn workspace_exists(&self, id: &WorkspaceId) -> Result<bool, StoreError>;

    async fn find_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
    ) -> Result<Option<Channel>, StoreError>;

    /// Insert if absent; [`StoreError::Conflict`] when `(workspace, type)` exists
    async fn insert_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel: &NewChannel,
    ) -> Result<Channel, StoreError>;

    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
        external_user_id: &str,
    ) -> Result<Option<Contact>, StoreError>;

    /// Insert if absent; [`StoreError::Conflict`] when
    /// `(workspace, channel_type, external_user_id)` exists
    async fn insert_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact: &NewContact,
    ) -> Result<Contact, StoreError>;

    async fn find_thread(
        &self,
        workspace_id: &WorkspaceId,
        channel_thread_ref: &str,
    ) -> Result<Option<Thread>, StoreError>;

    /// Insert an open thread if absent; [`StoreError::Conflict`] when
    /// `(workspace, channel_thread_ref)` exists
    async fn insert_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread: &NewThread,
        now: Timestamp,
    ) -> Result<Thread, StoreError>;

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError>;

    /// Insert the message and advance the thread's `updated_at` in one unit
    /// of work. A repeated `external_message_id` changes nothing.
    async fn append_message(
        &self,
        thread_id: &ThreadId,
        message: &NewMessage,
        created_at: Timestamp,
    ) -> Result<AppendOutcome, StoreError>;

    /// Messages of a thread, oldest first
    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError>;
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
