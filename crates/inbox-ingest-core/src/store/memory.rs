//! In-memory implementation of both stores, for tests and single-process runs.

use super::{contact_key, AppendOutcome, ConversationStore, EntityKind, RawEvent, RawEventStore, StoreError};
use crate::model::{
    Channel, ChannelType, Contact, Message, NewChannel, NewContact, NewMessage, NewThread, Thread,
    ThreadStatus,
};
use crate::{
    ChannelId, ContactId, EventId, MessageId, ThreadId, Timestamp, WorkspaceId,
};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct Tables {
    workspaces: HashSet<WorkspaceId>,
    raw_events: HashMap<EventId, RawEvent>,
    channels: HashMap<ChannelId, Channel>,
    contacts: HashMap<ContactId, Contact>,
    threads: HashMap<ThreadId, Thread>,
    /// Messages per thread in insertion order
    messages: HashMap<ThreadId, Vec<Message>>,
}

/// Store backed by process memory
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of raw events recorded
    pub async fn raw_event_count(&self) -> usize {
        self.tables.read().await.raw_events.len()
    }

    /// Number of messages across all threads
    pub async fn message_count(&self) -> usize {
        self.tables
            .read()
            .await
            .messages
            .values()
            .map(Vec::len)
            .sum()
    }

    /// Number of threads across all workspaces
    pub async fn thread_count(&self) -> usize {
        self.tables.read().await.threads.len()
    }
}

#[async_trait]
impl RawEventStore for MemoryStore {
    async fn append(&self, event: &RawEvent) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().await;
        if tables.raw_events.contains_key(&event.id) {
            return Ok(false);
        }
        tables.raw_events.insert(event.id, event.clone());
        Ok(true)
    }

    async fn get(&self, id: &EventId) -> Result<Option<RawEvent>, StoreError> {
        Ok(self.tables.read().await.raw_events.get(id).cloned())
    }
}

#[async_trait]
impl ConversationStore for MemoryStore {
    async fn ensure_workspace(&self, id: &WorkspaceId) -> Result<bool, StoreError> {
        Ok(self.tables.write().await.workspaces.insert(*id))
    }

    async fn workspace_exists(&self, id: &WorkspaceId) -> Result<bool, StoreError> {
        Ok(self.tables.read().await.workspaces.contains(id))
    }

    async fn find_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
    ) -> Result<Option<Channel>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .channels
            .values()
            .find(|c| c.workspace_id == *workspace_id && c.channel_type == channel_type)
            .cloned())
    }

    async fn insert_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel: &NewChannel,
    ) -> Result<Channel, StoreError> {
        let mut tables = self.tables.write().await;
        let exists = tables
            .channels
            .values()
            .any(|c| c.workspace_id == *workspace_id && c.channel_type == channel.channel_type);
        if exists {
            return Err(StoreError::Conflict {
                entity: EntityKind::Channel,
                key: channel.channel_type.to_string(),
            });
        }

        let created = Channel {
            id: ChannelId::new(),
            workspace_id: *workspace_id,
            channel_type: channel.channel_type,
            display_name: channel.display_name.clone(),
        };
        tables.channels.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_contact(
        &self,
        workspace_id: &WorkspaceId,
        channel_type: ChannelType,
        external_user_id: &str,
    ) -> Result<Option<Contact>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .values()
            .find(|c| {
                c.workspace_id == *workspace_id
                    && c.channel_type == channel_type
                    && c.external_user_id == external_user_id
            })
            .cloned())
    }

    async fn insert_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact: &NewContact,
    ) -> Result<Contact, StoreError> {
        let mut tables = self.tables.write().await;
        let exists = tables.contacts.values().any(|c| {
            c.workspace_id == *workspace_id
                && c.channel_type == contact.channel_type
                && c.external_user_id == contact.external_user_id
        });
        if exists {
            return Err(StoreError::Conflict {
                entity: EntityKind::Contact,
                key: contact_key(contact.channel_type, &contact.external_user_id),
            });
        }

        let created = Contact {
            id: ContactId::new(),
            workspace_id: *workspace_id,
            channel_type: contact.channel_type,
            display_name: contact.display_name.clone(),
            external_user_id: contact.external_user_id.clone(),
        };
        tables.contacts.insert(created.id, created.clone());
        Ok(created)
    }

    async fn find_thread(
        &self,
        workspace_id: &WorkspaceId,
        channel_thread_ref: &str,
    ) -> Result<Option<Thread>, StoreError> {
        let tables = self.tables.read().await;
        Ok(tables
            .threads
            .values()
            .find(|t| t.workspace_id == *workspace_id && t.channel_thread_ref == channel_thread_ref)
            .cloned())
    }

    async fn insert_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread: &NewThread,
        now: Timestamp,
    ) -> Result<Thread, StoreError> {
        let mut tables = self.tables.write().await;
        let exists = tables.threads.values().any(|t| {
            t.workspace_id == *workspace_id && t.channel_thread_ref == thread.channel_thread_ref
        });
        if exists {
            return Err(StoreError::Conflict {
                entity: EntityKind::Thread,
                key: thread.channel_thread_ref.clone(),
            });
        }

        let created = Thread {
            id: ThreadId::new(),
            workspace_id: *workspace_id,
            channel_id: thread.channel_id,
            contact_id: thread.contact_id,
            channel_thread_ref: thread.channel_thread_ref.clone(),
            status: ThreadStatus::Open,
            updated_at: now,
        };
        tables.threads.insert(created.id, created.clone());
        Ok(created)
    }

    async fn get_thread(&self, id: &ThreadId) -> Result<Option<Thread>, StoreError> {
        Ok(self.tables.read().await.threads.get(id).cloned())
    }

    async fn append_message(
        &self,
        thread_id: &ThreadId,
        message: &NewMessage,
        created_at: Timestamp,
    ) -> Result<AppendOutcome, StoreError> {
        let mut tables = self.tables.write().await;
        let tables = &mut *tables;

        let thread = tables
            .threads
            .get_mut(thread_id)
            .ok_or_else(|| StoreError::NotFound {
                entity: EntityKind::Thread,
                key: thread_id.to_string(),
            })?;

        let messages = tables.messages.entry(*thread_id).or_default();
        if let Some(existing) = messages
            .iter()
            .find(|m| m.external_message_id == message.external_message_id)
        {
            return Ok(AppendOutcome::Duplicate(existing.id));
        }

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
        messages.push(created.clone());
        thread.updated_at = thread.updated_at.max(created_at);
        Ok(AppendOutcome::Inserted(created))
    }

    async fn list_messages(&self, thread_id: &ThreadId) -> Result<Vec<Message>, StoreError> {
        Ok(self
            .tables
            .read()
            .await
            .messages
            .get(thread_id)
            .cloned()
            .unwrap_or_default())
    }
}

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;
