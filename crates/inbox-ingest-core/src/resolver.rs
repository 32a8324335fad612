//! # Entity Resolver
//!
//! Idempotent get-or-create for channels, contacts and threads, keyed by
//! their natural business identifiers within a workspace.
//!
//! Each resolution looks the entity up, inserts it when missing, and on a
//! [`StoreError::Conflict`] from the insert re-reads the row another worker
//! just created. Concurrent first messages from the same contact therefore
//! both resolve to the same id and neither reports an error.

use crate::model::{Channel, Contact, NewChannel, NewContact, NewThread, Thread};
use crate::store::{contact_key, ConversationStore, EntityKind, StoreError};
use crate::{Timestamp, WorkspaceId};
use std::sync::Arc;
use tracing::{debug, instrument};

/// An entity returned by the resolver and whether this call created it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved<T> {
    pub entity: T,
    pub created: bool,
}

impl<T> Resolved<T> {
    fn existing(entity: T) -> Self {
        Self {
            entity,
            created: false,
        }
    }

    fn created(entity: T) -> Self {
        Self {
            entity,
            created: true,
        }
    }
}

/// Get-or-create over a [`ConversationStore`]
#[derive(Clone)]
pub struct EntityResolver {
    store: Arc<dyn ConversationStore>,
}

impl EntityResolver {
    pub fn new(store: Arc<dyn ConversationStore>) -> Self {
        Self { store }
    }

    /// Resolve the workspace's channel of the given type
    #[instrument(level = "debug", skip(self, channel), fields(channel_type = %channel.channel_type))]
    pub async fn resolve_channel(
        &self,
        workspace_id: &WorkspaceId,
        channel: &NewChannel,
    ) -> Result<Resolved<Channel>, StoreError> {
        if let Some(existing) = self
            .store
            .find_channel(workspace_id, channel.channel_type)
            .await?
        {
            return Ok(Resolved::existing(existing));
        }

        match self.store.insert_channel(workspace_id, channel).await {
            Ok(created) => {
                debug!(channel_id = %created.id, "Created channel");
                Ok(Resolved::created(created))
            }
            Err(StoreError::Conflict { .. }) => self
                .store
                .find_channel(workspace_id, channel.channel_type)
                .await?
                .map(Resolved::existing)
                .ok_or_else(|| vanished(EntityKind::Channel, channel.channel_type.as_str())),
            Err(e) => Err(e),
        }
    }

    /// Resolve a contact by its provider and provider user id
    #[instrument(
        level = "debug",
        skip(self, contact),
        fields(channel_type = %contact.channel_type, external_user_id = %contact.external_user_id)
    )]
    pub async fn resolve_contact(
        &self,
        workspace_id: &WorkspaceId,
        contact: &NewContact,
    ) -> Result<Resolved<Contact>, StoreError> {
        if let Some(existing) = self
            .store
            .find_contact(workspace_id, contact.channel_type, &contact.external_user_id)
            .await?
        {
            return Ok(Resolved::existing(existing));
        }

        match self.store.insert_contact(workspace_id, contact).await {
            Ok(created) => {
                debug!(contact_id = %created.id, "Created contact");
                Ok(Resolved::created(created))
            }
            Err(StoreError::Conflict { .. }) => self
                .store
                .find_contact(workspace_id, contact.channel_type, &contact.external_user_id)
                .await?
                .map(Resolved::existing)
                .ok_or_else(|| {
                    vanished(
                        EntityKind::Contact,
                        &contact_key(contact.channel_type, &contact.external_user_id),
                    )
                }),
            Err(e) => Err(e),
        }
    }

    /// Resolve a thread by its channel thread reference.
    ///
    /// A newly created thread is open and stamped with `now`.
    #[instrument(level = "debug", skip(self, thread, now), fields(channel_thread_ref = %thread.channel_thread_ref))]
    pub async fn resolve_thread(
        &self,
        workspace_id: &WorkspaceId,
        thread: &NewThread,
        now: Timestamp,
    ) -> Result<Resolved<Thread>, StoreError> {
        if let Some(existing) = self
            .store
            .find_thread(workspace_id, &thread.channel_thread_ref)
            .await?
        {
            return Ok(Resolved::existing(existing));
        }

        match self.store.insert_thread(workspace_id, thread, now).await {
            Ok(created) => {
                debug!(thread_id = %created.id, "Created thread");
                Ok(Resolved::created(created))
            }
            Err(StoreError::Conflict { .. }) => self
                .store
                .find_thread(workspace_id, &thread.channel_thread_ref)
                .await?
                .map(Resolved::existing)
                .ok_or_else(|| vanished(EntityKind::Thread, &thread.channel_thread_ref)),
            Err(e) => Err(e),
        }
    }
}

/// A conflicting row that cannot be read back; retrying will see it
fn vanished(entity: EntityKind, key: &str) -> StoreError {
    StoreError::Inconsistent {
        message: format!("{} '{}' conflicted on insert but was not found", entity, key),
    }
}

#[cfg(test)]
#[path = "resolver_tests.rs"]
mod tests;
