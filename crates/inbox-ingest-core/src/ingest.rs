//! # Ingestion Worker
//!
//! Consumes `webhook:incoming` tasks and turns each into canonical
//! conversation state. Every task moves through fixed stages:
//!
//! ```text
//! received -> raw-event-persisted -> provider-dispatched
//!          -> entities-resolved -> message-persisted -> thread-updated -> done
//! ```
//!
//! A failure at any stage ends the task as retryable or permanent according
//! to [`IngestError::is_transient`]. Re-running a task from the start is
//! always safe: the raw event insert is keyed by event id, entity
//! resolution is get-or-create, and a repeated external message id appends
//! nothing.

use crate::activity::{ThreadActivity, ThreadActivityBus};
use crate::model::{ChannelType, NewThread};
use crate::normalizer::{NormalizeError, Normalized, NormalizerRegistry};
use crate::resolver::EntityResolver;
use crate::store::{AppendOutcome, ConversationStore, RawEvent, RawEventStore, StoreError};
use crate::webhook::WebhookEnvelope;
use crate::workspace::{WorkspaceResolver, WorkspaceUnresolved};
use crate::{ErrorCategory, EventId, MessageId, ThreadId, Timestamp, WorkspaceId};
use async_trait::async_trait;
use queue_runtime::{HandlerError, LeasedTask, SerializationError, TaskHandler};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, error, info, instrument, warn, Span};

// ============================================================================
// Stages and errors
// ============================================================================

/// Processing stage of one task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum IngestStage {
    Received,
    RawEventPersisted,
    ProviderDispatched,
    EntitiesResolved,
    MessagePersisted,
    ThreadUpdated,
    Done,
}

impl IngestStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::RawEventPersisted => "raw-event-persisted",
            Self::ProviderDispatched => "provider-dispatched",
            Self::EntitiesResolved => "entities-resolved",
            Self::MessagePersisted => "message-persisted",
            Self::ThreadUpdated => "thread-updated",
            Self::Done => "done",
        }
    }
}

impl fmt::Display for IngestStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Cause of an ingestion failure
#[derive(Debug, Clone, thiserror::Error)]
pub enum IngestFailure {
    #[error("Invalid task envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown provider '{provider}'")]
    UnknownProvider { provider: String },

    #[error(transparent)]
    WorkspaceUnresolved(#[from] WorkspaceUnresolved),

    #[error("Workspace {workspace_id} does not exist")]
    WorkspaceMissing { workspace_id: WorkspaceId },

    #[error(transparent)]
    Normalize(#[from] NormalizeError),

    #[error("Provider '{provider}' produced a {found} message, expected {expected}")]
    ChannelMismatch {
        provider: String,
        expected: ChannelType,
        found: ChannelType,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Failure of one task, with the stage that was being entered
#[derive(Debug, Clone, thiserror::Error)]
#[error("ingestion failed before {stage}: {cause}")]
pub struct IngestError {
    pub stage: IngestStage,
    pub cause: IngestFailure,
}

impl IngestError {
    pub fn new(stage: IngestStage, cause: impl Into<IngestFailure>) -> Self {
        Self {
            stage,
            cause: cause.into(),
        }
    }

    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match &self.cause {
            IngestFailure::Store(e) => e.is_transient(),
            IngestFailure::InvalidEnvelope(_)
            | IngestFailure::UnknownProvider { .. }
            | IngestFailure::WorkspaceUnresolved(_)
            | IngestFailure::WorkspaceMissing { .. }
            | IngestFailure::Normalize(_)
            | IngestFailure::ChannelMismatch { .. } => false,
        }
    }

    pub fn error_category(&self) -> ErrorCategory {
        if self.is_transient() {
            ErrorCategory::Transient
        } else {
            ErrorCategory::Permanent
        }
    }
}

/// Successful result of processing one envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum IngestOutcome {
    /// A new message was appended and its thread advanced
    Persisted {
        workspace_id: WorkspaceId,
        thread_id: ThreadId,
        message_id: MessageId,
        thread_created: bool,
    },
    /// The message had already been ingested
    Duplicate {
        thread_id: ThreadId,
        message_id: MessageId,
    },
    /// The payload carried nothing to persist
    Ignored { reason: String },
}

// ============================================================================
// Worker
// ============================================================================

/// Turns webhook envelopes into canonical conversation state
#[derive(Clone)]
pub struct IngestionWorker {
    raw_events: Arc<dyn RawEventStore>,
    conversations: Arc<dyn ConversationStore>,
    resolver: EntityResolver,
    normalizers: NormalizerRegistry,
    workspaces: Arc<dyn WorkspaceResolver>,
    activity: ThreadActivityBus,
}

impl IngestionWorker {
    /// Worker with the default normalizers and a private activity bus
    pub fn new(
        raw_events: Arc<dyn RawEventStore>,
        conversations: Arc<dyn ConversationStore>,
        workspaces: Arc<dyn WorkspaceResolver>,
    ) -> Self {
        Self {
            raw_events,
            resolver: EntityResolver::new(conversations.clone()),
            conversations,
            normalizers: NormalizerRegistry::with_defaults(),
            workspaces,
            activity: ThreadActivityBus::default(),
        }
    }

    pub fn with_normalizers(mut self, normalizers: NormalizerRegistry) -> Self {
        self.normalizers = normalizers;
        self
    }

    pub fn with_activity_bus(mut self, activity: ThreadActivityBus) -> Self {
        self.activity = activity;
        self
    }

    pub fn activity_bus(&self) -> &ThreadActivityBus {
        &self.activity
    }

    /// Run one envelope through every stage
    #[instrument(
        skip(self, envelope),
        fields(provider = %envelope.provider, event_id = tracing::field::Empty)
    )]
    pub async fn process(&self, envelope: &WebhookEnvelope) -> Result<IngestOutcome, IngestError> {
        let event_id = envelope.event_id.unwrap_or_else(EventId::new);
        Span::current().record("event_id", tracing::field::display(event_id));

        // received -> raw-event-persisted
        let stored = self
            .raw_events
            .append(&RawEvent::from_envelope(event_id, envelope))
            .await
            .map_err(|e| IngestError::new(IngestStage::RawEventPersisted, e))?;
        debug!(stage = %IngestStage::RawEventPersisted, newly_stored = stored, "Raw event persisted");

        // -> provider-dispatched
        let normalizer = self.normalizers.get(&envelope.provider).ok_or_else(|| {
            IngestError::new(
                IngestStage::ProviderDispatched,
                IngestFailure::UnknownProvider {
                    provider: envelope.provider.clone(),
                },
            )
        })?;
        let canonical = match normalizer
            .normalize(&envelope.body)
            .map_err(|e| IngestError::new(IngestStage::ProviderDispatched, e))?
        {
            Normalized::Message(canonical) => canonical,
            Normalized::Ignored { reason } => {
                debug!(stage = %IngestStage::ProviderDispatched, %reason, "Payload ignored");
                return Ok(IngestOutcome::Ignored { reason });
            }
        };
        let expected = normalizer.channel_type();
        if let Some(found) = [canonical.channel.channel_type, canonical.contact.channel_type]
            .into_iter()
            .find(|found| *found != expected)
        {
            return Err(IngestError::new(
                IngestStage::ProviderDispatched,
                IngestFailure::ChannelMismatch {
                    provider: envelope.provider.clone(),
                    expected,
                    found,
                },
            ));
        }
        debug!(stage = %IngestStage::ProviderDispatched, channel_thread_ref = %canonical.channel_thread_ref, "Payload normalized");

        // -> entities-resolved
        let stage = IngestStage::EntitiesResolved;
        let workspace_id = self
            .workspaces
            .resolve(envelope)
            .await
            .map_err(|e| IngestError::new(stage, e))?;
        let exists = self
            .conversations
            .workspace_exists(&workspace_id)
            .await
            .map_err(|e| IngestError::new(stage, e))?;
        if !exists {
            return Err(IngestError::new(
                stage,
                IngestFailure::WorkspaceMissing { workspace_id },
            ));
        }

        let now = Timestamp::now();
        let channel = self
            .resolver
            .resolve_channel(&workspace_id, &canonical.channel)
            .await
            .map_err(|e| IngestError::new(stage, e))?;
        let contact = self
            .resolver
            .resolve_contact(&workspace_id, &canonical.contact)
            .await
            .map_err(|e| IngestError::new(stage, e))?;
        let thread = self
            .resolver
            .resolve_thread(
                &workspace_id,
                &NewThread {
                    channel_id: channel.entity.id,
                    contact_id: contact.entity.id,
                    channel_thread_ref: canonical.channel_thread_ref.clone(),
                },
                now,
            )
            .await
            .map_err(|e| IngestError::new(stage, e))?;
        debug!(
            stage = %stage,
            %workspace_id,
            thread_id = %thread.entity.id,
            thread_created = thread.created,
            contact_created = contact.created,
            "Entities resolved"
        );

        // -> message-persisted -> thread-updated (one unit of work)
        let appended = self
            .conversations
            .append_message(&thread.entity.id, &canonical.message, now)
            .await
            .map_err(|e| IngestError::new(IngestStage::MessagePersisted, e))?;

        match appended {
            AppendOutcome::Inserted(message) => {
                debug!(stage = %IngestStage::ThreadUpdated, message_id = %message.id, "Message persisted");
                self.activity.publish(ThreadActivity {
                    workspace_id,
                    thread_id: thread.entity.id,
                    message_id: message.id,
                    occurred_at: message.created_at,
                });
                Ok(IngestOutcome::Persisted {
                    workspace_id,
                    thread_id: thread.entity.id,
                    message_id: message.id,
                    thread_created: thread.created,
                })
            }
            AppendOutcome::Duplicate(message_id) => {
                debug!(%message_id, "Message already ingested");
                Ok(IngestOutcome::Duplicate {
                    thread_id: thread.entity.id,
                    message_id,
                })
            }
        }
    }
}

#[async_trait]
impl TaskHandler for IngestionWorker {
    async fn handle(&self, task: &LeasedTask) -> Result<(), HandlerError> {
        let envelope = WebhookEnvelope::from_payload(&task.payload).map_err(|e: SerializationError| {
            let err = IngestError::new(
                IngestStage::Received,
                IngestFailure::InvalidEnvelope(e.to_string()),
            );
            error!(task_id = %task.id, error = %err, "Discarding undecodable task");
            HandlerError::permanent(err.to_string())
        })?;

        match self.process(&envelope).await {
            Ok(outcome) => {
                info!(
                    task_id = %task.id,
                    provider = %envelope.provider,
                    outcome = ?outcome,
                    "Webhook ingested"
                );
                Ok(())
            }
            Err(err) if err.is_transient() => {
                warn!(
                    task_id = %task.id,
                    provider = %envelope.provider,
                    stage = %err.stage,
                    retry_count = task.retry_count,
                    error = %err,
                    "Ingestion failed; will retry"
                );
                Err(HandlerError::retryable(err.to_string()))
            }
            Err(err) => {
                error!(
                    task_id = %task.id,
                    provider = %envelope.provider,
                    stage = %err.stage,
                    category = ?err.error_category(),
                    error = %err,
                    "Ingestion failed permanently"
                );
                Err(HandlerError::permanent(err.to_string()))
            }
        }
    }
}

#[cfg(test)]
#[path = "ingest_tests.rs"]
mod tests;
