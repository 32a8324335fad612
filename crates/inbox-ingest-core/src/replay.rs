//! Re-enqueue stored raw events for another pass through the worker.
//!
//! The replayed envelope keeps the original event id, body and receive time,
//! so the raw event is not duplicated and already ingested messages are not
//! appended twice.

use crate::store::{RawEventStore, StoreError};
use crate::webhook::WebhookEnvelope;
use crate::EventId;
use queue_runtime::{QueueClient, QueueError, QueueName, TaskId, DEFAULT_MAX_RETRY};
use std::sync::Arc;
use tracing::{info, instrument};

/// Errors from replaying a raw event
#[derive(Debug, thiserror::Error)]
pub enum ReplayError {
    #[error("Raw event {event_id} not found")]
    NotFound { event_id: EventId },

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Queue(#[from] QueueError),
}

impl ReplayError {
    pub fn is_transient(&self) -> bool {
        match self {
            Self::NotFound { .. } => false,
            Self::Store(e) => e.is_transient(),
            Self::Queue(e) => e.is_transient(),
        }
    }
}

/// Reads raw events and enqueues them again
#[derive(Clone)]
pub struct RawEventReplayer {
    raw_events: Arc<dyn RawEventStore>,
    queue: Arc<dyn QueueClient>,
    queue_name: QueueName,
    max_retry: u32,
}

impl RawEventReplayer {
    pub fn new(raw_events: Arc<dyn RawEventStore>, queue: Arc<dyn QueueClient>) -> Self {
        Self {
            raw_events,
            queue,
            queue_name: QueueName::default(),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    /// Queue replayed tasks are sent to
    pub fn with_queue(mut self, queue_name: QueueName) -> Self {
        self.queue_name = queue_name;
        self
    }

    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Enqueue the stored event under its original id
    #[instrument(skip(self), fields(event_id = %event_id))]
    pub async fn replay(&self, event_id: &EventId) -> Result<TaskId, ReplayError> {
        let event = self
            .raw_events
            .get(event_id)
            .await?
            .ok_or(ReplayError::NotFound {
                event_id: *event_id,
            })?;

        let envelope = WebhookEnvelope {
            event_id: Some(event.id),
            provider: event.provider,
            body: event.body,
            received: event.received_at,
            signature_valid: event.signature_valid,
        };
        let task = envelope
            .to_task()?
            .with_queue(self.queue_name.clone())
            .with_max_retry(self.max_retry);
        let task_id = self.queue.enqueue(task).await?;

        info!(%task_id, provider = %envelope.provider, "Replayed raw event");
        Ok(task_id)
    }
}

#[cfg(test)]
#[path = "replay_tests.rs"]
mod tests;
