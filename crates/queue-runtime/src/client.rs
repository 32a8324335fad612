//! Client traits and implementations for queue operations.

use crate::error::QueueError;
use crate::message::{LeasedTask, QueueName, QueueStats, ReceiptHandle, Task, TaskId};
use crate::provider::{ProviderConfig, ProviderType, QueueConfig};
use crate::providers::{InMemoryProvider, SqliteProvider};
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;

/// Producer-side interface used by code that only enqueues work
#[async_trait]
pub trait QueueClient: Send + Sync {
    /// Enqueue a task, returning its identifier once it is durably accepted
    async fn enqueue(&self, task: Task) -> Result<TaskId, QueueError>;

    /// Task counts for a queue
    async fn stats(&self, queue: &QueueName) -> Result<QueueStats, QueueError>;
}

/// Interface implemented by each storage backend.
///
/// Delivery is at-least-once: a leased task that is not settled before its
/// lease expires becomes deliverable again with a fresh receipt.
#[async_trait]
pub trait QueueProvider: Send + Sync {
    /// Store a task for delivery
    async fn enqueue(&self, task: &Task) -> Result<TaskId, QueueError>;

    /// Lease the next deliverable task, if any
    async fn lease(
        &self,
        queue: &QueueName,
        lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, QueueError>;

    /// Settle a task as done; it is removed from the queue
    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError>;

    /// Make the task deliverable again after `delay`, incrementing its retry count
    async fn retry(
        &self,
        receipt: &ReceiptHandle,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), QueueError>;

    /// Dead-letter the task; it is kept for inspection but never redelivered
    async fn archive(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), QueueError>;

    /// Task counts for a queue
    async fn stats(&self, queue: &QueueName) -> Result<QueueStats, QueueError>;

    /// Get provider type
    fn provider_type(&self) -> ProviderType;
}

/// Factory for creating queue providers and clients
pub struct QueueClientFactory;

impl QueueClientFactory {
    /// Create the backend selected by configuration
    pub async fn create_provider(
        config: &QueueConfig,
    ) -> Result<Arc<dyn QueueProvider>, QueueError> {
        match &config.provider {
            ProviderConfig::InMemory(memory_config) => {
                Ok(Arc::new(InMemoryProvider::new(memory_config.clone())))
            }
            ProviderConfig::Sqlite(sqlite_config) => {
                let provider = SqliteProvider::open(sqlite_config.clone()).await?;
                Ok(Arc::new(provider))
            }
        }
    }

    /// Create a producer client over an existing provider
    pub fn create_client(
        provider: Arc<dyn QueueProvider>,
        config: &QueueConfig,
    ) -> Arc<dyn QueueClient> {
        Arc::new(StandardQueueClient::new(provider, config.enqueue_timeout()))
    }

    /// Create an in-memory provider and client pair for tests
    pub fn create_test_pair() -> (Arc<dyn QueueProvider>, Arc<dyn QueueClient>) {
        let config = QueueConfig::default();
        let provider: Arc<dyn QueueProvider> = Arc::new(InMemoryProvider::default());
        let client = Self::create_client(provider.clone(), &config);
        (provider, client)
    }
}

/// Standard queue client that validates tasks and bounds enqueue latency
pub struct StandardQueueClient {
    provider: Arc<dyn QueueProvider>,
    enqueue_timeout: Duration,
}

impl StandardQueueClient {
    pub fn new(provider: Arc<dyn QueueProvider>, enqueue_timeout: Duration) -> Self {
        Self {
            provider,
            enqueue_timeout,
        }
    }
}

#[async_trait]
impl QueueClient for StandardQueueClient {
    #[instrument(skip(self, task), fields(task_type = %task.task_type, queue = %task.queue))]
    async fn enqueue(&self, task: Task) -> Result<TaskId, QueueError> {
        task.validate()?;

        let max_size = self.provider.provider_type().max_payload_size();
        if task.payload.len() > max_size {
            return Err(QueueError::TaskTooLarge {
                size: task.payload.len(),
                max_size,
            });
        }

        match tokio::time::timeout(self.enqueue_timeout, self.provider.enqueue(&task)).await {
            Ok(Ok(task_id)) => {
                debug!(task_id = %task_id, "Task enqueued");
                Ok(task_id)
            }
            Ok(Err(e)) => Err(e),
            Err(_) => {
                warn!(timeout = ?self.enqueue_timeout, "Enqueue timed out");
                Err(QueueError::Timeout {
                    duration: self.enqueue_timeout,
                })
            }
        }
    }

    async fn stats(&self, queue: &QueueName) -> Result<QueueStats, QueueError> {
        self.provider.stats(queue).await
    }
}
