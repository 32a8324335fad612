//! In-memory queue provider implementation for testing and development.
//!
//! This module provides a fully functional in-memory queue that:
//! - Implements lease expiry and redelivery
//! - Schedules retries after a back-off delay
//! - Keeps the most recent archived tasks for inspection
//! - Provides thread-safe concurrent access
//!
//! Tasks do not survive a process restart; use the SQLite provider when the
//! producer and consumer run in different processes.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{
    LeasedTask, QueueName, QueueStats, ReceiptHandle, Task, TaskId, TaskState, Timestamp,
};
use crate::provider::{InMemoryConfig, ProviderType};
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::Duration;

#[cfg(test)]
#[path = "memory_tests.rs"]
mod tests;

// ============================================================================
// Internal Storage Structures
// ============================================================================

/// Thread-safe storage for all queues
struct QueueStorage {
    queues: HashMap<QueueName, InMemoryQueue>,
    /// Monotonic counter giving FIFO order among tasks available at the same instant
    next_sequence: u64,
}

impl QueueStorage {
    fn new() -> Self {
        Self {
            queues: HashMap::new(),
            next_sequence: 0,
        }
    }

    fn queue_mut(&mut self, queue_name: &QueueName) -> &mut InMemoryQueue {
        self.queues.entry(queue_name.clone()).or_default()
    }

    /// Find the stored task a receipt refers to, checking the lease is still current
    fn leased_task_mut(&mut self, receipt: &ReceiptHandle) -> Result<&mut StoredTask, QueueError> {
        let task_id = receipt.task_id();
        let task = self
            .queues
            .values_mut()
            .find_map(|queue| queue.tasks.get_mut(task_id))
            .ok_or_else(|| QueueError::TaskNotFound {
                task_id: task_id.to_string(),
            })?;

        let lease_is_current = task.state == TaskState::Active
            && task.lease_token.as_deref() == Some(receipt.lease_token());
        if !lease_is_current {
            return Err(QueueError::LeaseLost {
                task_id: task_id.to_string(),
            });
        }

        Ok(task)
    }
}

/// Internal state for a single queue
#[derive(Default)]
struct InMemoryQueue {
    tasks: HashMap<TaskId, StoredTask>,
    /// Archived task ids, oldest first
    archived: VecDeque<TaskId>,
}

impl InMemoryQueue {
    /// Record an archived task and drop the oldest beyond `keep`
    fn retain_archived(&mut self, task_id: TaskId, keep: usize) {
        self.archived.push_back(task_id);
        while self.archived.len() > keep {
            if let Some(evicted) = self.archived.pop_front() {
                self.tasks.remove(&evicted);
            }
        }
    }

    fn unsettled_len(&self) -> usize {
        self.tasks
            .values()
            .filter(|t| t.state != TaskState::Archived)
            .count()
    }
}

/// Task stored in the queue together with its delivery bookkeeping
struct StoredTask {
    id: TaskId,
    task_type: String,
    payload: Bytes,
    state: TaskState,
    retry_count: u32,
    max_retry: u32,
    sequence: u64,
    enqueued_at: Timestamp,
    available_at: Timestamp,
    lease_token: Option<String>,
    lease_expires_at: Option<Timestamp>,
    last_error: Option<String>,
}

impl StoredTask {
    fn is_deliverable(&self, now: Timestamp) -> bool {
        match self.state {
            TaskState::Pending | TaskState::Retry => self.available_at <= now,
            TaskState::Active => self.lease_expires_at.is_some_and(|expiry| expiry <= now),
            TaskState::Archived => false,
        }
    }

    /// Moment from which the task competes for delivery
    fn ready_since(&self) -> Timestamp {
        match self.state {
            TaskState::Active => self.lease_expires_at.unwrap_or(self.available_at),
            _ => self.available_at,
        }
    }
}

// ============================================================================
// InMemoryProvider
// ============================================================================

/// In-memory queue provider
pub struct InMemoryProvider {
    storage: Arc<RwLock<QueueStorage>>,
    config: InMemoryConfig,
}

impl InMemoryProvider {
    /// Create new in-memory provider with configuration
    pub fn new(config: InMemoryConfig) -> Self {
        Self {
            storage: Arc::new(RwLock::new(QueueStorage::new())),
            config,
        }
    }

    /// Last failure recorded for a task, if it is still stored
    pub fn last_error(&self, task_id: &TaskId) -> Option<String> {
        let storage = self.storage.read().ok()?;
        storage
            .queues
            .values()
            .find_map(|queue| queue.tasks.get(task_id))
            .and_then(|task| task.last_error.clone())
    }

    fn poisoned() -> QueueError {
        QueueError::Storage {
            message: "in-memory queue lock poisoned".to_string(),
        }
    }
}

impl Default for InMemoryProvider {
    fn default() -> Self {
        Self::new(InMemoryConfig::default())
    }
}

#[async_trait]
impl QueueProvider for InMemoryProvider {
    async fn enqueue(&self, task: &Task) -> Result<TaskId, QueueError> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        let sequence = storage.next_sequence;
        storage.next_sequence += 1;

        let capacity = self.config.max_queue_size;
        let queue = storage.queue_mut(&task.queue);
        if queue.unsettled_len() >= capacity {
            return Err(QueueError::QueueFull {
                queue_name: task.queue.to_string(),
                capacity,
            });
        }

        let now = Timestamp::now();
        let id = TaskId::new();
        queue.tasks.insert(
            id.clone(),
            StoredTask {
                id: id.clone(),
                task_type: task.task_type.clone(),
                payload: task.payload.clone(),
                state: TaskState::Pending,
                retry_count: 0,
                max_retry: task.max_retry,
                sequence,
                enqueued_at: now,
                available_at: now,
                lease_token: None,
                lease_expires_at: None,
                last_error: None,
            },
        );

        Ok(id)
    }

    async fn lease(
        &self,
        queue: &QueueName,
        lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, QueueError> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        let Some(queue_state) = storage.queues.get_mut(queue) else {
            return Ok(None);
        };

        let now = Timestamp::now();
        let Some(task) = queue_state
            .tasks
            .values_mut()
            .filter(|t| t.is_deliverable(now))
            .min_by_key(|t| (t.ready_since(), t.sequence))
        else {
            return Ok(None);
        };

        let lease_token = uuid::Uuid::new_v4().to_string();
        let lease_expires_at = now.after(lease_duration);
        task.state = TaskState::Active;
        task.lease_token = Some(lease_token.clone());
        task.lease_expires_at = Some(lease_expires_at);

        Ok(Some(LeasedTask {
            id: task.id.clone(),
            task_type: task.task_type.clone(),
            payload: task.payload.clone(),
            queue: queue.clone(),
            retry_count: task.retry_count,
            max_retry: task.max_retry,
            enqueued_at: task.enqueued_at,
            lease_expires_at,
            receipt: ReceiptHandle::new(task.id.clone(), lease_token),
        }))
    }

    async fn complete(&self, receipt: &ReceiptHandle) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        storage.leased_task_mut(receipt)?;

        for queue in storage.queues.values_mut() {
            if queue.tasks.remove(receipt.task_id()).is_some() {
                break;
            }
        }
        Ok(())
    }

    async fn retry(
        &self,
        receipt: &ReceiptHandle,
        delay: Duration,
        last_error: &str,
    ) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        let task = storage.leased_task_mut(receipt)?;

        task.state = TaskState::Retry;
        task.retry_count = task.retry_count.saturating_add(1);
        task.available_at = Timestamp::now().after(delay);
        task.lease_token = None;
        task.lease_expires_at = None;
        task.last_error = Some(last_error.to_string());
        Ok(())
    }

    async fn archive(&self, receipt: &ReceiptHandle, reason: &str) -> Result<(), QueueError> {
        let mut storage = self.storage.write().map_err(|_| Self::poisoned())?;
        let task = storage.leased_task_mut(receipt)?;

        task.state = TaskState::Archived;
        task.lease_token = None;
        task.lease_expires_at = None;
        task.last_error = Some(reason.to_string());

        let keep = self.config.max_archived;
        if let Some(queue) = storage
            .queues
            .values_mut()
            .find(|queue| queue.tasks.contains_key(receipt.task_id()))
        {
            queue.retain_archived(receipt.task_id().clone(), keep);
        }
        Ok(())
    }

    async fn stats(&self, queue: &QueueName) -> Result<QueueStats, QueueError> {
        let storage = self.storage.read().map_err(|_| Self::poisoned())?;
        let mut stats = QueueStats::default();

        if let Some(queue_state) = storage.queues.get(queue) {
            for task in queue_state.tasks.values() {
                match task.state {
                    TaskState::Pending => stats.pending += 1,
                    TaskState::Active => stats.active += 1,
                    TaskState::Retry => stats.scheduled += 1,
                    TaskState::Archived => stats.archived += 1,
                }
            }
        }

        Ok(stats)
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}
