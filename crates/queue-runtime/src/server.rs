//! # Task Server
//!
//! Consumer side of the queue: a bounded pool of workers that lease tasks,
//! hand them to a [`TaskHandler`], and settle each one according to the
//! handler's verdict:
//!
//! - `Ok(())` completes the task
//! - [`HandlerError::Retryable`] schedules redelivery using the
//!   [`RetryPolicy`] until the task's retry budget is spent, then archives it
//! - [`HandlerError::Permanent`] archives the task immediately
//!
//! No ordering is guaranteed between tasks, including tasks that concern
//! the same entity. Handlers must be idempotent.

use crate::client::QueueProvider;
use crate::error::QueueError;
use crate::message::{LeasedTask, QueueName};
use crate::retry::RetryPolicy;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::Semaphore;
use tokio::task::{JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

#[cfg(test)]
#[path = "server_tests.rs"]
mod tests;

// ============================================================================
// Handler contract
// ============================================================================

/// Failure reported by a task handler, deciding between retry and archive
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HandlerError {
    /// Redelivery may succeed (store unavailable, timeout)
    #[error("retryable failure: {0}")]
    Retryable(String),

    /// Redelivery cannot succeed (malformed payload, unknown provider)
    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl HandlerError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self::Retryable(message.into())
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::Permanent(message.into())
    }

    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable(_))
    }
}

/// Processes one leased task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    async fn handle(&self, task: &LeasedTask) -> Result<(), HandlerError>;
}

/// Routes tasks to handlers by task type.
///
/// A task whose type has no registered handler fails permanently.
#[derive(Default)]
pub struct TaskMux {
    handlers: HashMap<String, Arc<dyn TaskHandler>>,
}

impl TaskMux {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for a task type, replacing any previous one
    pub fn handle(mut self, task_type: impl Into<String>, handler: Arc<dyn TaskHandler>) -> Self {
        self.handlers.insert(task_type.into(), handler);
        self
    }
}

#[async_trait]
impl TaskHandler for TaskMux {
    async fn handle(&self, task: &LeasedTask) -> Result<(), HandlerError> {
        match self.handlers.get(&task.task_type) {
            Some(handler) => handler.handle(task).await,
            None => Err(HandlerError::permanent(format!(
                "no handler registered for task type '{}'",
                task.task_type
            ))),
        }
    }
}

// ============================================================================
// Server configuration and statistics
// ============================================================================

/// Worker pool settings
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Maximum number of tasks processed at once
    pub concurrency: usize,
    pub queue: QueueName,
    /// Wait between lease attempts when the queue is empty
    pub poll_interval: Duration,
    /// How long a leased task stays invisible to other workers.
    /// Handlers running longer than this are cut off and retried.
    pub lease_duration: Duration,
    /// Time in-flight tasks get to finish after shutdown is requested
    pub shutdown_grace: Duration,
    pub retry_policy: RetryPolicy,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            concurrency: 10,
            queue: QueueName::default(),
            poll_interval: Duration::from_millis(500),
            lease_duration: Duration::from_secs(300),
            shutdown_grace: Duration::from_secs(10),
            retry_policy: RetryPolicy::default(),
        }
    }
}

/// How a task was settled
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutcome {
    Completed,
    Retried { delay: Duration },
    Archived { reason: String },
}

#[derive(Debug, Default)]
struct ServerCounters {
    completed: AtomicU64,
    retried: AtomicU64,
    archived: AtomicU64,
    settle_failures: AtomicU64,
    panicked: AtomicU64,
    aborted: AtomicU64,
}

/// Point-in-time copy of the server counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ServerStats {
    pub completed: u64,
    pub retried: u64,
    pub archived: u64,
    pub settle_failures: u64,
    pub panicked: u64,
    pub aborted: u64,
}

impl ServerCounters {
    fn snapshot(&self) -> ServerStats {
        ServerStats {
            completed: self.completed.load(Ordering::Relaxed),
            retried: self.retried.load(Ordering::Relaxed),
            archived: self.archived.load(Ordering::Relaxed),
            settle_failures: self.settle_failures.load(Ordering::Relaxed),
            panicked: self.panicked.load(Ordering::Relaxed),
            aborted: self.aborted.load(Ordering::Relaxed),
        }
    }

    fn record(&self, outcome: &Result<TaskOutcome, QueueError>) {
        let counter = match outcome {
            Ok(TaskOutcome::Completed) => &self.completed,
            Ok(TaskOutcome::Retried { .. }) => &self.retried,
            Ok(TaskOutcome::Archived { .. }) => &self.archived,
            Err(_) => &self.settle_failures,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

// ============================================================================
// TaskServer
// ============================================================================

/// Bounded worker pool consuming one queue
pub struct TaskServer {
    provider: Arc<dyn QueueProvider>,
    config: ServerConfig,
    shutdown: CancellationToken,
    counters: Arc<ServerCounters>,
}

impl TaskServer {
    pub fn new(provider: Arc<dyn QueueProvider>, config: ServerConfig) -> Self {
        Self {
            provider,
            config,
            shutdown: CancellationToken::new(),
            counters: Arc::new(ServerCounters::default()),
        }
    }

    /// Use an externally owned token to stop the server
    pub fn with_shutdown_token(mut self, token: CancellationToken) -> Self {
        self.shutdown = token;
        self
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    pub fn stats(&self) -> ServerStats {
        self.counters.snapshot()
    }

    /// Lease and process at most one task, settling it before returning.
    ///
    /// Returns `Ok(None)` when no task was deliverable.
    pub async fn process_next(
        &self,
        handler: Arc<dyn TaskHandler>,
    ) -> Result<Option<TaskOutcome>, QueueError> {
        let Some(task) = self
            .provider
            .lease(&self.config.queue, self.config.lease_duration)
            .await?
        else {
            return Ok(None);
        };

        let outcome = execute_task(
            self.provider.clone(),
            handler,
            self.config.clone(),
            task,
        )
        .await;
        self.counters.record(&outcome);
        outcome.map(Some)
    }

    /// Run until the shutdown token is cancelled.
    ///
    /// On shutdown no further tasks are leased. In-flight tasks get
    /// `shutdown_grace` to finish; any still running after that are
    /// aborted and will be redelivered once their lease expires.
    pub async fn run(&self, handler: Arc<dyn TaskHandler>) -> ServerStats {
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut workers: JoinSet<()> = JoinSet::new();

        info!(
            queue = %self.config.queue,
            concurrency = self.config.concurrency,
            provider = %self.provider.provider_type(),
            "Task server started"
        );

        loop {
            while let Some(result) = workers.try_join_next() {
                self.log_join_result(result);
            }

            let permit = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                permit = Arc::clone(&semaphore).acquire_owned() => match permit {
                    Ok(permit) => permit,
                    Err(_) => break,
                },
            };

            let leased = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                leased = self.provider.lease(&self.config.queue, self.config.lease_duration) => leased,
            };

            match leased {
                Ok(Some(task)) => {
                    let provider = self.provider.clone();
                    let handler = handler.clone();
                    let config = self.config.clone();
                    let counters = self.counters.clone();
                    workers.spawn(async move {
                        let _permit = permit;
                        let outcome = execute_task(provider, handler, config, task).await;
                        counters.record(&outcome);
                    });
                }
                Ok(None) => {
                    drop(permit);
                    if self.idle().await {
                        break;
                    }
                }
                Err(e) => {
                    drop(permit);
                    warn!(error = %e, transient = e.is_transient(), "Failed to lease task");
                    if self.idle().await {
                        break;
                    }
                }
            }
        }

        self.drain(workers).await;
        let stats = self.counters.snapshot();
        info!(?stats, "Task server stopped");
        stats
    }

    /// Sleep for one poll interval; returns true when shutdown was requested
    async fn idle(&self) -> bool {
        tokio::select! {
            biased;
            _ = self.shutdown.cancelled() => true,
            _ = tokio::time::sleep(self.config.poll_interval) => false,
        }
    }

    async fn drain(&self, mut workers: JoinSet<()>) {
        if workers.is_empty() {
            return;
        }

        info!(
            in_flight = workers.len(),
            grace = ?self.config.shutdown_grace,
            "Waiting for in-flight tasks"
        );

        let graceful = tokio::time::timeout(self.config.shutdown_grace, async {
            while let Some(result) = workers.join_next().await {
                self.log_join_result(result);
            }
        })
        .await;

        if graceful.is_err() {
            warn!(
                remaining = workers.len(),
                "Shutdown grace period elapsed; aborting in-flight tasks"
            );
            workers.abort_all();
            while let Some(result) = workers.join_next().await {
                self.log_join_result(result);
            }
        }
    }

    fn log_join_result(&self, result: Result<(), JoinError>) {
        let Err(e) = result else {
            return;
        };

        if e.is_panic() {
            self.counters.panicked.fetch_add(1, Ordering::Relaxed);
            error!("Task handler panicked; the task will be redelivered after its lease expires");
        } else if e.is_cancelled() {
            self.counters.aborted.fetch_add(1, Ordering::Relaxed);
            debug!("In-flight task aborted during shutdown");
        }
    }
}

/// Run the handler for one task and settle the result with the provider
async fn execute_task(
    provider: Arc<dyn QueueProvider>,
    handler: Arc<dyn TaskHandler>,
    config: ServerConfig,
    task: LeasedTask,
) -> Result<TaskOutcome, QueueError> {
    let span = info_span!(
        "task",
        task_id = %task.id,
        task_type = %task.task_type,
        retry_count = task.retry_count
    );

    async move {
        let result = match tokio::time::timeout(config.lease_duration, handler.handle(&task)).await
        {
            Ok(result) => result,
            Err(_) => Err(HandlerError::retryable(format!(
                "handler exceeded lease of {:?}",
                config.lease_duration
            ))),
        };

        let receipt = &task.receipt;
        let settled = match result {
            Ok(()) => {
                debug!("Task completed");
                provider.complete(receipt).await.map(|_| TaskOutcome::Completed)
            }
            Err(HandlerError::Retryable(message))
                if config
                    .retry_policy
                    .should_retry(task.retry_count, task.max_retry) =>
            {
                let delay = config.retry_policy.calculate_delay(task.retry_count);
                warn!(error = %message, delay = ?delay, "Task failed; scheduling retry");
                provider
                    .retry(receipt, delay, &message)
                    .await
                    .map(|_| TaskOutcome::Retried { delay })
            }
            Err(HandlerError::Retryable(message)) => {
                let reason = format!("retries exhausted: {}", message);
                error!(max_retry = task.max_retry, error = %message, "Task retries exhausted; archiving");
                provider
                    .archive(receipt, &reason)
                    .await
                    .map(|_| TaskOutcome::Archived { reason })
            }
            Err(HandlerError::Permanent(message)) => {
                error!(error = %message, "Task failed permanently; archiving");
                provider
                    .archive(receipt, &message)
                    .await
                    .map(|_| TaskOutcome::Archived { reason: message })
            }
        };

        if let Err(e) = &settled {
            warn!(error = %e, "Failed to settle task; it will be redelivered after its lease expires");
        }
        settled
    }
    .instrument(span)
    .await
}
