//! # Queue Runtime
//!
//! Durable task queue sitting between webhook ingress and processing.
//!
//! This library provides:
//! - Provider-agnostic enqueue on the producer side ([`QueueClient`])
//! - Lease-based at-least-once delivery ([`QueueProvider`])
//! - In-memory and SQLite providers
//! - Exponential backoff redelivery ([`RetryPolicy`])
//! - A bounded worker pool with graceful shutdown ([`TaskServer`])
//!
//! ## Module Organization
//!
//! - [`error`] - Error types for all queue operations
//! - [`message`] - Task structures and receipt handles
//! - [`provider`] - Provider types and configuration
//! - [`client`] - Client traits and the provider factory
//! - [`retry`] - Backoff schedule
//! - [`server`] - Worker pool and handler routing

pub mod client;
pub mod error;
pub mod message;
pub mod provider;
pub mod providers;
pub mod retry;
pub mod server;

// Re-export commonly used types at crate root for convenience
pub use client::{QueueClient, QueueClientFactory, QueueProvider, StandardQueueClient};
pub use error::{QueueError, SerializationError, ValidationError};
pub use message::{
    LeasedTask, QueueName, QueueStats, ReceiptHandle, Task, TaskId, TaskState, Timestamp,
    DEFAULT_MAX_RETRY,
};
pub use provider::{InMemoryConfig, ProviderConfig, ProviderType, QueueConfig, SqliteConfig};
pub use providers::{InMemoryProvider, SqliteProvider};
pub use retry::RetryPolicy;
pub use server::{
    HandlerError, ServerConfig, ServerStats, TaskHandler, TaskMux, TaskOutcome, TaskServer,
};
