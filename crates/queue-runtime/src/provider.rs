//! Provider types and configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Enumeration of supported queue providers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProviderType {
    InMemory,
    Sqlite,
}

impl ProviderType {
    /// Whether tasks survive a process restart
    pub fn is_durable(&self) -> bool {
        match self {
            Self::InMemory => false,
            Self::Sqlite => true,
        }
    }

    /// Get maximum task payload size for provider
    pub fn max_payload_size(&self) -> usize {
        match self {
            Self::InMemory => 10 * 1024 * 1024, // 10MB
            Self::Sqlite => 4 * 1024 * 1024,    // 4MB
        }
    }
}

impl std::fmt::Display for ProviderType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::InMemory => write!(f, "in-memory"),
            Self::Sqlite => write!(f, "sqlite"),
        }
    }
}

/// Configuration for queue client initialization
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    pub provider: ProviderConfig,
    /// Upper bound on a single enqueue call, in milliseconds
    pub enqueue_timeout_ms: u64,
}

impl QueueConfig {
    pub fn enqueue_timeout(&self) -> Duration {
        Duration::from_millis(self.enqueue_timeout_ms)
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            provider: ProviderConfig::InMemory(InMemoryConfig::default()),
            enqueue_timeout_ms: 5_000,
        }
    }
}

/// Provider-specific configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "backend", rename_all = "snake_case")]
pub enum ProviderConfig {
    InMemory(InMemoryConfig),
    Sqlite(SqliteConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::InMemory(_) => ProviderType::InMemory,
            Self::Sqlite(_) => ProviderType::Sqlite,
        }
    }
}

/// In-memory provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct InMemoryConfig {
    /// Maximum number of unsettled tasks per queue
    pub max_queue_size: usize,

    /// Archived tasks kept per queue; the oldest are dropped beyond this
    pub max_archived: usize,
}

impl Default for InMemoryConfig {
    fn default() -> Self {
        Self {
            max_queue_size: 100_000,
            max_archived: 1_000,
        }
    }
}

/// SQLite provider configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SqliteConfig {
    /// Database file; created on first open
    pub path: PathBuf,
    /// How long SQLite waits on a locked database before failing, in milliseconds
    pub busy_timeout_ms: u64,
}

impl Default for SqliteConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("data/queue.db"),
            busy_timeout_ms: 5_000,
        }
    }
}

#[cfg(test)]
#[path = "provider_tests.rs"]
mod tests;
