//! Task types for queue operations including core domain identifiers.

use crate::error::{QueueError, SerializationError, ValidationError};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::str::FromStr;

/// Maximum number of times a task is retried before it is archived.
pub const DEFAULT_MAX_RETRY: u32 = 25;

// ============================================================================
// Core Domain Identifiers
// ============================================================================

/// Validated queue name with length and character restrictions
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QueueName(String);

impl QueueName {
    /// Name of the queue used when a task does not specify one
    pub const DEFAULT: &'static str = "default";

    /// Create new queue name with validation
    pub fn new(name: impl Into<String>) -> Result<Self, ValidationError> {
        let name = name.into();
        if name.is_empty() || name.len() > 128 {
            return Err(ValidationError::OutOfRange {
                field: "queue_name".to_string(),
                message: "must be 1-128 characters".to_string(),
            });
        }

        if !name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == ':')
        {
            return Err(ValidationError::InvalidFormat {
                field: "queue_name".to_string(),
                message: "only ASCII alphanumeric, '-', '_' and ':' allowed".to_string(),
            });
        }

        Ok(Self(name))
    }

    /// Get queue name as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for QueueName {
    fn default() -> Self {
        Self(Self::DEFAULT.to_string())
    }
}

impl std::fmt::Display for QueueName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for QueueName {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

/// Unique identifier for tasks within the queue system
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(String);

impl TaskId {
    /// Generate new random task ID
    pub fn new() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    /// Get task ID as string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for TaskId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.is_empty() {
            return Err(ValidationError::Required {
                field: "task_id".to_string(),
            });
        }

        Ok(Self(s.to_string()))
    }
}

/// Timestamp wrapper for consistent time handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current time
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Create timestamp from DateTime
    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Create timestamp from milliseconds since the Unix epoch
    pub fn from_unix_millis(millis: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp_millis(millis).map(Self)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> DateTime<Utc> {
        self.0
    }

    /// Milliseconds since the Unix epoch
    pub fn unix_millis(&self) -> i64 {
        self.0.timestamp_millis()
    }

    /// Timestamp shifted forward by a std duration, saturating on overflow
    pub fn after(&self, delay: std::time::Duration) -> Self {
        let delta = chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::MAX);
        Self(self.0.checked_add_signed(delta).unwrap_or(DateTime::<Utc>::MAX_UTC))
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.format("%Y-%m-%d %H:%M:%S%.3f UTC"))
    }
}

impl FromStr for Timestamp {
    type Err = chrono::ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let dt = s.parse::<DateTime<Utc>>()?;
        Ok(Self::from_datetime(dt))
    }
}

// ============================================================================
// Task Types
// ============================================================================

/// A unit of work to be enqueued.
///
/// The payload is opaque to the queue; `task_type` is what the consuming
/// side uses to pick a handler.
#[derive(Debug, Clone)]
pub struct Task {
    pub task_type: String,
    pub payload: Bytes,
    pub queue: QueueName,
    pub max_retry: u32,
}

impl Task {
    /// Create a task for the default queue
    pub fn new(task_type: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            task_type: task_type.into(),
            payload: payload.into(),
            queue: QueueName::default(),
            max_retry: DEFAULT_MAX_RETRY,
        }
    }

    /// Create a task whose payload is the JSON encoding of `value`
    pub fn from_json<T: Serialize>(
        task_type: impl Into<String>,
        value: &T,
    ) -> Result<Self, QueueError> {
        let payload = serde_json::to_vec(value).map_err(SerializationError::JsonError)?;
        Ok(Self::new(task_type, payload))
    }

    /// Route the task to a named queue
    pub fn with_queue(mut self, queue: QueueName) -> Self {
        self.queue = queue;
        self
    }

    /// Override the retry budget of the task
    pub fn with_max_retry(mut self, max_retry: u32) -> Self {
        self.max_retry = max_retry;
        self
    }

    /// Reject tasks that can never be processed
    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.task_type.trim().is_empty() {
            return Err(ValidationError::Required {
                field: "task_type".to_string(),
            });
        }
        Ok(())
    }
}

/// Proof of an active lease on a task.
///
/// The lease token changes every time the task is leased, so a worker that
/// lost its lease (expiry followed by redelivery) cannot settle the task.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ReceiptHandle {
    task_id: TaskId,
    lease_token: String,
}

impl ReceiptHandle {
    pub fn new(task_id: TaskId, lease_token: String) -> Self {
        Self {
            task_id,
            lease_token,
        }
    }

    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    pub fn lease_token(&self) -> &str {
        &self.lease_token
    }
}

/// A task handed to a consumer under a lease
#[derive(Debug, Clone)]
pub struct LeasedTask {
    pub id: TaskId,
    pub task_type: String,
    pub payload: Bytes,
    pub queue: QueueName,
    /// Number of retries already performed (zero on first delivery)
    pub retry_count: u32,
    pub max_retry: u32,
    pub enqueued_at: Timestamp,
    pub lease_expires_at: Timestamp,
    pub receipt: ReceiptHandle,
}

impl LeasedTask {
    /// Decode the payload as JSON
    pub fn payload_json<T: DeserializeOwned>(&self) -> Result<T, SerializationError> {
        serde_json::from_slice(&self.payload).map_err(SerializationError::JsonError)
    }
}

/// Lifecycle state of a stored task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Waiting for its first delivery
    Pending,
    /// Leased by a worker
    Active,
    /// Waiting for the back-off delay before redelivery
    Retry,
    /// Dead-lettered, never redelivered
    Archived,
}

impl TaskState {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Retry => "retry",
            Self::Archived => "archived",
        }
    }
}

impl FromStr for TaskState {
    type Err = SerializationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "active" => Ok(Self::Active),
            "retry" => Ok(Self::Retry),
            "archived" => Ok(Self::Archived),
            other => Err(SerializationError::CorruptField {
                field: "state".to_string(),
                message: format!("unknown task state '{}'", other),
            }),
        }
    }
}

/// Task counts per state for one queue
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct QueueStats {
    pub pending: u64,
    pub active: u64,
    pub scheduled: u64,
    pub archived: u64,
}

#[cfg(test)]
#[path = "message_tests.rs"]
mod tests;
