//! Error types for queue operations.

use std::time::Duration;
use thiserror::Error;

/// Comprehensive error type for all queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task not found: {task_id}")]
    TaskNotFound { task_id: String },

    #[error("Lease on task {task_id} is no longer held by this receipt")]
    LeaseLost { task_id: String },

    #[error("Queue '{queue_name}' is full ({capacity} tasks)")]
    QueueFull { queue_name: String, capacity: usize },

    #[error("Operation timed out after {duration:?}")]
    Timeout { duration: Duration },

    #[error("Connection failed: {message}")]
    ConnectionFailed { message: String },

    #[error("Storage error: {message}")]
    Storage { message: String },

    #[error("Task payload too large: {size} bytes (max: {max_size})")]
    TaskTooLarge { size: usize, max_size: usize },

    #[error("Serialization failed: {0}")]
    SerializationError(#[from] SerializationError),

    #[error("Validation error: {0}")]
    ValidationError(#[from] ValidationError),
}

impl QueueError {
    /// Check if error is transient and should be retried
    pub fn is_transient(&self) -> bool {
        match self {
            Self::TaskNotFound { .. } => false,
            Self::LeaseLost { .. } => false,
            Self::QueueFull { .. } => true,
            Self::Timeout { .. } => true,
            Self::ConnectionFailed { .. } => true,
            Self::Storage { .. } => true,
            Self::TaskTooLarge { .. } => false,
            Self::SerializationError(_) => false,
            Self::ValidationError(_) => false,
        }
    }
}

impl From<rusqlite::Error> for QueueError {
    fn from(err: rusqlite::Error) -> Self {
        match err.sqlite_error_code() {
            Some(rusqlite::ErrorCode::CannotOpen) | Some(rusqlite::ErrorCode::NotADatabase) => {
                Self::ConnectionFailed {
                    message: err.to_string(),
                }
            }
            _ => Self::Storage {
                message: err.to_string(),
            },
        }
    }
}

/// Errors during task payload serialization/deserialization
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("JSON serialization failed: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Stored task field '{field}' is corrupt: {message}")]
    CorruptField { field: String, message: String },
}

/// Validation errors
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    Required { field: String },

    #[error("Invalid format for {field}: {message}")]
    InvalidFormat { field: String, message: String },

    #[error("Value out of range for {field}: {message}")]
    OutOfRange { field: String, message: String },
}

#[cfg(test)]
#[path = "error_tests.rs"]
mod tests;
