//! Tests for task identifiers and task construction.

use super::*;

// ============================================================================
// QueueName Tests
// ============================================================================

mod queue_name_tests {
    use super::*;

    /// Verify that the default queue is named "default".
    #[test]
    fn test_default_queue_name() {
        assert_eq!(QueueName::default().as_str(), "default");
    }

    /// Verify that empty and oversized names are rejected.
    #[test]
    fn test_rejects_bad_lengths() {
        assert!(QueueName::new("").is_err());
        assert!(QueueName::new("a".repeat(129)).is_err());
    }

    /// Verify that whitespace and punctuation are rejected.
    #[test]
    fn test_rejects_invalid_characters() {
        assert!(QueueName::new("has space").is_err());
        assert!(QueueName::new("semi;colon").is_err());
        assert!(QueueName::new("webhook:incoming").is_ok());
    }
}

// ============================================================================
// Task Tests
// ============================================================================

mod task_tests {
    use super::*;

    /// Verify that new tasks go to the default queue with the default retry budget.
    #[test]
    fn test_new_task_defaults() {
        let task = Task::new("webhook:incoming", b"{}".to_vec());

        assert_eq!(task.queue, QueueName::default());
        assert_eq!(task.max_retry, DEFAULT_MAX_RETRY);
        assert!(task.validate().is_ok());
    }

    /// Verify that a blank task type fails validation.
    #[test]
    fn test_blank_task_type_is_invalid() {
        let task = Task::new("  ", Bytes::new());
        assert!(matches!(
            task.validate(),
            Err(ValidationError::Required { .. })
        ));
    }

    /// Verify that JSON payloads are encoded verbatim.
    #[test]
    fn test_from_json_encodes_payload() {
        let task = Task::from_json("t", &serde_json::json!({"a": 1})).unwrap();
        assert_eq!(&task.payload[..], br#"{"a":1}"#);
    }
}

// ============================================================================
// Timestamp Tests
// ============================================================================

/// Verify that adding a huge delay saturates instead of panicking.
#[test]
fn test_timestamp_after_saturates() {
    let ts = Timestamp::now().after(std::time::Duration::from_secs(u64::MAX));
    assert!(ts > Timestamp::now());
}

/// Verify that task states round-trip through their storage names.
#[test]
fn test_task_state_storage_names() {
    for state in [
        TaskState::Pending,
        TaskState::Active,
        TaskState::Retry,
        TaskState::Archived,
    ] {
        assert_eq!(state.as_str().parse::<TaskState>().unwrap(), state);
    }
    assert!("completed".parse::<TaskState>().is_err());
}
