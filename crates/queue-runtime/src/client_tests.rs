//! Tests for the producer client.

use super::*;
use crate::message::Timestamp;
use bytes::Bytes;

/// Provider whose enqueue never finishes.
struct StalledProvider;

#[async_trait]
impl QueueProvider for StalledProvider {
    async fn enqueue(&self, _task: &Task) -> Result<TaskId, QueueError> {
        std::future::pending().await
    }

    async fn lease(
        &self,
        _queue: &QueueName,
        _lease_duration: Duration,
    ) -> Result<Option<LeasedTask>, QueueError> {
        Ok(None)
    }

    async fn complete(&self, _receipt: &ReceiptHandle) -> Result<(), QueueError> {
        Ok(())
    }

    async fn retry(
        &self,
        _receipt: &ReceiptHandle,
        _delay: Duration,
        _last_error: &str,
    ) -> Result<(), QueueError> {
        Ok(())
    }

    async fn archive(&self, _receipt: &ReceiptHandle, _reason: &str) -> Result<(), QueueError> {
        Ok(())
    }

    async fn stats(&self, _queue: &QueueName) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::default())
    }

    fn provider_type(&self) -> ProviderType {
        ProviderType::InMemory
    }
}

/// Verify that an enqueued task can be leased back with its payload intact.
#[tokio::test]
async fn test_enqueue_then_lease() {
    let (provider, client) = QueueClientFactory::create_test_pair();

    let task_id = client
        .enqueue(Task::new("webhook:incoming", Bytes::from_static(b"hello")))
        .await
        .unwrap();

    let leased = provider
        .lease(&QueueName::default(), Duration::from_secs(30))
        .await
        .unwrap()
        .expect("task should be deliverable");

    assert_eq!(leased.id, task_id);
    assert_eq!(&leased.payload[..], b"hello");
    assert_eq!(leased.retry_count, 0);
    assert!(leased.lease_expires_at > Timestamp::now());
}

/// Verify that a blank task type is rejected before reaching the provider.
#[tokio::test]
async fn test_enqueue_rejects_invalid_task() {
    let (_provider, client) = QueueClientFactory::create_test_pair();

    let result = client.enqueue(Task::new("", Bytes::new())).await;

    assert!(matches!(result, Err(QueueError::ValidationError(_))));
}

/// Verify that oversized payloads are rejected as permanent errors.
#[tokio::test]
async fn test_enqueue_rejects_oversized_payload() {
    let (_provider, client) = QueueClientFactory::create_test_pair();
    let payload = vec![0u8; ProviderType::InMemory.max_payload_size() + 1];

    let err = client.enqueue(Task::new("t", payload)).await.unwrap_err();

    assert!(matches!(err, QueueError::TaskTooLarge { .. }));
    assert!(!err.is_transient());
}

/// Verify that a stalled backend surfaces as a transient timeout.
#[tokio::test(start_paused = true)]
async fn test_enqueue_times_out() {
    let client = StandardQueueClient::new(Arc::new(StalledProvider), Duration::from_millis(50));

    let err = client
        .enqueue(Task::new("t", Bytes::from_static(b"x")))
        .await
        .unwrap_err();

    assert!(matches!(err, QueueError::Timeout { .. }));
    assert!(err.is_transient());
}
