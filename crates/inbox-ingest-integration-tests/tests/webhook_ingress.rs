//! Integration tests for webhook verification at the ingress
//!
//! These tests drive the HTTP router and check what reaches the queue and
//! the raw event store.

mod common;

use axum::http::StatusCode;
use common::{hub_signature, telegram_text, Pipeline, TG_SECRET, WA_SECRET};
use queue_runtime::{QueueClient, QueueName, TaskOutcome};

const WA_BODY: &str = r#"{"object":"whatsapp_business_account","entry":[{"id":"1","changes":[]}]}"#;

/// Verify that a wrong WhatsApp signature is rejected before anything is
/// stored or enqueued.
#[tokio::test]
async fn test_wrong_whatsapp_signature_stores_nothing() {
    let (pipeline, store) = Pipeline::in_memory().await;

    let status = pipeline
        .post_whatsapp(WA_BODY, Some(hub_signature("not-the-app-secret", WA_BODY)))
        .await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(store.raw_event_count().await, 0);
    assert!(pipeline.drain().await.is_empty());
}

/// Verify that a signed WhatsApp delivery is recorded and settles as a
/// no-op in the worker.
#[tokio::test]
async fn test_signed_whatsapp_delivery_completes_without_messages() {
    let (pipeline, store) = Pipeline::in_memory().await;

    let status = pipeline
        .post_whatsapp(WA_BODY, Some(hub_signature(WA_SECRET, WA_BODY)))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);

    let outcomes = pipeline.drain().await;

    assert_eq!(outcomes, vec![TaskOutcome::Completed]);
    assert_eq!(store.raw_event_count().await, 1);
    assert_eq!(store.message_count().await, 0);
}

/// Verify that a Telegram delivery under the wrong path secret is forbidden.
#[tokio::test]
async fn test_wrong_telegram_secret_is_forbidden() {
    let (pipeline, store) = Pipeline::in_memory().await;

    let status = pipeline
        .post_telegram("guess", &telegram_text(1, 10, 100, None, "hi"))
        .await;

    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(store.raw_event_count().await, 0);
    let stats = pipeline
        .client
        .stats(&QueueName::default())
        .await
        .unwrap();
    assert_eq!(stats.pending, 0);
}

/// Verify that each accepted delivery becomes exactly one pending task.
#[tokio::test]
async fn test_accepted_deliveries_are_queued() {
    let (pipeline, _store) = Pipeline::in_memory().await;

    for update_id in 1..=3 {
        let status = pipeline
            .post_telegram(TG_SECRET, &telegram_text(update_id, update_id, 100, None, "hi"))
            .await;
        assert_eq!(status, StatusCode::ACCEPTED);
    }

    let stats = pipeline
        .client
        .stats(&QueueName::default())
        .await
        .unwrap();
    assert_eq!(stats.pending, 3);
}
