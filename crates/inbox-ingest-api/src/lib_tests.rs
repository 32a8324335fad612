//! Tests for the webhook HTTP layer.

use super::*;
use async_trait::async_trait;
use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use hmac::{Hmac, Mac};
use inbox_ingest_core::store::MemoryStore;
use queue_runtime::{
    QueueClientFactory, QueueError, QueueProvider, QueueStats, Task, TaskId,
};
use sha2::Sha256;
use std::sync::atomic::{AtomicUsize, Ordering};
use tower::ServiceExt;

const WA_SECRET: &str = "wa-app-secret";
const TG_SECRET: &str = "tg-path-secret";
const TG_BODY: &str = r#"{"update_id":1,"message":{"message_id":5,"date":1714558830,"chat":{"id":100},"from":{"id":7,"first_name":"Ana"},"text":"hi"}}"#;
const WA_BODY: &str = r#"{"object":"whatsapp_business_account","entry":[]}"#;

// ============================================================================
// Test doubles
// ============================================================================

/// Queue client that fails every enqueue and counts the attempts.
#[derive(Default)]
struct FailingQueue {
    attempts: AtomicUsize,
}

#[async_trait]
impl QueueClient for FailingQueue {
    async fn enqueue(&self, _task: Task) -> Result<TaskId, QueueError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        Err(QueueError::ConnectionFailed {
            message: "queue unreachable".to_string(),
        })
    }

    async fn stats(&self, _queue: &QueueName) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::default())
    }
}

/// Queue client whose enqueue never completes.
struct StalledQueue;

#[async_trait]
impl QueueClient for StalledQueue {
    async fn enqueue(&self, _task: Task) -> Result<TaskId, QueueError> {
        std::future::pending().await
    }

    async fn stats(&self, _queue: &QueueName) -> Result<QueueStats, QueueError> {
        Ok(QueueStats::default())
    }
}

// ============================================================================
// Helpers
// ============================================================================

fn test_config() -> ServiceConfig {
    let mut config = ServiceConfig::default();
    config.webhooks.whatsapp_app_secret = WA_SECRET.to_string();
    config.webhooks.telegram_webhook_secret = TG_SECRET.to_string();
    config
}

struct Harness {
    app: Router,
    provider: Arc<dyn QueueProvider>,
    store: MemoryStore,
}

fn harness(config: ServiceConfig) -> Harness {
    let (provider, client) = QueueClientFactory::create_test_pair();
    let store = MemoryStore::new();
    let state = AppState::new(
        config,
        client,
        Arc::new(store.clone()),
        ServiceMetrics::new().unwrap(),
    )
    .unwrap();
    Harness {
        app: create_router(state),
        provider,
        store,
    }
}

fn sign(secret: &str, body: &[u8]) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body);
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}

fn post(uri: &str, body: &'static str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body))
        .unwrap()
}

fn signed_whatsapp(body: &'static str, signature: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/wa/webhook")
        .header("content-type", "application/json")
        .header(HUB_SIGNATURE_HEADER, signature)
        .body(Body::from(body))
        .unwrap()
}

fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

async fn body_text(response: Response) -> String {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    String::from_utf8(bytes.to_vec()).unwrap()
}

async fn lease_envelope(provider: &Arc<dyn QueueProvider>) -> Option<WebhookEnvelope> {
    provider
        .lease(&QueueName::default(), Duration::from_secs(30))
        .await
        .unwrap()
        .map(|leased| leased.payload_json::<WebhookEnvelope>().unwrap())
}

// ============================================================================
// Telegram
// ============================================================================

mod telegram_tests {
    use super::*;

    /// Verify that a matching path secret is accepted and enqueued.
    #[tokio::test]
    async fn test_matching_secret_is_accepted_and_enqueued() {
        let h = harness(test_config());

        let response = h
            .app
            .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(body_text(response).await, "accepted");

        let envelope = lease_envelope(&h.provider).await.expect("task enqueued");
        assert_eq!(envelope.provider, PROVIDER_TELEGRAM);
        assert_eq!(envelope.body, TG_BODY);
        assert!(envelope.signature_valid);
        assert!(envelope.event_id.is_some());
        assert_eq!(h.store.raw_event_count().await, 1);
    }

    /// Verify that a wrong path secret returns 403 and enqueues nothing.
    #[tokio::test]
    async fn test_wrong_secret_is_forbidden() {
        let h = harness(test_config());

        let response = h
            .app
            .oneshot(post("/tg/not-the-secret/webhook", TG_BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(lease_envelope(&h.provider).await.is_none());
        assert_eq!(h.store.raw_event_count().await, 0);
    }

    /// Verify that an unset secret accepts any path segment.
    #[tokio::test]
    async fn test_unset_secret_accepts_any_path() {
        let mut config = test_config();
        config.webhooks.telegram_webhook_secret = String::new();
        let h = harness(config);

        let response = h
            .app
            .oneshot(post("/tg/anything/webhook", TG_BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert!(lease_envelope(&h.provider).await.is_some());
    }

    /// Verify that the raw event is skipped when ingress persistence is off.
    #[tokio::test]
    async fn test_ingress_persistence_can_be_disabled() {
        let mut config = test_config();
        config.webhooks.persist_raw_events_at_ingress = false;
        let h = harness(config);

        let response = h
            .app
            .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        assert_eq!(h.store.raw_event_count().await, 0);
        assert!(lease_envelope(&h.provider).await.is_some());
    }
}

// ============================================================================
// WhatsApp
// ============================================================================

mod whatsapp_tests {
    use super::*;

    /// Verify that a valid signature is accepted and enqueued.
    #[tokio::test]
    async fn test_valid_signature_is_accepted() {
        let h = harness(test_config());
        let signature = sign(WA_SECRET, WA_BODY.as_bytes());

        let response = h
            .app
            .oneshot(signed_whatsapp(WA_BODY, &signature))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let envelope = lease_envelope(&h.provider).await.expect("task enqueued");
        assert_eq!(envelope.provider, PROVIDER_WHATSAPP);
        assert_eq!(envelope.body, WA_BODY);
    }

    /// Verify that a signature made with another secret is rejected with 401
    /// and leaves no raw event behind.
    #[tokio::test]
    async fn test_wrong_signature_is_unauthorized() {
        let h = harness(test_config());
        let signature = sign("some-other-secret", WA_BODY.as_bytes());

        let response = h
            .app
            .oneshot(signed_whatsapp(WA_BODY, &signature))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(h.store.raw_event_count().await, 0);
        assert!(lease_envelope(&h.provider).await.is_none());
    }

    /// Verify that a missing signature header is rejected with 401.
    #[tokio::test]
    async fn test_missing_signature_is_unauthorized() {
        let h = harness(test_config());

        let response = h.app.oneshot(post("/wa/webhook", WA_BODY)).await.unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    /// Verify that an unset app secret rejects even a signature computed
    /// with the empty key.
    #[tokio::test]
    async fn test_unset_secret_rejects_everything() {
        let mut config = test_config();
        config.webhooks.whatsapp_app_secret = String::new();
        let h = harness(config);
        let signature = sign("", WA_BODY.as_bytes());

        let response = h
            .app
            .oneshot(signed_whatsapp(WA_BODY, &signature))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }
}

// ============================================================================
// Queue failures
// ============================================================================

/// Verify that an enqueue failure surfaces as 500 so the provider redelivers.
#[tokio::test]
async fn test_enqueue_failure_returns_queue_error() {
    let queue = Arc::new(FailingQueue::default());
    let state = AppState::new(
        test_config(),
        queue.clone(),
        Arc::new(MemoryStore::new()),
        ServiceMetrics::new().unwrap(),
    )
    .unwrap();
    let app = create_router(state);

    let response = app
        .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(body_text(response).await, "queue error");
    assert_eq!(queue.attempts.load(Ordering::SeqCst), 1);
}

/// Verify that a request outliving the request timeout is answered with
/// 503 so the provider redelivers.
#[tokio::test(start_paused = true)]
async fn test_request_timeout_returns_service_unavailable() {
    let mut config = test_config();
    config.server.request_timeout_seconds = 1;
    let state = AppState::new(
        config,
        Arc::new(StalledQueue),
        Arc::new(MemoryStore::new()),
        ServiceMetrics::new().unwrap(),
    )
    .unwrap();

    let response = create_router(state)
        .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
}

// ============================================================================
// Malformed bodies
// ============================================================================

/// Verify that a verified body which is not UTF-8 is refused and nothing
/// is recorded or queued.
#[tokio::test]
async fn test_non_utf8_body_is_refused() {
    let h = harness(test_config());
    let request = Request::builder()
        .method("POST")
        .uri("/tg/tg-path-secret/webhook")
        .body(Body::from(vec![0xff, 0xfe, b'{', b'}']))
        .unwrap();

    let response = h.app.oneshot(request).await.unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(body_text(response).await, "bad request");
    assert_eq!(h.store.raw_event_count().await, 0);
    assert!(lease_envelope(&h.provider).await.is_none());
}

/// Verify that a body over the configured limit is refused before it is
/// recorded.
#[tokio::test]
async fn test_oversized_body_is_refused() {
    let mut config = test_config();
    config.server.max_body_size = 16;
    let h = harness(config);

    let response = h
        .app
        .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::PAYLOAD_TOO_LARGE);
    assert_eq!(h.store.raw_event_count().await, 0);
    assert!(lease_envelope(&h.provider).await.is_none());
}

// ============================================================================
// Health and metrics
// ============================================================================

/// Verify the liveness response body.
#[tokio::test]
async fn test_healthz_reports_ok() {
    let h = harness(test_config());

    let response = h.app.oneshot(get("/healthz")).await.unwrap();

    assert_eq!(response.status(), StatusCode::OK);
    let body: HealthResponse = serde_json::from_str(&body_text(response).await).unwrap();
    assert_eq!(body, HealthResponse::ok());
}

/// Verify that accepted and rejected requests show up in the metrics output.
#[tokio::test]
async fn test_metrics_count_outcomes() {
    let h = harness(test_config());

    let accepted = h
        .app
        .clone()
        .oneshot(post("/tg/tg-path-secret/webhook", TG_BODY))
        .await
        .unwrap();
    assert_eq!(accepted.status(), StatusCode::ACCEPTED);

    let rejected = h
        .app
        .clone()
        .oneshot(post("/tg/wrong/webhook", TG_BODY))
        .await
        .unwrap();
    assert_eq!(rejected.status(), StatusCode::FORBIDDEN);

    let response = h.app.oneshot(get("/metrics")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let text = body_text(response).await;
    assert!(text.contains(r#"webhook_requests_total{outcome="accepted",provider="tg"} 1"#));
    assert!(text.contains(r#"webhook_requests_total{outcome="forbidden",provider="tg"} 1"#));
    assert!(text.contains(r#"webhook_enqueue_duration_seconds_count{provider="tg"} 1"#));
}

// ============================================================================
// Replay
// ============================================================================

mod replay_tests {
    use super::*;

    async fn store_event(store: &MemoryStore) -> EventId {
        let envelope = WebhookEnvelope::new(PROVIDER_TELEGRAM, TG_BODY, true);
        let id = envelope.event_id.unwrap();
        store
            .append(&RawEvent::from_envelope(id, &envelope))
            .await
            .unwrap();
        id
    }

    /// Verify that a stored event is enqueued again under its original id.
    #[tokio::test]
    async fn test_replay_enqueues_stored_event() {
        let mut config = test_config();
        config.admin.enable_replay = true;
        let h = harness(config);
        let id = store_event(&h.store).await;

        let uri = format!("/admin/raw-events/{}/replay", id);
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::ACCEPTED);
        let body: ReplayResponse = serde_json::from_str(&body_text(response).await).unwrap();
        assert_eq!(body.event_id, id.to_string());
        assert_eq!(body.status, "queued");

        let envelope = lease_envelope(&h.provider).await.expect("task enqueued");
        assert_eq!(envelope.event_id, Some(id));
        assert_eq!(envelope.body, TG_BODY);
    }

    /// Verify that replay of an unknown event returns 404.
    #[tokio::test]
    async fn test_replay_unknown_event_is_not_found() {
        let mut config = test_config();
        config.admin.enable_replay = true;
        let h = harness(config);

        let uri = format!("/admin/raw-events/{}/replay", EventId::new());
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Verify that a malformed event id returns 404.
    #[tokio::test]
    async fn test_replay_malformed_id_is_not_found() {
        let mut config = test_config();
        config.admin.enable_replay = true;
        let h = harness(config);

        let request = Request::builder()
            .method("POST")
            .uri("/admin/raw-events/not-an-id/replay")
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    /// Verify that replay is hidden unless enabled.
    #[tokio::test]
    async fn test_replay_disabled_by_default() {
        let h = harness(test_config());
        let id = store_event(&h.store).await;

        let uri = format!("/admin/raw-events/{}/replay", id);
        let request = Request::builder()
            .method("POST")
            .uri(uri)
            .body(Body::empty())
            .unwrap();
        let response = h.app.oneshot(request).await.unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(lease_envelope(&h.provider).await.is_none());
    }
}
