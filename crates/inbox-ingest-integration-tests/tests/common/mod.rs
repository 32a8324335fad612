//! Shared harness for end-to-end pipeline tests
//!
//! A [`Pipeline`] wires the HTTP ingress, a queue provider and the ingestion
//! worker together the same way the service binary does, but drives the
//! worker one task at a time so tests can observe each settlement.

#![allow(dead_code)]

use axum::{
    body::Body,
    http::{Request, StatusCode},
    Router,
};
use hmac::{Hmac, Mac};
use inbox_ingest_api::{create_router, AppState, ServiceConfig, ServiceMetrics, HUB_SIGNATURE_HEADER};
use inbox_ingest_core::ingest::IngestionWorker;
use inbox_ingest_core::model::Thread;
use inbox_ingest_core::store::{ConversationStore, MemoryStore, RawEventStore};
use inbox_ingest_core::workspace::ConfiguredWorkspaceResolver;
use inbox_ingest_core::WorkspaceId;
use queue_runtime::{
    QueueClient, QueueClientFactory, QueueConfig, QueueName, QueueProvider, RetryPolicy,
    ServerConfig, TaskHandler, TaskMux, TaskOutcome, TaskServer,
};
use serde_json::json;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use tower::ServiceExt;

pub const WA_SECRET: &str = "integration-wa-secret";
pub const TG_SECRET: &str = "integration-tg-secret";

// ============================================================================
// Pipeline
// ============================================================================

pub struct Pipeline {
    pub app: Router,
    pub provider: Arc<dyn QueueProvider>,
    pub client: Arc<dyn QueueClient>,
    pub server: TaskServer,
    pub handler: Arc<dyn TaskHandler>,
    pub worker: IngestionWorker,
    pub raw_events: Arc<dyn RawEventStore>,
    pub conversations: Arc<dyn ConversationStore>,
    pub workspace: WorkspaceId,
}

impl Pipeline {
    /// Pipeline over the in-memory queue and store
    pub async fn in_memory() -> (Self, MemoryStore) {
        let store = MemoryStore::new();
        let provider = QueueClientFactory::create_provider(&QueueConfig::default())
            .await
            .unwrap();
        let pipeline = Self::build(provider, Arc::new(store.clone()), Arc::new(store.clone())).await;
        (pipeline, store)
    }

    /// Pipeline over caller-supplied backends
    pub async fn build(
        provider: Arc<dyn QueueProvider>,
        raw_events: Arc<dyn RawEventStore>,
        conversations: Arc<dyn ConversationStore>,
    ) -> Self {
        let workspace = WorkspaceId::new();
        conversations.ensure_workspace(&workspace).await.unwrap();

        let mut config = ServiceConfig::default();
        config.webhooks.whatsapp_app_secret = WA_SECRET.to_string();
        config.webhooks.telegram_webhook_secret = TG_SECRET.to_string();
        config.workspaces.default = Some(workspace);
        config.admin.enable_replay = true;

        let queue_config = QueueConfig::default();
        let client = QueueClientFactory::create_client(provider.clone(), &queue_config);
        let state = AppState::new(
            config.clone(),
            client.clone(),
            raw_events.clone(),
            ServiceMetrics::new().unwrap(),
        )
        .unwrap();

        let worker = IngestionWorker::new(
            raw_events.clone(),
            conversations.clone(),
            Arc::new(ConfiguredWorkspaceResolver::single(workspace)),
        );
        let handler: Arc<dyn TaskHandler> = Arc::new(
            TaskMux::new().handle(
                inbox_ingest_core::webhook::WEBHOOK_TASK_TYPE,
                Arc::new(worker.clone()),
            ),
        );

        let server = TaskServer::new(
            provider.clone(),
            ServerConfig {
                concurrency: 4,
                queue: QueueName::default(),
                poll_interval: Duration::from_millis(10),
                lease_duration: Duration::from_secs(30),
                shutdown_grace: Duration::from_secs(1),
                retry_policy: RetryPolicy::default(),
            },
        );

        Self {
            app: create_router(state),
            provider,
            client,
            server,
            handler,
            worker,
            raw_events,
            conversations,
            workspace,
        }
    }

    /// POST a Telegram update under the given path secret
    pub async fn post_telegram(&self, secret: &str, body: &serde_json::Value) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/tg/{}/webhook", secret))
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap().status()
    }

    /// POST a WhatsApp payload with an optional `X-Hub-Signature-256`
    pub async fn post_whatsapp(&self, body: &str, signature: Option<String>) -> StatusCode {
        let mut builder = Request::builder()
            .method("POST")
            .uri("/wa/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            builder = builder.header(HUB_SIGNATURE_HEADER, signature);
        }
        let request = builder.body(Body::from(body.to_string())).unwrap();
        self.app.clone().oneshot(request).await.unwrap().status()
    }

    /// POST to the replay endpoint
    pub async fn post_replay(&self, event_id: &str) -> StatusCode {
        let request = Request::builder()
            .method("POST")
            .uri(format!("/admin/raw-events/{}/replay", event_id))
            .body(Body::empty())
            .unwrap();
        self.app.clone().oneshot(request).await.unwrap().status()
    }

    /// Process deliverable tasks until the queue has none left
    pub async fn drain(&self) -> Vec<TaskOutcome> {
        let mut outcomes = Vec::new();
        while let Some(outcome) = self
            .server
            .process_next(self.handler.clone())
            .await
            .unwrap()
        {
            outcomes.push(outcome);
        }
        outcomes
    }

    pub async fn thread(&self, channel_thread_ref: &str) -> Option<Thread> {
        self.conversations
            .find_thread(&self.workspace, channel_thread_ref)
            .await
            .unwrap()
    }
}

// ============================================================================
// Payload builders
// ============================================================================

/// Telegram update carrying a text message
pub fn telegram_text(
    update_id: i64,
    message_id: i64,
    chat_id: i64,
    topic: Option<i64>,
    text: &str,
) -> serde_json::Value {
    let mut message = json!({
        "message_id": message_id,
        "date": 1714558830,
        "chat": { "id": chat_id, "type": "supergroup" },
        "from": { "id": 42, "is_bot": false, "first_name": "Ana", "username": "ana" },
        "text": text
    });
    if let Some(topic) = topic {
        message["message_thread_id"] = json!(topic);
    }
    json!({ "update_id": update_id, "message": message })
}

/// `sha256=<hex>` signature for a WhatsApp body
pub fn hub_signature(secret: &str, body: &str) -> String {
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(body.as_bytes());
    format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
}
