//! # Inbox Ingest HTTP Service
//!
//! Ingress gateway for provider webhooks:
//!
//! - `POST /wa/webhook`: WhatsApp Cloud API, verified by `X-Hub-Signature-256`
//! - `POST /tg/{secret}/webhook`: Telegram Bot API, verified by path secret
//! - `GET /healthz` and `GET /metrics`
//! - `POST /admin/raw-events/{event_id}/replay` when replay is enabled
//!
//! An accepted delivery is recorded as a raw event (unless disabled), wrapped
//! in a [`WebhookEnvelope`] and enqueued as a `webhook:incoming` task. The
//! provider receives `202 Accepted` once the enqueue call returns.

pub mod config;
pub mod errors;
pub mod metrics;
pub mod responses;

pub use config::ServiceConfig;
pub use errors::{ConfigError, ServiceError, WebhookHandlerError};
pub use metrics::ServiceMetrics;

use axum::{
    extract::{rejection::BytesRejection, DefaultBodyLimit, Path, State},
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use bytes::Bytes;
use inbox_ingest_core::replay::{RawEventReplayer, ReplayError};
use inbox_ingest_core::store::{RawEvent, RawEventStore};
use inbox_ingest_core::webhook::{
    HubSignatureVerifier, PathSecretVerifier, SignatureVerifier, WebhookEnvelope,
    PROVIDER_TELEGRAM, PROVIDER_WHATSAPP,
};
use inbox_ingest_core::EventId;
use queue_runtime::{QueueClient, QueueName};
use responses::{HealthResponse, ReplayResponse};
use std::future::IntoFuture;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tower::ServiceBuilder;
use tower_http::{
    compression::CompressionLayer,
    timeout::{RequestBodyTimeoutLayer, TimeoutLayer},
    trace::TraceLayer,
};
use tracing::{info, instrument};

/// Header carrying the WhatsApp body signature
pub const HUB_SIGNATURE_HEADER: &str = "x-hub-signature-256";

// ============================================================================
// Application State
// ============================================================================

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    /// Configuration for the service
    pub config: Arc<ServiceConfig>,

    /// Verifies `X-Hub-Signature-256` on WhatsApp deliveries
    pub whatsapp_verifier: Arc<dyn SignatureVerifier>,

    /// Verifies the Telegram path secret
    pub telegram_verifier: Arc<dyn SignatureVerifier>,

    /// Producer side of the task queue
    pub queue: Arc<dyn QueueClient>,

    /// Queue accepted webhooks are sent to
    pub queue_name: QueueName,

    /// Audit log of accepted deliveries
    pub raw_events: Arc<dyn RawEventStore>,

    /// Metrics collector for observability
    pub metrics: Arc<ServiceMetrics>,
}

impl AppState {
    /// Create new application state with verifiers built from configuration
    pub fn new(
        config: ServiceConfig,
        queue: Arc<dyn QueueClient>,
        raw_events: Arc<dyn RawEventStore>,
        metrics: Arc<ServiceMetrics>,
    ) -> Result<Self, ConfigError> {
        let queue_name = config.queue.queue_name()?;
        Ok(Self {
            whatsapp_verifier: Arc::new(HubSignatureVerifier::new(
                config.webhooks.whatsapp_app_secret.clone(),
            )),
            telegram_verifier: Arc::new(PathSecretVerifier::new(
                config.webhooks.telegram_webhook_secret.clone(),
            )),
            config: Arc::new(config),
            queue,
            queue_name,
            raw_events,
            metrics,
        })
    }

    fn replayer(&self) -> RawEventReplayer {
        RawEventReplayer::new(self.raw_events.clone(), self.queue.clone())
            .with_queue(self.queue_name.clone())
            .with_max_retry(self.config.queue.max_retry)
    }
}

// ============================================================================
// HTTP Server
// ============================================================================

/// Create HTTP router with all endpoints
pub fn create_router(state: AppState) -> Router {
    let server = &state.config.server;

    let webhook_routes = Router::new()
        .route("/wa/webhook", post(handle_whatsapp_webhook))
        .route("/tg/{secret}/webhook", post(handle_telegram_webhook));

    let observability_routes = Router::new()
        .route("/healthz", get(handle_health_check))
        .route("/metrics", get(metrics_endpoint));

    let admin_routes = Router::new().route(
        "/admin/raw-events/{event_id}/replay",
        post(replay_raw_event),
    );

    Router::new()
        .merge(webhook_routes)
        .merge(observability_routes)
        .merge(admin_routes)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                // Timeouts are transient; 503 asks the provider to redeliver
                .layer(TimeoutLayer::with_status_code(
                    StatusCode::SERVICE_UNAVAILABLE,
                    Duration::from_secs(server.request_timeout_seconds),
                ))
                .layer(RequestBodyTimeoutLayer::new(Duration::from_secs(
                    server.read_timeout_seconds,
                )))
                .layer(CompressionLayer::new())
                .layer(DefaultBodyLimit::max(server.max_body_size))
                .into_inner(),
        )
        .with_state(state)
}

/// Serve the router until `shutdown` is cancelled.
///
/// After cancellation no new connections are accepted; in-flight requests
/// get `server.shutdown_timeout_seconds` to finish.
pub async fn start_server(state: AppState, shutdown: CancellationToken) -> Result<(), ServiceError> {
    let address = state.config.server.bind_address();
    let shutdown_timeout = Duration::from_secs(state.config.server.shutdown_timeout_seconds);
    let app = create_router(state);

    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .map_err(|e| ServiceError::BindFailed {
            address: address.clone(),
            message: e.to_string(),
        })?;

    info!(address = %address, "Starting HTTP server");

    let graceful_signal = shutdown.clone();
    let serve = axum::serve(listener, app)
        .with_graceful_shutdown(async move { graceful_signal.cancelled().await });
    let mut serve = std::pin::pin!(IntoFuture::into_future(serve));

    // Run until the server ends on its own, or until it has drained for
    // the shutdown timeout after cancellation.
    let result = tokio::select! {
        result = &mut serve => result,
        _ = async {
            shutdown.cancelled().await;
            tokio::time::sleep(shutdown_timeout).await;
        } => {
            tracing::warn!(
                timeout_seconds = shutdown_timeout.as_secs(),
                "HTTP server did not drain before the shutdown timeout"
            );
            Ok(())
        }
    };

    result.map_err(|e| ServiceError::ServerFailed {
        message: e.to_string(),
    })?;

    info!("HTTP server shutdown complete");
    Ok(())
}

// ============================================================================
// Webhook Handlers
// ============================================================================

/// Handle WhatsApp Cloud API deliveries
#[instrument(skip(state, headers, body), fields(provider = PROVIDER_WHATSAPP))]
pub async fn handle_whatsapp_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, WebhookHandlerError> {
    let body = read_body(&state, PROVIDER_WHATSAPP, body)?;
    let signature = headers
        .get(HUB_SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    if !state.whatsapp_verifier.verify(signature, &body) {
        return Err(reject(
            &state,
            PROVIDER_WHATSAPP,
            WebhookHandlerError::InvalidSignature {
                provider: PROVIDER_WHATSAPP.to_string(),
            },
        ));
    }

    accept_webhook(&state, PROVIDER_WHATSAPP, body).await
}

/// Handle Telegram Bot API deliveries
#[instrument(skip(state, secret, body), fields(provider = PROVIDER_TELEGRAM))]
pub async fn handle_telegram_webhook(
    State(state): State<AppState>,
    Path(secret): Path<String>,
    body: Result<Bytes, BytesRejection>,
) -> Result<Response, WebhookHandlerError> {
    let body = read_body(&state, PROVIDER_TELEGRAM, body)?;
    if !state.telegram_verifier.verify(Some(&secret), &body) {
        return Err(reject(
            &state,
            PROVIDER_TELEGRAM,
            WebhookHandlerError::SecretMismatch {
                provider: PROVIDER_TELEGRAM.to_string(),
            },
        ));
    }

    accept_webhook(&state, PROVIDER_TELEGRAM, body).await
}

/// Unwrap the buffered body.
///
/// Over-limit bodies stay `413`; any other read failure, including the
/// body read timeout, is reported as unavailable.
fn read_body(
    state: &AppState,
    provider: &'static str,
    body: Result<Bytes, BytesRejection>,
) -> Result<Bytes, WebhookHandlerError> {
    body.map_err(|rejection| {
        let err = if rejection.status() == StatusCode::PAYLOAD_TOO_LARGE {
            WebhookHandlerError::BodyTooLarge {
                provider: provider.to_string(),
            }
        } else {
            WebhookHandlerError::BodyUnreadable {
                message: rejection.body_text(),
            }
        };
        reject(state, provider, err)
    })
}

fn reject(state: &AppState, provider: &str, err: WebhookHandlerError) -> WebhookHandlerError {
    state
        .metrics
        .record_webhook_request(provider, err.outcome_label());
    err
}

/// Record and enqueue a verified delivery
async fn accept_webhook(
    state: &AppState,
    provider: &'static str,
    body: Bytes,
) -> Result<Response, WebhookHandlerError> {
    let result = record_and_enqueue(state, provider, &body).await;
    let outcome = match &result {
        Ok(_) => "accepted",
        Err(e) => e.outcome_label(),
    };
    state.metrics.record_webhook_request(provider, outcome);
    result?;

    state.metrics.record_body_size(provider, body.len());
    Ok((StatusCode::ACCEPTED, "accepted").into_response())
}

async fn record_and_enqueue(
    state: &AppState,
    provider: &'static str,
    body: &Bytes,
) -> Result<(), WebhookHandlerError> {
    let envelope = WebhookEnvelope::from_utf8(provider, body, true).map_err(|_| {
        WebhookHandlerError::InvalidBody {
            provider: provider.to_string(),
        }
    })?;
    let event_id = envelope.event_id.unwrap_or_default();

    if state.config.webhooks.persist_raw_events_at_ingress {
        state
            .raw_events
            .append(&RawEvent::from_envelope(event_id, &envelope))
            .await?;
    }

    let task = envelope
        .to_task()?
        .with_queue(state.queue_name.clone())
        .with_max_retry(state.config.queue.max_retry);

    let started = Instant::now();
    let task_id = state.queue.enqueue(task).await?;
    state.metrics.record_enqueue(provider, started.elapsed());

    info!(
        %event_id,
        %task_id,
        body_bytes = body.len(),
        "Accepted webhook"
    );
    Ok(())
}

// ============================================================================
// Health and Observability
// ============================================================================

/// Liveness check
async fn handle_health_check() -> Json<HealthResponse> {
    Json(HealthResponse::ok())
}

/// Prometheus metrics endpoint
#[instrument(skip_all)]
async fn metrics_endpoint(State(state): State<AppState>) -> Result<String, StatusCode> {
    state
        .metrics
        .encode()
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}

// ============================================================================
// Admin
// ============================================================================

/// Re-enqueue a stored raw event
#[instrument(skip(state))]
async fn replay_raw_event(
    State(state): State<AppState>,
    Path(event_id): Path<String>,
) -> Result<Response, WebhookHandlerError> {
    if !state.config.admin.enable_replay {
        return Err(WebhookHandlerError::ReplayDisabled);
    }

    let not_found = || WebhookHandlerError::ReplayNotFound {
        event_id: event_id.clone(),
    };
    let id: EventId = event_id.parse().map_err(|_| not_found())?;

    let task_id = state.replayer().replay(&id).await.map_err(|e| match e {
        ReplayError::NotFound { .. } => not_found(),
        ReplayError::Store(e) => WebhookHandlerError::RawEventStoreFailed(e),
        ReplayError::Queue(e) => WebhookHandlerError::EnqueueFailed(e),
    })?;

    let body = ReplayResponse {
        event_id: id.to_string(),
        task_id: task_id.to_string(),
        status: "queued".to_string(),
    };
    Ok((StatusCode::ACCEPTED, Json(body)).into_response())
}

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
