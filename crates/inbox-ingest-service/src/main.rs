//! # Inbox Ingest Service
//!
//! Binary entry point for the ingestion pipeline.
//!
//! This executable:
//! - Loads configuration from files and environment
//! - Initializes structured logging
//! - Opens the task queue and the raw event and conversation stores
//! - Runs the webhook ingress, the ingestion workers, or both, depending on
//!   `role`
//!
//! SIGINT or SIGTERM stops intake; in-flight work is given the configured
//! grace period before the process exits.

mod settings;

use anyhow::Context;
use inbox_ingest_api::config::{Backend, LoggingConfig, StorageSettings};
use inbox_ingest_api::{start_server, AppState, ServiceConfig, ServiceError, ServiceMetrics};
use inbox_ingest_core::ingest::IngestionWorker;
use inbox_ingest_core::store::{ConversationStore, MemoryStore, RawEventStore, SqliteStore};
use inbox_ingest_core::webhook::WEBHOOK_TASK_TYPE;
use queue_runtime::{QueueClientFactory, QueueProvider, TaskMux, TaskServer};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[tokio::main]
async fn main() {
    let service_config = match settings::load() {
        Ok(config) => config,
        Err(e) => {
            // Logging is configured from the same file, so report on stderr
            eprintln!("inbox-ingest-service: {}", e);
            std::process::exit(3);
        }
    };

    init_tracing(&service_config.logging);
    info!(role = %service_config.role, "Starting inbox ingest service");

    if let Err(e) = run(service_config).await {
        error!(error = ?e, "Service stopped with an error");

        let exit_code = match e.downcast_ref::<ServiceError>() {
            Some(ServiceError::BindFailed { .. }) => 1,
            Some(ServiceError::ServerFailed { .. }) => 2,
            Some(ServiceError::Configuration(_)) => 3,
            None => 4,
        };
        std::process::exit(exit_code);
    }
}

fn init_tracing(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = &logging.level;
        format!(
            "inbox_ingest_service={level},inbox_ingest_api={level},inbox_ingest_core={level},queue_runtime={level},tower_http=info"
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.json_format {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

async fn run(config: ServiceConfig) -> anyhow::Result<()> {
    let (raw_events, conversations) = open_stores(&config.storage).await?;

    for workspace in &config.workspaces.bootstrap {
        let created = conversations
            .ensure_workspace(workspace)
            .await
            .with_context(|| format!("bootstrapping workspace {}", workspace))?;
        if created {
            info!(workspace_id = %workspace, "Created workspace");
        }
    }

    let queue_config = config.queue.to_queue_config();
    let provider = QueueClientFactory::create_provider(&queue_config)
        .await
        .context("opening task queue")?;
    let queue_name = config.queue.queue_name().map_err(ServiceError::from)?;

    let shutdown = CancellationToken::new();
    tokio::spawn(watch_signals(shutdown.clone()));

    let worker = if config.role.runs_worker() {
        let server = TaskServer::new(
            provider.clone(),
            config.worker.to_server_config(queue_name.clone()),
        )
        .with_shutdown_token(shutdown.clone());

        let ingestion = IngestionWorker::new(
            raw_events.clone(),
            conversations.clone(),
            Arc::new(config.workspaces.resolver()),
        );
        let mux = TaskMux::new().handle(WEBHOOK_TASK_TYPE, Arc::new(ingestion));

        info!(
            concurrency = config.worker.concurrency,
            queue = %queue_name,
            "Starting ingestion workers"
        );
        Some(tokio::spawn(async move { server.run(Arc::new(mux)).await }))
    } else {
        None
    };

    let ingress_result = if config.role.runs_ingress() {
        let state = ingress_state(config, provider, &queue_config, raw_events)?;
        let result = start_server(state, shutdown.clone()).await;
        // Workers stop with the ingress, including when it failed to bind
        shutdown.cancel();
        result
    } else {
        shutdown.cancelled().await;
        Ok(())
    };

    if let Some(handle) = worker {
        match handle.await {
            Ok(stats) => info!(
                completed = stats.completed,
                retried = stats.retried,
                archived = stats.archived,
                aborted = stats.aborted,
                "Ingestion workers stopped"
            ),
            Err(e) => warn!(error = %e, "Worker pool task ended abnormally"),
        }
    }

    ingress_result?;
    info!("Shutdown complete");
    Ok(())
}

fn ingress_state(
    config: ServiceConfig,
    provider: Arc<dyn QueueProvider>,
    queue_config: &queue_runtime::QueueConfig,
    raw_events: Arc<dyn RawEventStore>,
) -> anyhow::Result<AppState> {
    let client = QueueClientFactory::create_client(provider, queue_config);
    let metrics = ServiceMetrics::new().context("registering metrics")?;
    let state = AppState::new(config, client, raw_events, metrics).map_err(ServiceError::from)?;
    Ok(state)
}

async fn open_stores(
    storage: &StorageSettings,
) -> anyhow::Result<(Arc<dyn RawEventStore>, Arc<dyn ConversationStore>)> {
    match storage.backend {
        Backend::Memory => {
            warn!("Using in-memory storage; data is lost on restart");
            let store = Arc::new(MemoryStore::new());
            let raw_events: Arc<dyn RawEventStore> = store.clone();
            let conversations: Arc<dyn ConversationStore> = store;
            Ok((raw_events, conversations))
        }
        Backend::Sqlite => {
            let sqlite_config = storage.to_sqlite_config();
            info!(path = %sqlite_config.path.display(), "Opening SQLite storage");
            let store = Arc::new(
                SqliteStore::open(sqlite_config)
                    .await
                    .context("opening SQLite storage")?,
            );
            let raw_events: Arc<dyn RawEventStore> = store.clone();
            let conversations: Arc<dyn ConversationStore> = store;
            Ok((raw_events, conversations))
        }
    }
}

/// Cancel `token` on SIGINT or SIGTERM
async fn watch_signals(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for SIGINT");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT, shutting down"),
        _ = terminate => info!("Received SIGTERM, shutting down"),
    }
    token.cancel();
}
