//! Configuration types for the ingestion service

use crate::errors::ConfigError;
use inbox_ingest_core::store::sqlite::SqliteStoreConfig;
use inbox_ingest_core::workspace::ConfiguredWorkspaceResolver;
use inbox_ingest_core::WorkspaceId;
use queue_runtime::{
    InMemoryConfig, ProviderConfig, QueueConfig, QueueName, RetryPolicy, ServerConfig as TaskServerConfig,
    SqliteConfig,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

/// Longest retry delay the worker accepts, one day
pub const MAX_RETRY_DELAY_SECONDS: u64 = 86_400;

/// Service configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct ServiceConfig {
    /// Which parts of the pipeline this process runs
    pub role: ServiceRole,

    /// HTTP server settings
    pub server: ServerConfig,

    /// Webhook verification and ingress settings
    pub webhooks: WebhookConfig,

    /// Task queue settings
    pub queue: QueueSettings,

    /// Worker pool settings
    pub worker: WorkerSettings,

    /// Raw event and conversation storage
    pub storage: StorageSettings,

    /// Tenant resolution
    pub workspaces: WorkspaceSettings,

    /// Logging configuration
    pub logging: LoggingConfig,

    /// Administrative endpoints
    pub admin: AdminConfig,
}

impl ServiceConfig {
    /// Reject settings the service cannot run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(invalid("server.port must not be 0"));
        }
        if self.worker.concurrency == 0 {
            return Err(invalid("worker.concurrency must be at least 1"));
        }
        if self.worker.retry_base_delay_seconds == 0 {
            return Err(invalid("worker.retry_base_delay_seconds must be at least 1"));
        }
        if self.worker.retry_max_delay_seconds < self.worker.retry_base_delay_seconds {
            return Err(invalid(
                "worker.retry_max_delay_seconds must not be below worker.retry_base_delay_seconds",
            ));
        }
        if self.worker.retry_max_delay_seconds > MAX_RETRY_DELAY_SECONDS {
            return Err(invalid(format!(
                "worker.retry_max_delay_seconds must not exceed {}",
                MAX_RETRY_DELAY_SECONDS
            )));
        }
        self.queue.queue_name()?;
        if self.queue.backend == Backend::Memory && self.role != ServiceRole::All {
            return Err(invalid(format!(
                "queue.backend 'memory' cannot be shared between processes; role '{}' requires 'sqlite'",
                self.role
            )));
        }
        if self.storage.backend == Backend::Memory && self.role != ServiceRole::All {
            return Err(invalid(format!(
                "storage.backend 'memory' is private to one process; role '{}' requires 'sqlite'",
                self.role
            )));
        }
        Ok(())
    }

    /// Apply the deployment variables older installations set:
    /// `WA_APP_SECRET`, `TG_WEBHOOK_SECRET` and `WEBHOOKS_ADDRESS`.
    pub fn apply_legacy_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(secret) = lookup("WA_APP_SECRET").filter(|v| !v.is_empty()) {
            self.webhooks.whatsapp_app_secret = secret;
        }
        if let Some(secret) = lookup("TG_WEBHOOK_SECRET").filter(|v| !v.is_empty()) {
            self.webhooks.telegram_webhook_secret = secret;
        }
        if let Some(address) = lookup("WEBHOOKS_ADDRESS").filter(|v| !v.is_empty()) {
            let (host, port) = parse_address(&address)?;
            if let Some(host) = host {
                self.server.host = host;
            }
            self.server.port = port;
        }
        Ok(())
    }
}

fn invalid(message: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        message: message.into(),
    }
}

/// Split `host:port` or `:port`
fn parse_address(address: &str) -> Result<(Option<String>, u16), ConfigError> {
    let (host, port) = address
        .rsplit_once(':')
        .ok_or_else(|| invalid(format!("address '{}' must be host:port or :port", address)))?;
    let port = port
        .parse::<u16>()
        .map_err(|_| invalid(format!("address '{}' has an invalid port", address)))?;
    let host = (!host.is_empty()).then(|| host.to_string());
    Ok((host, port))
}

/// Pipeline parts run by this process
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRole {
    /// Ingress and worker in one process
    #[default]
    All,
    Ingress,
    Worker,
}

impl ServiceRole {
    pub fn runs_ingress(&self) -> bool {
        matches!(self, Self::All | Self::Ingress)
    }

    pub fn runs_worker(&self) -> bool {
        matches!(self, Self::All | Self::Worker)
    }
}

impl fmt::Display for ServiceRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::All => "all",
            Self::Ingress => "ingress",
            Self::Worker => "worker",
        };
        f.write_str(name)
    }
}

/// Storage backend selection shared by queue and stores
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Backend {
    #[default]
    Memory,
    Sqlite,
}

/// HTTP server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Host to bind to
    pub host: String,

    /// Port to listen on
    pub port: u16,

    /// Time allowed for a client to send the request body
    pub read_timeout_seconds: u64,

    /// Request timeout in seconds
    pub request_timeout_seconds: u64,

    /// Graceful shutdown timeout in seconds
    pub shutdown_timeout_seconds: u64,

    /// Maximum request size in bytes
    pub max_body_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 9090,
            read_timeout_seconds: 15,
            request_timeout_seconds: 30,
            shutdown_timeout_seconds: 10,
            max_body_size: 1024 * 1024, // 1MiB
        }
    }
}

impl ServerConfig {
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Webhook ingress configuration
#[derive(Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WebhookConfig {
    /// Meta app secret for `X-Hub-Signature-256`; empty rejects every request
    pub whatsapp_app_secret: String,

    /// Secret embedded in the Telegram webhook path; empty accepts any
    pub telegram_webhook_secret: String,

    /// Write the raw event before enqueueing
    pub persist_raw_events_at_ingress: bool,
}

impl Default for WebhookConfig {
    fn default() -> Self {
        Self {
            whatsapp_app_secret: String::new(),
            telegram_webhook_secret: String::new(),
            persist_raw_events_at_ingress: true,
        }
    }
}

impl fmt::Debug for WebhookConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let redact = |s: &str| if s.is_empty() { "<unset>" } else { "<redacted>" };
        f.debug_struct("WebhookConfig")
            .field("whatsapp_app_secret", &redact(&self.whatsapp_app_secret))
            .field("telegram_webhook_secret", &redact(&self.telegram_webhook_secret))
            .field(
                "persist_raw_events_at_ingress",
                &self.persist_raw_events_at_ingress,
            )
            .finish()
    }
}

/// Task queue configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueSettings {
    pub backend: Backend,
    pub sqlite_path: PathBuf,
    pub queue_name: String,
    pub enqueue_timeout_ms: u64,
    /// Retries before a failing task is archived
    pub max_retry: u32,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            sqlite_path: PathBuf::from("data/queue.db"),
            queue_name: QueueName::DEFAULT.to_string(),
            enqueue_timeout_ms: 5_000,
            max_retry: queue_runtime::DEFAULT_MAX_RETRY,
        }
    }
}

impl QueueSettings {
    pub fn queue_name(&self) -> Result<QueueName, ConfigError> {
        QueueName::new(self.queue_name.clone())
            .map_err(|e| invalid(format!("queue.queue_name: {}", e)))
    }

    pub fn to_queue_config(&self) -> QueueConfig {
        let provider = match self.backend {
            Backend::Memory => ProviderConfig::InMemory(InMemoryConfig::default()),
            Backend::Sqlite => ProviderConfig::Sqlite(SqliteConfig {
                path: self.sqlite_path.clone(),
                ..SqliteConfig::default()
            }),
        };
        QueueConfig {
            provider,
            enqueue_timeout_ms: self.enqueue_timeout_ms,
        }
    }
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerSettings {
    pub concurrency: usize,
    pub poll_interval_ms: u64,
    pub lease_timeout_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub retry_base_delay_seconds: u64,
    pub retry_max_delay_seconds: u64,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            concurrency: 10,
            poll_interval_ms: 500,
            lease_timeout_seconds: 300,
            shutdown_grace_seconds: 10,
            retry_base_delay_seconds: 2,
            retry_max_delay_seconds: 300,
        }
    }
}

impl WorkerSettings {
    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(
            Duration::from_secs(self.retry_base_delay_seconds),
            Duration::from_secs(self.retry_max_delay_seconds),
            2.0,
        )
    }

    pub fn to_server_config(&self, queue: QueueName) -> TaskServerConfig {
        TaskServerConfig {
            concurrency: self.concurrency,
            queue,
            poll_interval: Duration::from_millis(self.poll_interval_ms),
            lease_duration: Duration::from_secs(self.lease_timeout_seconds),
            shutdown_grace: Duration::from_secs(self.shutdown_grace_seconds),
            retry_policy: self.retry_policy(),
        }
    }
}

/// Raw event and conversation storage configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageSettings {
    pub backend: Backend,
    pub sqlite_path: PathBuf,
    pub operation_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: Backend::Memory,
            sqlite_path: PathBuf::from("data/inbox.db"),
            operation_timeout_ms: 5_000,
        }
    }
}

impl StorageSettings {
    pub fn to_sqlite_config(&self) -> SqliteStoreConfig {
        SqliteStoreConfig {
            path: self.sqlite_path.clone(),
            operation_timeout_ms: self.operation_timeout_ms,
            ..SqliteStoreConfig::default()
        }
    }
}

/// Workspace resolution configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct WorkspaceSettings {
    /// Workspace for providers without an explicit mapping
    pub default: Option<WorkspaceId>,

    /// Provider tag to workspace
    pub by_provider: HashMap<String, WorkspaceId>,

    /// Workspaces created at startup when missing
    pub bootstrap: Vec<WorkspaceId>,
}

impl WorkspaceSettings {
    pub fn resolver(&self) -> ConfiguredWorkspaceResolver {
        ConfiguredWorkspaceResolver::new(self.default, self.by_provider.clone())
    }
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Logging level
    pub level: String,

    /// Enable JSON structured logging
    pub json_format: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json_format: false,
        }
    }
}

/// Administrative endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AdminConfig {
    /// Expose `POST /admin/raw-events/{event_id}/replay`
    pub enable_replay: bool,
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod tests;
