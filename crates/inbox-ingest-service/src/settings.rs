//! Layered configuration loading.
//!
//! Sources, later ones overriding earlier ones:
//!
//! 1. `/etc/inbox-ingest/service.yaml`
//! 2. `./config/service.yaml`
//! 3. the file named by `INBOX_CONFIG_FILE` (must exist when set)
//! 4. environment variables prefixed `INBOX__`, e.g. `INBOX__SERVER__PORT=9090`
//! 5. the legacy variables `WA_APP_SECRET`, `TG_WEBHOOK_SECRET` and
//!    `WEBHOOKS_ADDRESS`
//!
//! Every field has a default, so a host with no files and no variables still
//! yields a runnable single-process configuration.

use inbox_ingest_api::{ConfigError, ServiceConfig};

/// Variable naming an operator-supplied configuration file
pub const CONFIG_FILE_ENV: &str = "INBOX_CONFIG_FILE";

/// Prefix for structured environment overrides
pub const ENV_PREFIX: &str = "INBOX";

const SYSTEM_CONFIG: &str = "/etc/inbox-ingest/service";
const LOCAL_CONFIG: &str = "config/service";

/// Errors from loading configuration
#[derive(Debug, thiserror::Error)]
pub enum SettingsError {
    #[error("Failed to read configuration: {0}")]
    Source(#[from] config::ConfigError),

    #[error(transparent)]
    Invalid(#[from] ConfigError),
}

/// Load configuration from the process environment
pub fn load() -> Result<ServiceConfig, SettingsError> {
    let explicit = std::env::var(CONFIG_FILE_ENV)
        .ok()
        .filter(|p| !p.is_empty());
    load_from(explicit.as_deref(), |key| std::env::var(key).ok())
}

/// Load configuration with an optional explicit file and a variable lookup
/// for the legacy settings.
pub fn load_from<F>(explicit_path: Option<&str>, legacy_env: F) -> Result<ServiceConfig, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let mut builder = config::Config::builder()
        .add_source(
            config::File::with_name(SYSTEM_CONFIG)
                .required(false)
                .format(config::FileFormat::Yaml),
        )
        .add_source(
            config::File::with_name(LOCAL_CONFIG)
                .required(false)
                .format(config::FileFormat::Yaml),
        );

    if let Some(path) = explicit_path {
        builder = builder.add_source(
            config::File::with_name(path)
                .required(true)
                .format(config::FileFormat::Yaml),
        );
    }

    let mut service_config: ServiceConfig = builder
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?
        .try_deserialize()?;

    service_config.apply_legacy_env(legacy_env)?;
    service_config.validate()?;
    Ok(service_config)
}

#[cfg(test)]
#[path = "settings_tests.rs"]
mod tests;
