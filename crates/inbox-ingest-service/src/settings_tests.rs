//! Tests for layered configuration loading.

use super::*;
use inbox_ingest_api::config::{Backend, ServiceRole};
use serial_test::serial;
use std::io::Write;

fn no_legacy(_: &str) -> Option<String> {
    None
}

fn yaml_file(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file
}

/// Verify that an explicit file overrides defaults and keeps the rest.
#[test]
#[serial]
fn test_explicit_file_is_applied() {
    let file = yaml_file(
        r#"
role: worker
queue:
  backend: sqlite
  sqlite_path: /var/lib/inbox/queue.db
storage:
  backend: sqlite
worker:
  concurrency: 4
  retry_max_delay_seconds: 120
"#,
    );

    let config = load_from(file.path().to_str(), no_legacy).unwrap();

    assert_eq!(config.role, ServiceRole::Worker);
    assert_eq!(config.queue.backend, Backend::Sqlite);
    assert_eq!(config.worker.concurrency, 4);
    assert_eq!(config.worker.retry_max_delay_seconds, 120);
    assert_eq!(config.worker.retry_base_delay_seconds, 2);
    assert_eq!(config.server.port, 9090);
}

/// Verify that a missing explicit file is an error.
#[test]
#[serial]
fn test_missing_explicit_file_fails() {
    let result = load_from(Some("/nonexistent/inbox-ingest/service.yaml"), no_legacy);
    assert!(matches!(result, Err(SettingsError::Source(_))));
}

/// Verify that prefixed environment variables override file values.
#[test]
#[serial]
fn test_environment_overrides_file() {
    let file = yaml_file("server:\n  port: 8000\n");
    std::env::set_var("INBOX__SERVER__PORT", "8100");

    let result = load_from(file.path().to_str(), no_legacy);
    std::env::remove_var("INBOX__SERVER__PORT");

    assert_eq!(result.unwrap().server.port, 8100);
}

/// Verify that legacy variables are applied after the structured sources.
#[test]
#[serial]
fn test_legacy_variables_are_applied() {
    let config = load_from(None, |key| match key {
        "TG_WEBHOOK_SECRET" => Some("from-env".to_string()),
        "WEBHOOKS_ADDRESS" => Some(":9191".to_string()),
        _ => None,
    })
    .unwrap();

    assert_eq!(config.webhooks.telegram_webhook_secret, "from-env");
    assert_eq!(config.server.port, 9191);
}

/// Verify that invalid combinations are rejected after loading.
#[test]
#[serial]
fn test_invalid_configuration_is_rejected() {
    let file = yaml_file("role: ingress\nqueue:\n  backend: memory\n");

    let result = load_from(file.path().to_str(), no_legacy);

    assert!(matches!(result, Err(SettingsError::Invalid(_))));
}
