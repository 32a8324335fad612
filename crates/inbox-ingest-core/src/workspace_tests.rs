//! Tests for configured workspace resolution.

use super::*;

fn envelope(provider: &str) -> WebhookEnvelope {
    WebhookEnvelope::new(provider, "{}", true)
}

/// Verify that a provider mapping takes precedence over the default.
#[tokio::test]
async fn test_provider_mapping_wins() {
    let default = WorkspaceId::new();
    let telegram = WorkspaceId::new();
    let resolver = ConfiguredWorkspaceResolver::single(default).with_provider("tg", telegram);

    assert_eq!(resolver.resolve(&envelope("tg")).await.unwrap(), telegram);
    assert_eq!(resolver.resolve(&envelope("wa")).await.unwrap(), default);
}

/// Verify that nothing configured is an error naming the provider.
#[tokio::test]
async fn test_unresolved_without_default() {
    let resolver = ConfiguredWorkspaceResolver::default().with_provider("wa", WorkspaceId::new());

    let err = resolver.resolve(&envelope("tg")).await.unwrap_err();

    assert_eq!(
        err,
        WorkspaceUnresolved {
            provider: "tg".to_string()
        }
    );
}
