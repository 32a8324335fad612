//! # Workspace Resolution
//!
//! Decides which tenant an incoming delivery belongs to. The strategy is
//! injected per deployment; [`ConfiguredWorkspaceResolver`] maps provider
//! tags to workspaces from configuration with an optional default.

use crate::webhook::WebhookEnvelope;
use crate::WorkspaceId;
use async_trait::async_trait;
use std::collections::HashMap;

/// Raised when no workspace can be chosen for a delivery
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("No workspace configured for provider '{provider}'")]
pub struct WorkspaceUnresolved {
    pub provider: String,
}

/// Strategy choosing the workspace for a delivery
#[async_trait]
pub trait WorkspaceResolver: Send + Sync {
    async fn resolve(&self, envelope: &WebhookEnvelope) -> Result<WorkspaceId, WorkspaceUnresolved>;
}

/// Resolves by provider tag, falling back to a default workspace
#[derive(Debug, Clone, Default)]
pub struct ConfiguredWorkspaceResolver {
    default: Option<WorkspaceId>,
    by_provider: HashMap<String, WorkspaceId>,
}

impl ConfiguredWorkspaceResolver {
    pub fn new(default: Option<WorkspaceId>, by_provider: HashMap<String, WorkspaceId>) -> Self {
        Self {
            default,
            by_provider,
        }
    }

    /// Resolver that sends every provider to one workspace
    pub fn single(workspace: WorkspaceId) -> Self {
        Self::new(Some(workspace), HashMap::new())
    }

    pub fn with_provider(mut self, provider: impl Into<String>, workspace: WorkspaceId) -> Self {
        self.by_provider.insert(provider.into(), workspace);
        self
    }

    /// Workspace for a provider tag, if any is configured
    pub fn lookup(&self, provider: &str) -> Option<WorkspaceId> {
        self.by_provider.get(provider).copied().or(self.default)
    }
}

#[async_trait]
impl WorkspaceResolver for ConfiguredWorkspaceResolver {
    async fn resolve(&self, envelope: &WebhookEnvelope) -> Result<WorkspaceId, WorkspaceUnresolved> {
        self.lookup(&envelope.provider)
            .ok_or_else(|| WorkspaceUnresolved {
                provider: envelope.provider.clone(),
            })
    }
}

#[cfg(test)]
#[path = "workspace_tests.rs"]
mod tests;
