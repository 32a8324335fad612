//! # Event Normalizer
//!
//! Provider-specific parsers that turn a raw webhook body into a
//! [`CanonicalMessage`]: the message itself plus the natural keys the
//! resolver needs for channel, contact and thread.
//!
//! Providers are registered by tag in a [`NormalizerRegistry`]; adding a
//! provider means registering another [`EventNormalizer`].

use crate::model::{ChannelType, NewChannel, NewContact, NewMessage};
use crate::webhook::{PROVIDER_TELEGRAM, PROVIDER_WHATSAPP};
use crate::ErrorCategory;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

pub mod telegram;
pub mod whatsapp;

pub use telegram::TelegramNormalizer;
pub use whatsapp::WhatsAppNormalizer;

/// Errors produced while parsing a provider payload.
///
/// Redelivery cannot fix a malformed payload, so all of these are permanent.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum NormalizeError {
    #[error("Payload is not valid JSON: {message}")]
    InvalidJson { message: String },

    #[error("Payload is missing required field '{field}'")]
    MissingField { field: String },

    #[error("Payload field '{field}' is invalid: {message}")]
    InvalidField { field: String, message: String },
}

impl NormalizeError {
    pub fn is_transient(&self) -> bool {
        false
    }

    pub fn error_category(&self) -> ErrorCategory {
        ErrorCategory::Permanent
    }
}

/// A provider message in canonical form, with the keys needed to resolve
/// its channel, contact and thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalMessage {
    pub channel: NewChannel,
    pub contact: NewContact,
    pub channel_thread_ref: String,
    pub message: NewMessage,
}

/// Outcome of normalizing one payload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Normalized {
    Message(CanonicalMessage),
    /// Valid payload that carries nothing to persist
    Ignored { reason: String },
}

impl Normalized {
    pub fn ignored(reason: impl Into<String>) -> Self {
        Self::Ignored {
            reason: reason.into(),
        }
    }
}

/// Parser for one provider's webhook payloads
pub trait EventNormalizer: Send + Sync {
    /// Channel type this provider's messages belong to
    fn channel_type(&self) -> ChannelType;

    /// Parse a raw request body
    fn normalize(&self, body: &str) -> Result<Normalized, NormalizeError>;
}

/// Maps provider tags to their normalizers
#[derive(Clone, Default)]
pub struct NormalizerRegistry {
    normalizers: HashMap<String, Arc<dyn EventNormalizer>>,
}

impl NormalizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with Telegram and WhatsApp under both their wire tags and
    /// their channel type names
    pub fn with_defaults() -> Self {
        let telegram: Arc<dyn EventNormalizer> = Arc::new(TelegramNormalizer::new());
        let whatsapp: Arc<dyn EventNormalizer> = Arc::new(WhatsAppNormalizer::new());

        Self::new()
            .register(PROVIDER_TELEGRAM, telegram.clone())
            .register(ChannelType::Telegram.as_str(), telegram)
            .register(PROVIDER_WHATSAPP, whatsapp.clone())
            .register(ChannelType::Whatsapp.as_str(), whatsapp)
    }

    /// Register a normalizer for a provider tag, replacing any previous one
    pub fn register(mut self, provider: impl Into<String>, normalizer: Arc<dyn EventNormalizer>) -> Self {
        self.normalizers.insert(provider.into(), normalizer);
        self
    }

    pub fn get(&self, provider: &str) -> Option<Arc<dyn EventNormalizer>> {
        self.normalizers.get(provider).cloned()
    }

    /// Registered provider tags, sorted
    pub fn providers(&self) -> Vec<&str> {
        let mut tags: Vec<&str> = self.normalizers.keys().map(String::as_str).collect();
        tags.sort_unstable();
        tags
    }
}

impl fmt::Debug for NormalizerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NormalizerRegistry")
            .field("providers", &self.providers())
            .finish()
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
