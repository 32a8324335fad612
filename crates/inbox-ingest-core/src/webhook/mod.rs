//! # Webhook Envelope
//!
//! What the ingress hands to the queue for every accepted delivery.
//!
//! The envelope is the payload of a [`WEBHOOK_TASK_TYPE`] task:
//!
//! ```json
//! {
//!   "event_id": "01HZX...",
//!   "provider": "tg",
//!   "body": "{\"update_id\": 1, ...}",
//!   "received": "2024-05-01T10:20:30.123456789Z",
//!   "signature_valid": true
//! }
//! ```
//!
//! `body` is the exact request body as text so that normalization and
//! replay see the same bytes the provider signed.

use crate::{EventId, Timestamp};
use bytes::Bytes;
use queue_runtime::{QueueError, SerializationError, Task};
use serde::{Deserialize, Serialize};

pub mod signature;

pub use signature::{
    verify_hub_signature, verify_path_secret, HubSignatureVerifier, PathSecretVerifier,
    SignatureVerifier, VerificationScheme,
};

/// Queue task type carrying a [`WebhookEnvelope`]
pub const WEBHOOK_TASK_TYPE: &str = "webhook:incoming";

/// Provider tag used on the wire for Telegram deliveries
pub const PROVIDER_TELEGRAM: &str = "tg";

/// Provider tag used on the wire for WhatsApp deliveries
pub const PROVIDER_WHATSAPP: &str = "wa";

/// One accepted webhook delivery
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WebhookEnvelope {
    /// Absent in envelopes from producers that predate event ids
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub event_id: Option<EventId>,
    pub provider: String,
    pub body: String,
    pub received: Timestamp,
    pub signature_valid: bool,
}

impl WebhookEnvelope {
    /// Build an envelope for a freshly received request
    pub fn new(provider: impl Into<String>, body: impl Into<String>, signature_valid: bool) -> Self {
        Self {
            event_id: Some(EventId::new()),
            provider: provider.into(),
            body: body.into(),
            received: Timestamp::now(),
            signature_valid,
        }
    }

    /// Build an envelope from a raw request body.
    ///
    /// The body is kept byte for byte, so one that is not UTF-8 is refused
    /// rather than altered.
    pub fn from_utf8(
        provider: impl Into<String>,
        body: &[u8],
        signature_valid: bool,
    ) -> Result<Self, std::str::Utf8Error> {
        let body = std::str::from_utf8(body)?;
        Ok(Self::new(provider, body, signature_valid))
    }

    /// Encode as a queue task
    pub fn to_task(&self) -> Result<Task, QueueError> {
        Task::from_json(WEBHOOK_TASK_TYPE, self)
    }

    /// Decode from a queue task payload
    pub fn from_payload(payload: &Bytes) -> Result<Self, SerializationError> {
        serde_json::from_slice(payload).map_err(SerializationError::JsonError)
    }
}

#[cfg(test)]
#[path = "mod_tests.rs"]
mod tests;
