//! WhatsApp Cloud API payloads.
//!
//! Deliveries are accepted and stored as raw events but not yet turned into
//! conversation entries.

use super::{EventNormalizer, NormalizeError, Normalized};
use crate::model::ChannelType;

/// Reason reported for every WhatsApp delivery
pub const WHATSAPP_NOT_IMPLEMENTED: &str = "whatsapp normalization not implemented";

/// No-op normalizer for WhatsApp deliveries
#[derive(Debug, Clone, Default)]
pub struct WhatsAppNormalizer;

impl WhatsAppNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl EventNormalizer for WhatsAppNormalizer {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Whatsapp
    }

    fn normalize(&self, _body: &str) -> Result<Normalized, NormalizeError> {
        Ok(Normalized::ignored(WHATSAPP_NOT_IMPLEMENTED))
    }
}
