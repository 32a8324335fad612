//! # Inbox Ingest Core
//!
//! Core logic of the inbound messaging pipeline: webhook verification,
//! provider payload normalization, and idempotent persistence of the
//! canonical workspace / channel / contact / thread / message model.
//!
//! ## Architecture
//!
//! - Business logic depends only on trait abstractions ([`store::ConversationStore`],
//!   [`store::RawEventStore`], [`workspace::WorkspaceResolver`],
//!   [`normalizer::EventNormalizer`])
//! - Storage backends (in-memory, SQLite) are injected at runtime
//! - The [`ingest::IngestionWorker`] plugs into the `queue-runtime` task server
//!
//! ## Usage
//!
//! ```rust
//! use inbox_ingest_core::{EventId, WorkspaceId};
//!
//! let event_id = EventId::new();
//! let workspace_id = WorkspaceId::new();
//! assert_ne!(event_id.to_string(), workspace_id.to_string());
//! ```

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

// Re-export commonly used types
pub use ulid::Ulid;
pub use uuid::Uuid;

// ============================================================================
// Domain Identifier Types
// ============================================================================

/// Unique identifier for an accepted webhook delivery.
///
/// Uses ULID for lexicographic sorting and global uniqueness. The same id
/// travels from ingress through the queue to the raw event store, which is
/// what makes raw event writes idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EventId(Ulid);

impl EventId {
    /// Generate a new unique event ID
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for EventId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EventId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EventId {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let ulid = s.parse::<Ulid>().map_err(|_| ParseError::InvalidFormat {
            expected: "ULID format".to_string(),
            actual: s.to_string(),
        })?;
        Ok(Self(ulid))
    }
}

macro_rules! uuid_identifier {
    ($(#[$meta:meta])* $name:ident, $label:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(Uuid);

        impl $name {
            /// Generate a new random identifier
            pub fn new() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(id: Uuid) -> Self {
                Self(id)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl Default for $name {
            fn default() -> Self {
                Self::new()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let id = s.parse::<Uuid>().map_err(|_| ParseError::InvalidFormat {
                    expected: concat!($label, " UUID").to_string(),
                    actual: s.to_string(),
                })?;
                Ok(Self(id))
            }
        }
    };
}

uuid_identifier!(
    /// Tenant boundary; owns every other conversational entity
    WorkspaceId,
    "workspace"
);
uuid_identifier!(
    /// Provider-bound conduit within a workspace
    ChannelId,
    "channel"
);
uuid_identifier!(
    /// External end-user known within a workspace
    ContactId,
    "contact"
);
uuid_identifier!(
    /// One conversation, scoped by a provider thread reference
    ThreadId,
    "thread"
);
uuid_identifier!(
    /// One inbound or outbound message
    MessageId,
    "message"
);

// ============================================================================
// Time Types
// ============================================================================

/// UTC timestamp, serialized as RFC 3339 with nanosecond precision
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Create timestamp for current moment
    pub fn now() -> Self {
        Self(Utc::now())
    }

    pub fn from_datetime(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Timestamp from whole seconds since the Unix epoch
    pub fn from_unix_seconds(seconds: i64) -> Option<Self> {
        DateTime::<Utc>::from_timestamp(seconds, 0).map(Self)
    }

    /// Parse timestamp from RFC3339 string
    pub fn from_rfc3339(s: &str) -> Result<Self, ParseError> {
        let dt = DateTime::parse_from_rfc3339(s)
            .map_err(|_| ParseError::InvalidFormat {
                expected: "RFC3339 datetime".to_string(),
                actual: s.to_string(),
            })?
            .with_timezone(&Utc);
        Ok(Self(dt))
    }

    /// RFC 3339 in UTC with all nine fractional digits
    pub fn to_rfc3339_nanos(&self) -> String {
        self.0.to_rfc3339_opts(SecondsFormat::Nanos, true)
    }

    /// Get underlying DateTime
    pub fn as_datetime(&self) -> &DateTime<Utc> {
        &self.0
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_rfc3339_nanos())
    }
}

impl Serialize for Timestamp {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_rfc3339_nanos())
    }
}

impl<'de> Deserialize<'de> for Timestamp {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::from_rfc3339(&raw).map_err(serde::de::Error::custom)
    }
}

// ============================================================================
// Error Types
// ============================================================================

/// High-level error categorization for retry and alerting decisions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ErrorCategory {
    /// Temporary failures that should be retried
    Transient,
    /// Permanent failures that won't succeed on retry
    Permanent,
    /// Authentication failures at the ingress boundary
    Security,
}

/// Error type for string parsing failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ParseError {
    #[error("Invalid format: expected {expected}, got '{actual}'")]
    InvalidFormat { expected: String, actual: String },

    #[error("Unknown {kind} '{value}'")]
    UnknownVariant { kind: String, value: String },
}

// ============================================================================
// Module declarations
// ============================================================================

/// Canonical conversational entities
pub mod model;

/// Webhook envelope and signature verification
pub mod webhook;

/// Raw event and conversation persistence
pub mod store;

/// Idempotent get-or-create of channels, contacts and threads
pub mod resolver;

/// Provider payload parsers
pub mod normalizer;

/// Workspace selection strategy
pub mod workspace;

/// In-process notification of thread updates
pub mod activity;

/// Queue task handler tying normalization and persistence together
pub mod ingest;

/// Re-enqueueing of stored raw events
pub mod replay;

#[cfg(test)]
#[path = "lib_tests.rs"]
mod tests;
