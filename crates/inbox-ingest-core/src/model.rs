//! Canonical conversational entities shared by every provider.
//!
//! Each entity is identified by a surrogate id but resolved through a
//! natural key:
//!
//! | Entity  | Natural key                                  |
//! |---------|----------------------------------------------|
//! | Channel | `(workspace_id, channel_type)`               |
//! | Contact | `(workspace_id, external_user_id)`           |
//! | Thread  | `(workspace_id, channel_thread_ref)`         |
//! | Message | `(thread_id, external_message_id)`           |

use crate::{ChannelId, ContactId, MessageId, ParseError, ThreadId, Timestamp, WorkspaceId};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

macro_rules! string_enum {
    ($name:ident, $kind:literal, { $($variant:ident => $text:literal),+ $(,)? }) => {
        impl $name {
            pub fn as_str(&self) -> &'static str {
                match self {
                    $(Self::$variant => $text,)+
                }
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $name {
            type Err = ParseError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($text => Ok(Self::$variant),)+
                    other => Err(ParseError::UnknownVariant {
                        kind: $kind.to_string(),
                        value: other.to_string(),
                    }),
                }
            }
        }
    };
}

// ============================================================================
// Enumerations
// ============================================================================

/// Messaging provider a channel is bound to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelType {
    Telegram,
    Whatsapp,
}

string_enum!(ChannelType, "channel type", {
    Telegram => "telegram",
    Whatsapp => "whatsapp",
});

/// Lifecycle state of a thread
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreadStatus {
    Open,
    Closed,
}

string_enum!(ThreadStatus, "thread status", {
    Open => "open",
    Closed => "closed",
});

/// Whether a message came from the contact or was sent to them
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

string_enum!(Direction, "direction", {
    Inbound => "inbound",
    Outbound => "outbound",
});

/// Kind of content a message carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageType {
    Text,
    Photo,
    Document,
    Sticker,
    Voice,
    Unsupported,
}

string_enum!(MessageType, "message type", {
    Text => "text",
    Photo => "photo",
    Document => "document",
    Sticker => "sticker",
    Voice => "voice",
    Unsupported => "unsupported",
});

// ============================================================================
// Stored entities
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Channel {
    pub id: ChannelId,
    pub workspace_id: WorkspaceId,
    pub channel_type: ChannelType,
    pub display_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Contact {
    pub id: ContactId,
    pub workspace_id: WorkspaceId,
    /// Provider namespace of `external_user_id`
    pub channel_type: ChannelType,
    pub display_name: String,
    pub external_user_id: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thread {
    pub id: ThreadId,
    pub workspace_id: WorkspaceId,
    pub channel_id: ChannelId,
    pub contact_id: ContactId,
    pub channel_thread_ref: String,
    pub status: ThreadStatus,
    pub updated_at: Timestamp,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: MessageId,
    pub thread_id: ThreadId,
    pub direction: Direction,
    pub message_type: MessageType,
    pub content: String,
    pub external_message_id: String,
    pub external_ts: Option<Timestamp>,
    pub created_at: Timestamp,
}

// ============================================================================
// Creation inputs
// ============================================================================

/// Values used when a channel has to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChannel {
    pub channel_type: ChannelType,
    pub display_name: String,
}

/// Values used when a contact has to be created.
///
/// Contacts are keyed by `(channel_type, external_user_id)` within a
/// workspace; the same user id on two providers is two contacts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewContact {
    pub channel_type: ChannelType,
    pub external_user_id: String,
    pub display_name: String,
}

/// Values used when a thread has to be created
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewThread {
    pub channel_id: ChannelId,
    pub contact_id: ContactId,
    pub channel_thread_ref: String,
}

/// Message content as produced by a normalizer, before it is tied to a thread
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewMessage {
    pub direction: Direction,
    pub message_type: MessageType,
    pub content: String,
    pub external_message_id: String,
    pub external_ts: Option<Timestamp>,
}

#[cfg(test)]
#[path = "model_tests.rs"]
mod tests;
