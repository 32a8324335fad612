//! Telegram Bot API updates.
//!
//! Only `message` updates produce a conversation entry. Edited messages,
//! callback queries and channel posts are accepted and ignored.

use super::{CanonicalMessage, EventNormalizer, NormalizeError, Normalized};
use crate::model::{ChannelType, Direction, MessageType, NewChannel, NewContact, NewMessage};
use crate::Timestamp;
use serde::de::IgnoredAny;
use serde::Deserialize;
use tracing::debug;

#[derive(Debug, Deserialize)]
struct Update {
    #[serde(default)]
    update_id: Option<i64>,
    #[serde(default)]
    message: Option<UpdateMessage>,
}

#[derive(Debug, Deserialize)]
struct UpdateMessage {
    #[serde(default)]
    message_id: Option<i64>,
    #[serde(default)]
    from: Option<User>,
    #[serde(default)]
    chat: Option<Chat>,
    #[serde(default)]
    text: Option<String>,
    #[serde(default)]
    caption: Option<String>,
    #[serde(default)]
    date: Option<i64>,
    #[serde(default)]
    message_thread_id: Option<i64>,
    #[serde(default)]
    photo: Option<IgnoredAny>,
    #[serde(default)]
    document: Option<IgnoredAny>,
    #[serde(default)]
    sticker: Option<IgnoredAny>,
    #[serde(default)]
    voice: Option<IgnoredAny>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: i64,
    #[serde(default)]
    first_name: String,
    #[serde(default)]
    username: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Chat {
    id: i64,
}

/// Normalizer for Telegram webhook updates
#[derive(Debug, Clone, Default)]
pub struct TelegramNormalizer;

impl TelegramNormalizer {
    pub fn new() -> Self {
        Self
    }
}

impl EventNormalizer for TelegramNormalizer {
    fn channel_type(&self) -> ChannelType {
        ChannelType::Telegram
    }

    fn normalize(&self, body: &str) -> Result<Normalized, NormalizeError> {
        let update: Update =
            serde_json::from_str(body).map_err(|e| NormalizeError::InvalidJson {
                message: e.to_string(),
            })?;

        let Some(message) = update.message else {
            debug!(update_id = ?update.update_id, "Telegram update carries no message");
            return Ok(Normalized::ignored("telegram update without message"));
        };

        let from = message.from.as_ref().ok_or_else(|| missing("message.from"))?;
        let chat = message.chat.as_ref().ok_or_else(|| missing("message.chat"))?;
        let message_id = message
            .message_id
            .ok_or_else(|| missing("message.message_id"))?;

        let external_ts = match message.date {
            Some(date) => Some(Timestamp::from_unix_seconds(date).ok_or_else(|| {
                NormalizeError::InvalidField {
                    field: "message.date".to_string(),
                    message: format!("{} is not a valid Unix timestamp", date),
                }
            })?),
            None => None,
        };

        let (message_type, content) = classify(&message);

        Ok(Normalized::Message(CanonicalMessage {
            channel: NewChannel {
                channel_type: ChannelType::Telegram,
                display_name: format!("TG-{}", chat.id),
            },
            contact: NewContact {
                channel_type: ChannelType::Telegram,
                external_user_id: from.id.to_string(),
                display_name: contact_display_name(from),
            },
            channel_thread_ref: thread_ref(chat.id, message.message_thread_id),
            message: NewMessage {
                direction: Direction::Inbound,
                message_type,
                content,
                external_message_id: format!("tg_{}", message_id),
                external_ts,
            },
        }))
    }
}

fn missing(field: &str) -> NormalizeError {
    NormalizeError::MissingField {
        field: field.to_string(),
    }
}

/// `"{chat}"`, or `"{chat}:{topic}"` for forum topics
fn thread_ref(chat_id: i64, topic_id: Option<i64>) -> String {
    match topic_id {
        Some(topic) => format!("{}:{}", chat_id, topic),
        None => chat_id.to_string(),
    }
}

fn contact_display_name(user: &User) -> String {
    match user.username.as_deref().filter(|u| !u.is_empty()) {
        Some(username) => format!("{} (@{})", user.first_name, username),
        None if user.first_name.is_empty() => user.id.to_string(),
        None => user.first_name.clone(),
    }
}

fn classify(message: &UpdateMessage) -> (MessageType, String) {
    if let Some(text) = &message.text {
        return (MessageType::Text, text.clone());
    }

    let caption = message.caption.clone().unwrap_or_default();
    if message.photo.is_some() {
        (MessageType::Photo, caption)
    } else if message.document.is_some() {
        (MessageType::Document, caption)
    } else if message.sticker.is_some() {
        (MessageType::Sticker, caption)
    } else if message.voice.is_some() {
        (MessageType::Voice, caption)
    } else {
        (MessageType::Unsupported, String::new())
    }
}

#[cfg(test)]
#[path = "telegram_tests.rs"]
mod tests;
