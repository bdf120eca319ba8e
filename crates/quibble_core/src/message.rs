use crate::error::ValidationError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

/// Upper bound on message content, counted in Unicode scalar values.
pub const MAX_CONTENT_CHARS: usize = 2000;

/// Raw message as delivered by a platform listener, before validation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InboundMessage {
    pub content: String,
    pub user_id: String,
    pub user_name: String,
    #[serde(default)]
    pub mentions: BTreeSet<String>,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
}

impl InboundMessage {
    pub fn new(user_id: &str, user_name: &str, content: &str) -> Self {
        Self {
            content: content.to_string(),
            user_id: user_id.to_string(),
            user_name: user_name.to_string(),
            mentions: BTreeSet::new(),
            timestamp: Utc::now(),
        }
    }
}

/// A validated message. Fields are read-only once constructed.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Message {
    content: String,
    user_id: String,
    user_name: String,
    mentions: BTreeSet<String>,
    timestamp: DateTime<Utc>,
}

impl Message {
    pub fn content(&self) -> &str {
        &self.content
    }

    pub fn user_id(&self) -> &str {
        &self.user_id
    }

    /// Display name; falls back to the user id when the platform sent none.
    pub fn user_name(&self) -> &str {
        if self.user_name.trim().is_empty() {
            &self.user_id
        } else {
            &self.user_name
        }
    }

    pub fn mentions(&self) -> &BTreeSet<String> {
        &self.mentions
    }

    pub fn timestamp(&self) -> DateTime<Utc> {
        self.timestamp
    }
}

impl TryFrom<InboundMessage> for Message {
    type Error = ValidationError;

    fn try_from(raw: InboundMessage) -> Result<Self, Self::Error> {
        if raw.user_id.trim().is_empty() {
            return Err(ValidationError::MissingUserId);
        }
        if raw.content.trim().is_empty() {
            return Err(ValidationError::EmptyContent);
        }
        let len = raw.content.chars().count();
        if len > MAX_CONTENT_CHARS {
            return Err(ValidationError::ContentTooLong {
                len,
                max: MAX_CONTENT_CHARS,
            });
        }

        Ok(Self {
            content: raw.content,
            user_id: raw.user_id,
            user_name: raw.user_name,
            mentions: raw.mentions,
            timestamp: raw.timestamp,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_exactly_max_length_is_accepted() {
        let raw = InboundMessage::new("u1", "Ann", &"a".repeat(MAX_CONTENT_CHARS));
        assert!(Message::try_from(raw).is_ok());
    }

    #[test]
    fn test_one_over_max_length_is_rejected() {
        let raw = InboundMessage::new("u1", "Ann", &"a".repeat(MAX_CONTENT_CHARS + 1));
        assert_eq!(
            Message::try_from(raw).unwrap_err(),
            ValidationError::ContentTooLong {
                len: MAX_CONTENT_CHARS + 1,
                max: MAX_CONTENT_CHARS
            }
        );
    }

    #[test]
    fn test_length_counts_chars_not_bytes() {
        // 2000 three-byte characters are still 2000 characters
        let raw = InboundMessage::new("u1", "Ann", &"好".repeat(MAX_CONTENT_CHARS));
        assert!(Message::try_from(raw).is_ok());
    }

    #[test]
    fn test_empty_and_blank_content_rejected() {
        let raw = InboundMessage::new("u1", "Ann", "");
        assert_eq!(
            Message::try_from(raw).unwrap_err(),
            ValidationError::EmptyContent
        );
        let raw = InboundMessage::new("u1", "Ann", "   \n\t");
        assert_eq!(
            Message::try_from(raw).unwrap_err(),
            ValidationError::EmptyContent
        );
    }

    #[test]
    fn test_missing_user_id_rejected() {
        let raw = InboundMessage::new(" ", "Ann", "hello");
        assert_eq!(
            Message::try_from(raw).unwrap_err(),
            ValidationError::MissingUserId
        );
    }

    #[test]
    fn test_user_name_falls_back_to_id() {
        let msg = Message::try_from(InboundMessage::new("u1", "", "hi")).unwrap();
        assert_eq!(msg.user_name(), "u1");
    }

    #[test]
    fn test_inbound_deserializes_with_defaults() {
        let raw: InboundMessage =
            serde_json::from_str(r#"{"content":"hi","user_id":"42","user_name":"Zed"}"#).unwrap();
        assert!(raw.mentions.is_empty());
        let msg = Message::try_from(raw).unwrap();
        assert_eq!(msg.user_id(), "42");
    }
}
