use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Maximum allowed length for message content, in characters.
pub const MAX_CONTENT_LENGTH: usize = 255;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Success,
    Failed,
}

impl Status {
    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
        }
    }

    pub fn parse(s: &str) -> Option<Status> {
        match s {
            "PENDING" => Some(Status::Pending),
            "SUCCESS" => Some(Status::Success),
            "FAILED" => Some(Status::Failed),
            _ => None,
        }
    }
}

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum MessageError {
    #[error("recipient phone number is required")]
    EmptyRecipient,
    #[error("message content is required")]
    EmptyContent,
    #[error("message content exceeds {MAX_CONTENT_LENGTH} characters")]
    ContentTooLong,
}

/// An outgoing SMS message. Status only ever moves Pending -> Success or
/// Pending -> Failed; delivered and failed messages are immutable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: Uuid,
    pub to: String,
    pub content: String,
    pub status: Status,
    /// Provider-assigned id, set when the message is delivered.
    pub message_id: String,
    /// Raw provider response body from the last send attempt.
    pub raw_response: String,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Message {
    /// Constructs a new pending message, enforcing the domain rules.
    pub fn new(to: &str, content: &str) -> Result<Self, MessageError> {
        let to = to.trim();
        let content = content.trim();

        if to.is_empty() {
            return Err(MessageError::EmptyRecipient);
        }
        if content.is_empty() {
            return Err(MessageError::EmptyContent);
        }
        if content.chars().count() > MAX_CONTENT_LENGTH {
            return Err(MessageError::ContentTooLong);
        }

        let now = Utc::now();
        Ok(Self {
            id: Uuid::new_v4(),
            to: to.to_string(),
            content: content.to_string(),
            status: Status::Pending,
            message_id: String::new(),
            raw_response: String::new(),
            sent_at: None,
            created_at: now,
            updated_at: now,
        })
    }

    /// Marks the message as delivered and records provider metadata.
    pub fn mark_sent(&mut self, message_id: String, raw_response: String) {
        let now = Utc::now();
        self.status = Status::Success;
        self.message_id = message_id;
        self.raw_response = raw_response;
        self.sent_at = Some(now);
        self.updated_at = now;
    }

    /// Marks the message as failed, keeping whatever the provider returned.
    pub fn mark_failed(&mut self, raw_response: String) {
        self.status = Status::Failed;
        self.raw_response = raw_response;
        self.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_message_is_pending() {
        let msg = Message::new("+905551112233", "hello").unwrap();
        assert_eq!(msg.status, Status::Pending);
        assert!(msg.sent_at.is_none());
        assert!(msg.message_id.is_empty());
    }

    #[test]
    fn test_new_message_trims_fields() {
        let msg = Message::new("  +905551112233 ", "  hello  ").unwrap();
        assert_eq!(msg.to, "+905551112233");
        assert_eq!(msg.content, "hello");
    }

    #[test]
    fn test_new_message_validation() {
        assert_eq!(
            Message::new("", "hello").unwrap_err(),
            MessageError::EmptyRecipient
        );
        assert_eq!(
            Message::new("+905551112233", "   ").unwrap_err(),
            MessageError::EmptyContent
        );
        let long = "x".repeat(MAX_CONTENT_LENGTH + 1);
        assert_eq!(
            Message::new("+905551112233", &long).unwrap_err(),
            MessageError::ContentTooLong
        );
    }

    #[test]
    fn test_content_at_limit_is_accepted() {
        let exact = "x".repeat(MAX_CONTENT_LENGTH);
        assert!(Message::new("+905551112233", &exact).is_ok());
    }

    #[test]
    fn test_mark_sent() {
        let mut msg = Message::new("+905551112233", "hello").unwrap();
        msg.mark_sent("ext-1".into(), r#"{"message":"Accepted"}"#.into());
        assert_eq!(msg.status, Status::Success);
        assert_eq!(msg.message_id, "ext-1");
        assert!(msg.sent_at.is_some());
    }

    #[test]
    fn test_mark_failed_keeps_raw_response() {
        let mut msg = Message::new("+905551112233", "hello").unwrap();
        msg.mark_failed("provider exploded".into());
        assert_eq!(msg.status, Status::Failed);
        assert_eq!(msg.raw_response, "provider exploded");
        assert!(msg.sent_at.is_none());
    }

    #[test]
    fn test_status_round_trip() {
        for s in [Status::Pending, Status::Success, Status::Failed] {
            assert_eq!(Status::parse(s.as_str()), Some(s));
        }
        assert_eq!(Status::parse("SENT"), None);
    }
}
