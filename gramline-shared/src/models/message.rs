use serde::{Deserialize, Serialize};
use std::fmt::{Display, Formatter, Result as FmtResult};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// Who authored a message relative to the workspace.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum MessageDirection {
    /// Authored by the external counterpart.
    Inbound,
    /// Authored by the workspace (sent from the dashboard or echoed by the
    /// platform).
    Outbound,
}

impl MessageDirection {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

impl TryFrom<&str> for MessageDirection {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        match value {
            "inbound" => Ok(Self::Inbound),
            "outbound" => Ok(Self::Outbound),
            _ => Err("invalid message direction"),
        }
    }
}

/// Confirmation state of a message as seen by a client.
///
/// `Pending` exists only client-side: a locally-synthesized placeholder shown
/// before the platform confirms the send. The server persists messages in
/// `Confirmed` state exclusively.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryState {
    /// Awaiting confirmation from the platform.
    Pending,
    /// Confirmed by the platform; terminal.
    Confirmed,
}

/// Normalized message content.
///
/// Webhook attachments arrive in several shapes; ingestion normalizes all of
/// them into this closed union before anything is persisted or broadcast.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MessageContent {
    /// Plain text.
    Text {
        /// The message body.
        body: String,
    },
    /// An image attachment.
    Image {
        /// Media URL as issued by the platform.
        url: String,
    },
    /// A video attachment.
    Video {
        /// Media URL as issued by the platform.
        url: String,
    },
    /// An audio clip.
    Audio {
        /// Media URL as issued by the platform.
        url: String,
    },
    /// Any other file attachment.
    File {
        /// Media URL as issued by the platform.
        url: String,
    },
}

impl MessageContent {
    /// Short preview text used for conversation list rows when the message
    /// carries no body of its own.
    #[must_use]
    pub fn preview(&self) -> String {
        match self {
            Self::Text { body } => body.clone(),
            Self::Image { .. } => "\u{1f4f7} Photo".to_string(),
            Self::Video { .. } => "\u{1f3a5} Video".to_string(),
            Self::Audio { .. } => "\u{1f3a4} Audio".to_string(),
            Self::File { .. } => "\u{1f4ce} Attachment".to_string(),
        }
    }

    /// Media URL for attachment variants, `None` for text.
    #[must_use]
    pub fn media_url(&self) -> Option<&str> {
        match self {
            Self::Text { .. } => None,
            Self::Image { url } | Self::Video { url } | Self::Audio { url } | Self::File { url } => {
                Some(url.as_str())
            }
        }
    }
}

impl Display for MessageContent {
    fn fmt(&self, f: &mut Formatter<'_>) -> FmtResult {
        match self {
            Self::Text { .. } => write!(f, "text"),
            Self::Image { .. } => write!(f, "image"),
            Self::Video { .. } => write!(f, "video"),
            Self::Audio { .. } => write!(f, "audio"),
            Self::File { .. } => write!(f, "file"),
        }
    }
}

/// A single message in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Message {
    /// Internal identifier. Locally issued for pending placeholders.
    pub id: Uuid,

    /// Identifier issued by the messaging platform once the message is
    /// confirmed. Absent on pending placeholders.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub external_id: Option<String>,

    /// Conversation this message belongs to.
    pub conversation_id: Uuid,

    /// Whether the workspace or the counterpart authored the message.
    pub direction: MessageDirection,

    /// Normalized content.
    pub content: MessageContent,

    /// When the message was sent, platform clock.
    pub sent_at: Timestamp,

    /// Confirmation state.
    pub state: DeliveryState,
}

impl Message {
    /// Platform-internal no-op records (empty text, no attachment) that must
    /// not count toward pagination.
    #[must_use]
    pub fn is_structurally_empty(&self) -> bool {
        matches!(&self.content, MessageContent::Text { body } if body.trim().is_empty())
    }
}

/// One page of a reverse-chronological message listing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessagePage {
    /// Messages ordered by (sent_at, id) descending.
    pub messages: Vec<Message>,

    /// Opaque cursor for the next (older) page.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub next_cursor: Option<String>,

    /// Whether older meaningful messages remain.
    pub has_more: bool,
}

/// Request body for the outbound send endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageRequest {
    /// Content to deliver to the counterpart.
    pub content: MessageContent,
}

/// Response body for the outbound send endpoint.
///
/// The confirmed message is never returned here; confirmation arrives
/// asynchronously over the event stream (or the client's fallback fetch).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct SendMessageResponse {
    /// Conversation the send was issued against.
    pub conversation_id: Uuid,

    /// True when the platform accepted the send.
    pub delivered: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn text_message(body: &str) -> Message {
        Message {
            id: Uuid::new_v4(),
            external_id: Some("mid.1".to_string()),
            conversation_id: Uuid::new_v4(),
            direction: MessageDirection::Inbound,
            content: MessageContent::Text {
                body: body.to_string(),
            },
            sent_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 30, 0).unwrap()),
            state: DeliveryState::Confirmed,
        }
    }

    #[test]
    fn test_content_preview() {
        assert_eq!(
            MessageContent::Text {
                body: "hello".into()
            }
            .preview(),
            "hello"
        );
        assert_eq!(
            MessageContent::Image {
                url: "https://cdn.example/a.jpg".into()
            }
            .preview(),
            "\u{1f4f7} Photo"
        );
    }

    #[test]
    fn test_structurally_empty_detection() {
        assert!(text_message("").is_structurally_empty());
        assert!(text_message("   ").is_structurally_empty());
        assert!(!text_message("hi").is_structurally_empty());

        let attachment = Message {
            content: MessageContent::File {
                url: "https://cdn.example/doc.pdf".into(),
            },
            ..text_message("")
        };
        assert!(!attachment.is_structurally_empty());
    }

    #[test]
    fn test_message_serialization_round_trip() {
        let message = text_message("Test message");
        let serialized = serde_json::to_string(&message).unwrap();
        let deserialized: Message = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, message);
    }

    #[test]
    fn test_content_tagging() {
        let content = MessageContent::Audio {
            url: "https://cdn.example/clip.m4a".into(),
        };
        let value = serde_json::to_value(&content).unwrap();
        assert_eq!(value["kind"], "audio");
        assert_eq!(value["url"], "https://cdn.example/clip.m4a");
    }

    #[test]
    fn test_direction_round_trip() {
        assert_eq!(
            MessageDirection::try_from(MessageDirection::Inbound.as_str()),
            Ok(MessageDirection::Inbound)
        );
        assert!(MessageDirection::try_from("sideways").is_err());
    }
}
