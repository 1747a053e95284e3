//! Remote messaging platform contract.
//!
//! The platform is an external collaborator; the server consumes a narrow
//! surface of it: send text/attachment, fetch recent messages, fetch the
//! conversation list, fetch a profile picture. Everything behind this trait
//! can fail independently of us (network, rate limits, permission churn) and
//! callers degrade gracefully around those failures.

use async_trait::async_trait;
use thiserror::Error;

use shared::models::Timestamp;

pub mod graph;

pub use graph::GraphClient;

#[derive(Debug, Error)]
pub enum PlatformError {
    #[error("platform request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("platform rate limit reached")]
    RateLimited,
    #[error("platform api error {code}: {message}")]
    Api { code: i64, message: String },
    #[error("unexpected platform response: {0}")]
    Malformed(String),
}

/// Attachment kind accepted by the platform send endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutboundAttachmentKind {
    Image,
    Video,
    Audio,
    File,
}

impl OutboundAttachmentKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Audio => "audio",
            Self::File => "file",
        }
    }
}

/// One conversation row as reported by the platform's conversation listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformConversation {
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub updated_at: Timestamp,
}

/// One message as reported by the platform's recent-messages endpoint.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlatformMessage {
    pub external_id: String,
    pub from_id: String,
    pub text: Option<String>,
    pub attachment_url: Option<String>,
    pub created_at: Timestamp,
}

#[async_trait]
pub trait MessagingPlatform: Send + Sync {
    /// Sends a plain text message from the connected account to a recipient.
    async fn send_text(
        &self,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<(), PlatformError>;

    /// Sends an attachment by URL.
    async fn send_attachment(
        &self,
        account_id: &str,
        recipient_id: &str,
        kind: OutboundAttachmentKind,
        url: &str,
    ) -> Result<(), PlatformError>;

    /// Fetches the N most recent messages exchanged with a participant.
    async fn recent_messages(
        &self,
        account_id: &str,
        participant_id: &str,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, PlatformError>;

    /// Fetches the account's conversation list, newest activity first.
    async fn list_conversations(
        &self,
        account_id: &str,
    ) -> Result<Vec<PlatformConversation>, PlatformError>;

    /// Fetches a participant's profile picture URL, when one is available.
    async fn profile_picture(&self, participant_id: &str)
    -> Result<Option<String>, PlatformError>;
}
