use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::Timestamp;

/// Background synchronization state of a conversation's history.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No sync has been attempted yet.
    Pending,
    /// A history sync is in flight.
    Running,
    /// Last sync completed.
    Done,
    /// Last sync failed.
    Error,
}

impl SyncState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Done => "done",
            Self::Error => "error",
        }
    }
}

impl TryFrom<&str> for SyncState {
    type Error = &'static str;

    fn try_from(value: &str) -> Result<Self, &'static str> {
        match value {
            "pending" => Ok(Self::Pending),
            "running" => Ok(Self::Running),
            "done" => Ok(Self::Done),
            "error" => Ok(Self::Error),
            _ => Err("invalid sync state"),
        }
    }
}

/// A conversation between a workspace's connected account and one external
/// participant.
///
/// Unique per (workspace, participant); the unread counter is non-negative,
/// incremented only for inbound non-echo messages, and cleared whenever the
/// workspace replies.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct Conversation {
    /// Internal identifier.
    pub id: Uuid,

    /// Owning workspace.
    pub workspace_id: Uuid,

    /// Connected platform account the conversation belongs to.
    pub account_id: String,

    /// External participant (counterpart) identifier on the platform.
    pub participant_id: String,

    /// Display name of the counterpart, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_name: Option<String>,

    /// Profile picture URL of the counterpart, when known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub participant_avatar_url: Option<String>,

    /// Preview of the most recent message.
    #[serde(default)]
    pub last_preview: String,

    /// Timestamp of the most recent activity.
    pub last_activity_at: Timestamp,

    /// Count of unread inbound messages.
    pub unread_count: i64,

    /// History synchronization tag.
    pub sync_state: SyncState,
}

/// Workspace conversation listing, most recent activity first.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ConversationListResponse {
    /// Conversations ordered by last activity descending.
    pub conversations: Vec<Conversation>,
}
