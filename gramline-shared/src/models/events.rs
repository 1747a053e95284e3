use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::message::Message;

/// Payload for `new_message` and `message_echo` events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessageEventPayload {
    /// Resolved conversation, or `None` when ingestion could not resolve the
    /// webhook to a known conversation (clients self-heal via refetch).
    #[serde(default)]
    pub conversation_id: Option<Uuid>,

    /// Direction flag derived server-side so clients never re-derive it.
    pub from_me: bool,

    /// The confirmed message.
    pub message: Message,
}

/// Payload for `messages_synced`: a hint that the durable store changed in
/// bulk and the conversation should be reloaded.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct MessagesSyncedPayload {
    /// Conversation whose history was synced.
    pub conversation_id: Uuid,
}

/// Payload for `user_status_updated`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct UserStatusPayload {
    /// External participant whose profile changed.
    pub participant_id: String,

    /// Updated avatar URL, when the change carries one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub avatar_url: Option<String>,
}

/// Payload for the synthetic `connected` event sent when a stream opens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
pub struct ConnectedPayload {
    /// Workspace the stream is scoped to.
    pub workspace_id: Uuid,
}

/// Workspace-scoped event envelope carried over the live stream.
///
/// Ephemeral by contract: events are never persisted and delivery is
/// best-effort fan-out to currently-connected subscribers only.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, ToSchema)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WorkspaceStreamEvent {
    /// Synthetic acknowledgement sent once per stream open.
    Connected { payload: ConnectedPayload },
    /// A counterpart-authored message arrived.
    NewMessage { payload: MessageEventPayload },
    /// Confirmation of a message the workspace itself sent.
    MessageEcho { payload: MessageEventPayload },
    /// History changed in bulk; reload from the durable store.
    MessagesSynced { payload: MessagesSyncedPayload },
    /// Counterpart profile metadata changed.
    UserStatusUpdated { payload: UserStatusPayload },
}

impl WorkspaceStreamEvent {
    /// Stable event name used for SSE `event:` lines and metrics labels.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Connected { .. } => "connected",
            Self::NewMessage { .. } => "new_message",
            Self::MessageEcho { .. } => "message_echo",
            Self::MessagesSynced { .. } => "messages_synced",
            Self::UserStatusUpdated { .. } => "user_status_updated",
        }
    }
}
