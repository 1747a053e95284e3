pub mod conversation;
pub mod errors;
pub mod events;
pub mod message;
pub mod timestamp;
pub mod webhook;

pub use conversation::{Conversation, ConversationListResponse, SyncState};
pub use errors::ErrorResponse;
pub use events::{
    ConnectedPayload, MessageEventPayload, MessagesSyncedPayload, UserStatusPayload,
    WorkspaceStreamEvent,
};
pub use message::{
    DeliveryState, Message, MessageContent, MessageDirection, MessagePage, SendMessageRequest,
    SendMessageResponse,
};
pub use timestamp::Timestamp;
pub use webhook::{
    AttachmentPayload, ChangeNotification, EventParty, InboundAttachment, InboundMessage,
    MessagingEvent, WebhookEntry, WebhookEnvelope,
};
