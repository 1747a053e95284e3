use shared::models::{
    Conversation, ConversationListResponse, DeliveryState, ErrorResponse, Message, MessageContent,
    MessageDirection, MessagePage, SendMessageRequest, SendMessageResponse, SyncState, Timestamp,
};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    info(
        title = "Gramline API",
        version = "1.0.0",
        description = "API documentation for the Gramline inbox server"
    ),
    paths(
        crate::handlers::webhook::verify_subscription,
        crate::handlers::webhook::receive_events,
        crate::handlers::streaming::stream_events,
        crate::handlers::conversations::list_conversations,
        crate::handlers::conversations::get_message_page,
        crate::handlers::conversations::get_latest_messages,
        crate::handlers::send::send_message,
    ),
    components(
        schemas(
            Conversation,
            ConversationListResponse,
            DeliveryState,
            Message,
            MessageContent,
            MessageDirection,
            MessagePage,
            SendMessageRequest,
            SendMessageResponse,
            SyncState,
            Timestamp,
            ErrorResponse,
        )
    ),
    tags(
        (name = "webhook", description = "Platform webhook intake"),
        (name = "stream", description = "Live workspace event stream"),
        (name = "conversations", description = "Conversation and message endpoints")
    )
)]
pub struct ApiDoc;
