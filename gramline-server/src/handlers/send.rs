//! Outbound send endpoint.
//!
//! Sends go straight to the platform; the confirmed message is never part of
//! the response. Confirmation reaches clients asynchronously through the echo
//! webhook and the live stream, or through their fallback latest-fetch.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, State},
};
use tracing::{info, instrument};
use uuid::Uuid;

use shared::models::{
    MessageContent, SendMessageRequest, SendMessageResponse, Timestamp,
};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    platform::OutboundAttachmentKind,
    services::conversation_store::UnreadAction,
};

use super::conversations::require_conversation;

/// `POST /api/conversations/{id}/messages` — deliver a reply to the
/// counterpart. A platform failure surfaces synchronously as 502 so the
/// client can roll back its optimistic state.
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    params(("id" = Uuid, Path, description = "Conversation identifier")),
    request_body = SendMessageRequest,
    responses(
        (status = 200, description = "Send accepted by the platform", body = SendMessageResponse),
        (status = 404, description = "Unknown conversation"),
        (status = 502, description = "Platform rejected the send"),
    ),
    tag = "conversations"
)]
#[instrument(name = "conversations.send", skip(state, context, request))]
pub async fn send_message(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Json(request): Json<SendMessageRequest>,
) -> AppResult<Json<SendMessageResponse>> {
    let conversation = require_conversation(&state, &context, conversation_id).await?;

    match &request.content {
        MessageContent::Text { body } => {
            if body.trim().is_empty() {
                return Err(ApiError::bad_request("message text must not be empty"));
            }
            state
                .platform
                .send_text(&conversation.account_id, &conversation.participant_id, body)
                .await?;
        }
        MessageContent::Image { url } => {
            send_attachment(&state, &conversation, OutboundAttachmentKind::Image, url).await?;
        }
        MessageContent::Video { url } => {
            send_attachment(&state, &conversation, OutboundAttachmentKind::Video, url).await?;
        }
        MessageContent::Audio { url } => {
            send_attachment(&state, &conversation, OutboundAttachmentKind::Audio, url).await?;
        }
        MessageContent::File { url } => {
            send_attachment(&state, &conversation, OutboundAttachmentKind::File, url).await?;
        }
    }

    // The workspace replied: refresh the preview and force the unread
    // counter back to zero.
    state
        .conversations
        .record_activity(
            conversation.id,
            &request.content.preview(),
            Timestamp::now(),
            UnreadAction::Clear,
        )
        .await
        .map_err(ApiError::from)?;

    info!(conversation = %conversation.id, "outbound send accepted");

    Ok(Json(SendMessageResponse {
        conversation_id: conversation.id,
        delivered: true,
    }))
}

async fn send_attachment(
    state: &Arc<AppState>,
    conversation: &shared::models::Conversation,
    kind: OutboundAttachmentKind,
    url: &str,
) -> Result<(), ApiError> {
    if url.trim().is_empty() {
        return Err(ApiError::bad_request("attachment url must not be empty"));
    }

    state
        .platform
        .send_attachment(
            &conversation.account_id,
            &conversation.participant_id,
            kind,
            url,
        )
        .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{
        InMemoryConversationStore, InMemoryWorkspaceStore, StubPlatform, TestHarness,
    };
    use chrono::{TimeZone, Utc};
    use shared::models::{Conversation, SyncState};

    fn fixture(platform: StubPlatform) -> (Uuid, Conversation, TestHarness) {
        let workspace_id = Uuid::new_v4();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            workspace_id,
            account_id: "17841400000000001".to_string(),
            participant_id: "8412000000000042".to_string(),
            participant_name: None,
            participant_avatar_url: None,
            last_preview: String::new(),
            last_activity_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap()),
            unread_count: 3,
            sync_state: SyncState::Done,
        };

        let harness = TestHarness::new(
            InMemoryWorkspaceStore::default(),
            InMemoryConversationStore::with_rows(vec![conversation.clone()]),
            platform,
        );

        (workspace_id, conversation, harness)
    }

    #[tokio::test]
    async fn send_clears_unread_and_updates_preview() {
        let (workspace_id, conversation, harness) = fixture(StubPlatform::default());

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let response = send_message(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Json(SendMessageRequest {
                content: MessageContent::Text {
                    body: "on my way".into(),
                },
            }),
        )
        .await
        .unwrap()
        .0;

        assert!(response.delivered);

        let stored = &harness.conversations.snapshot()[0];
        assert_eq!(stored.unread_count, 0);
        assert_eq!(stored.last_preview, "on my way");

        let sent = harness.platform.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].recipient_id, conversation.participant_id);
    }

    #[tokio::test]
    async fn platform_failure_surfaces_and_leaves_state_untouched() {
        let (workspace_id, conversation, harness) = fixture(StubPlatform {
            fail_sends: true,
            ..Default::default()
        });

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let result = send_message(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Json(SendMessageRequest {
                content: MessageContent::Text {
                    body: "did this arrive?".into(),
                },
            }),
        )
        .await;

        assert!(result.is_err());

        // Failed sends must not clear unread or touch the preview.
        let stored = &harness.conversations.snapshot()[0];
        assert_eq!(stored.unread_count, 3);
        assert!(stored.last_preview.is_empty());
    }

    #[tokio::test]
    async fn empty_text_is_rejected_before_the_platform_call() {
        let (workspace_id, conversation, harness) = fixture(StubPlatform::default());

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let result = send_message(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Json(SendMessageRequest {
                content: MessageContent::Text { body: "   ".into() },
            }),
        )
        .await;

        assert!(result.is_err());
        assert!(harness.platform.sent.lock().unwrap().is_empty());
    }
}
