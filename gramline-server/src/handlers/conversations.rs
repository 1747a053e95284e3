//! Conversation listing and message history endpoints.

use std::sync::Arc;

use axum::{
    Json,
    extract::{Extension, Path, Query, State},
};
use serde::Deserialize;
use tracing::{instrument, warn};
use uuid::Uuid;

use shared::models::{
    Conversation, ConversationListResponse, MessageDirection, MessagePage, MessagesSyncedPayload,
    WorkspaceStreamEvent,
};

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    middleware::request_context::RequestContext,
    services::{
        broadcaster::SharedBroadcaster,
        cursor::CursorError,
        message_store::{ConfirmedMessage, PageError, UpsertOutcome},
        normalize,
    },
};

const DEFAULT_PAGE_SIZE: usize = 25;

#[derive(Debug, Deserialize, Default)]
pub struct PageQuery {
    limit: Option<usize>,
    cursor: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct LatestQuery {
    limit: Option<usize>,
}

/// `GET /api/conversations` — workspace conversation list, newest first.
#[utoipa::path(
    get,
    path = "/api/conversations",
    responses(
        (status = 200, description = "Conversation list", body = ConversationListResponse),
        (status = 401, description = "Missing or invalid session"),
    ),
    tag = "conversations"
)]
#[instrument(name = "conversations.list", skip_all)]
pub async fn list_conversations(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
) -> AppResult<Json<ConversationListResponse>> {
    let workspace_id = require_workspace(&context)?;

    let conversations = state
        .conversations
        .list_for_workspace(workspace_id)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(ConversationListResponse { conversations }))
}

/// `GET /api/conversations/{id}/messages` — one history page, cursor-driven.
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    params(
        ("id" = Uuid, Path, description = "Conversation identifier"),
        ("limit" = Option<usize>, Query, description = "Page size"),
        ("cursor" = Option<String>, Query, description = "Opaque page cursor"),
    ),
    responses(
        (status = 200, description = "Message page", body = MessagePage),
        (status = 400, description = "Malformed cursor"),
        (status = 404, description = "Unknown conversation"),
    ),
    tag = "conversations"
)]
#[instrument(name = "conversations.messages", skip(state, context, query))]
pub async fn get_message_page(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<MessagePage>> {
    let conversation = require_conversation(&state, &context, conversation_id).await?;

    let page = state
        .messages
        .page(
            conversation.id,
            query.limit.unwrap_or(DEFAULT_PAGE_SIZE),
            query.cursor.as_deref(),
        )
        .await
        .map_err(|err| match err {
            PageError::Cursor(CursorError::Encoding | CursorError::Layout) => {
                ApiError::bad_request("cursor is not valid")
            }
            PageError::Store(inner) => ApiError::from(inner),
        })?;

    Ok(Json(page))
}

/// `GET /api/conversations/{id}/messages/latest` — the newest messages,
/// refreshed from the platform when it is reachable.
///
/// This is the self-heal path behind the client's post-send fallback: when
/// the live stream silently dropped a confirmation, the platform refetch
/// lands it in the store and the response carries it back.
#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages/latest",
    params(
        ("id" = Uuid, Path, description = "Conversation identifier"),
        ("limit" = Option<usize>, Query, description = "Number of newest messages"),
    ),
    responses(
        (status = 200, description = "Newest messages", body = MessagePage),
        (status = 404, description = "Unknown conversation"),
    ),
    tag = "conversations"
)]
#[instrument(name = "conversations.latest", skip(state, context, query))]
pub async fn get_latest_messages(
    State(state): State<Arc<AppState>>,
    Extension(context): Extension<RequestContext>,
    Extension(broadcaster): Extension<SharedBroadcaster>,
    Path(conversation_id): Path<Uuid>,
    Query(query): Query<LatestQuery>,
) -> AppResult<Json<MessagePage>> {
    let conversation = require_conversation(&state, &context, conversation_id).await?;
    let limit = query.limit.unwrap_or(1).clamp(1, 20);

    // Best-effort platform refresh; a platform failure degrades to a
    // store-only read instead of failing the request.
    match state
        .platform
        .recent_messages(&conversation.account_id, &conversation.participant_id, limit)
        .await
    {
        Ok(remote_messages) => {
            let mut inserted_any = false;
            for remote in remote_messages {
                let direction = if remote.from_id == conversation.account_id {
                    MessageDirection::Outbound
                } else {
                    MessageDirection::Inbound
                };

                let content = normalize::normalize_platform_message(
                    remote.text.as_deref(),
                    remote.attachment_url.as_deref(),
                );

                let outcome = state
                    .messages
                    .upsert_confirmed(
                        conversation.workspace_id,
                        conversation.id,
                        &ConfirmedMessage {
                            external_id: remote.external_id,
                            direction,
                            content,
                            sent_at: remote.created_at,
                        },
                    )
                    .await
                    .map_err(ApiError::from)?;

                inserted_any |= outcome == UpsertOutcome::Inserted;
            }

            if inserted_any {
                broadcaster.publish(
                    conversation.workspace_id,
                    &WorkspaceStreamEvent::MessagesSynced {
                        payload: MessagesSyncedPayload {
                            conversation_id: conversation.id,
                        },
                    },
                );
            }
        }
        Err(err) => {
            warn!(error = %err, "platform refresh failed, serving stored history");
        }
    }

    let messages = state
        .messages
        .latest(conversation.id, limit)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(MessagePage {
        messages,
        next_cursor: None,
        has_more: false,
    }))
}

pub(crate) fn require_workspace(context: &RequestContext) -> Result<Uuid, ApiError> {
    context
        .workspace_id
        .ok_or_else(|| ApiError::unauthorized("request requires a workspace session"))
}

/// Loads a conversation and checks it belongs to the caller's workspace.
pub(crate) async fn require_conversation(
    state: &Arc<AppState>,
    context: &RequestContext,
    conversation_id: Uuid,
) -> Result<Conversation, ApiError> {
    let workspace_id = require_workspace(context)?;

    let conversation = state
        .conversations
        .get(conversation_id)
        .await
        .map_err(ApiError::from)?
        .filter(|conversation| conversation.workspace_id == workspace_id)
        .ok_or_else(|| ApiError::not_found("conversation not found"))?;

    Ok(conversation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::message_store::MessageStore;
    use crate::services::workspace_store::WorkspaceAccount;
    use crate::test_support::{
        InMemoryConversationStore, InMemoryWorkspaceStore, StubPlatform, TestHarness,
    };
    use crate::services::broadcaster::WorkspaceBroadcaster;
    use chrono::{Duration, TimeZone, Utc};
    use shared::models::{MessageContent, SyncState, Timestamp};
    use std::collections::HashSet;

    const ACCOUNT_ID: &str = "17841400000000001";
    const COUNTERPART_ID: &str = "8412000000000042";

    fn fixture() -> (Uuid, Conversation, TestHarness) {
        let workspace_id = Uuid::new_v4();
        let conversation = Conversation {
            id: Uuid::new_v4(),
            workspace_id,
            account_id: ACCOUNT_ID.to_string(),
            participant_id: COUNTERPART_ID.to_string(),
            participant_name: None,
            participant_avatar_url: None,
            last_preview: String::new(),
            last_activity_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap()),
            unread_count: 0,
            sync_state: SyncState::Done,
        };

        let workspaces = InMemoryWorkspaceStore {
            accounts: vec![WorkspaceAccount {
                workspace_id,
                account_id: ACCOUNT_ID.to_string(),
            }],
            ..Default::default()
        };

        let harness = TestHarness::new(
            workspaces,
            InMemoryConversationStore::with_rows(vec![conversation.clone()]),
            StubPlatform::default(),
        );

        (workspace_id, conversation, harness)
    }

    async fn seed_messages(harness: &TestHarness, conversation: &Conversation, count: usize) {
        let base = Utc.with_ymd_and_hms(2025, 3, 8, 12, 0, 0).unwrap();
        for index in 0..count {
            harness
                .messages
                .upsert_confirmed(
                    conversation.workspace_id,
                    conversation.id,
                    &ConfirmedMessage {
                        external_id: format!("mid.{index}"),
                        direction: MessageDirection::Inbound,
                        content: MessageContent::Text {
                            body: format!("message {index}"),
                        },
                        // Two messages per second force id tie-breaking.
                        sent_at: Timestamp(base + Duration::seconds((index / 2) as i64)),
                    },
                )
                .await
                .unwrap();
        }
    }

    #[tokio::test]
    async fn pagination_walks_every_message_exactly_once() {
        let (workspace_id, conversation, harness) = fixture();
        seed_messages(&harness, &conversation, 23).await;

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let mut seen: Vec<String> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut previous_key: Option<(Timestamp, Uuid)> = None;

        loop {
            let page = get_message_page(
                State(harness.state.clone()),
                Extension(context.clone()),
                Path(conversation.id),
                Query(PageQuery {
                    limit: Some(5),
                    cursor: cursor.clone(),
                }),
            )
            .await
            .unwrap()
            .0;

            for message in &page.messages {
                let key = (message.sent_at, message.id);
                if let Some(previous) = previous_key {
                    assert!(key < previous, "strict descending (sent_at, id) order");
                }
                previous_key = Some(key);
                seen.push(message.external_id.clone().unwrap());
            }

            if !page.has_more {
                assert!(page.next_cursor.is_none());
                break;
            }
            cursor = page.next_cursor;
            assert!(cursor.is_some());
        }

        assert_eq!(seen.len(), 23);
        let distinct: HashSet<_> = seen.iter().collect();
        assert_eq!(distinct.len(), 23, "no duplicates across pages");
    }

    #[tokio::test]
    async fn pagination_excludes_structurally_empty_messages() {
        let (workspace_id, conversation, harness) = fixture();
        seed_messages(&harness, &conversation, 3).await;

        // A platform no-op record: empty text body.
        harness
            .messages
            .upsert_confirmed(
                conversation.workspace_id,
                conversation.id,
                &ConfirmedMessage {
                    external_id: "mid.noop".into(),
                    direction: MessageDirection::Inbound,
                    content: MessageContent::Text {
                        body: String::new(),
                    },
                    sent_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 13, 0, 0).unwrap()),
                },
            )
            .await
            .unwrap();

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let page = get_message_page(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Query(PageQuery {
                limit: Some(10),
                cursor: None,
            }),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(page.messages.len(), 3);
        assert!(!page.has_more);
        assert!(
            page.messages
                .iter()
                .all(|message| message.external_id.as_deref() != Some("mid.noop"))
        );
    }

    #[tokio::test]
    async fn malformed_cursor_is_a_bad_request() {
        let (workspace_id, conversation, harness) = fixture();

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let result = get_message_page(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Query(PageQuery {
                limit: Some(5),
                cursor: Some("not-a-cursor!!".into()),
            }),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn foreign_workspace_cannot_read_messages() {
        let (_, conversation, harness) = fixture();

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(Uuid::new_v4()),
        };

        let result = get_message_page(
            State(harness.state.clone()),
            Extension(context),
            Path(conversation.id),
            Query(PageQuery::default()),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn latest_refreshes_from_platform_and_broadcasts_sync_hint() {
        let (workspace_id, conversation, mut harness) = fixture();

        let remote = crate::platform::PlatformMessage {
            external_id: "mid.remote".to_string(),
            from_id: ACCOUNT_ID.to_string(),
            text: Some("sent from phone".to_string()),
            attachment_url: None,
            created_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 14, 0, 0).unwrap()),
        };

        let platform = StubPlatform {
            recent: vec![remote],
            ..Default::default()
        };
        harness = TestHarness::new(
            InMemoryWorkspaceStore::default(),
            InMemoryConversationStore::with_rows(vec![conversation.clone()]),
            platform,
        );

        let broadcaster = std::sync::Arc::new(WorkspaceBroadcaster::new(8));
        let (_guard, mut receiver) = broadcaster.subscribe(workspace_id);

        let context = RequestContext {
            request_id: "req".into(),
            workspace_id: Some(workspace_id),
        };

        let page = get_latest_messages(
            State(harness.state.clone()),
            Extension(context),
            Extension(broadcaster),
            Path(conversation.id),
            Query(LatestQuery { limit: Some(1) }),
        )
        .await
        .unwrap()
        .0;

        assert_eq!(page.messages.len(), 1);
        assert_eq!(page.messages[0].external_id.as_deref(), Some("mid.remote"));
        assert_eq!(page.messages[0].direction, MessageDirection::Outbound);

        match receiver.recv().await.unwrap() {
            WorkspaceStreamEvent::MessagesSynced { payload } => {
                assert_eq!(payload.conversation_id, conversation.id);
            }
            other => panic!("expected messages_synced, got {other:?}"),
        }
    }
}
