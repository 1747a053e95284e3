//! Inbound webhook endpoint: handshake verification and event delivery.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Extension, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use tracing::{info, instrument, warn};

use shared::config::server::Config;
use shared::models::webhook::WebhookEnvelope;

use crate::{
    app_state::AppState,
    http::error::{ApiError, AppResult},
    services::{broadcaster::SharedBroadcaster, ingest::IngestService},
};

const SIGNATURE_HEADER: &str = "x-hub-signature-256";

/// Query parameters of the platform's subscription handshake.
#[derive(Debug, Deserialize)]
pub struct HandshakeQuery {
    #[serde(rename = "hub.mode")]
    mode: Option<String>,
    #[serde(rename = "hub.verify_token")]
    verify_token: Option<String>,
    #[serde(rename = "hub.challenge")]
    challenge: Option<String>,
}

/// `GET /api/webhook` — subscription handshake. Echoes the challenge when the
/// shared verify token matches.
#[utoipa::path(
    get,
    path = "/api/webhook",
    responses(
        (status = 200, description = "Challenge echoed"),
        (status = 400, description = "Missing handshake parameters"),
        (status = 401, description = "Verify token mismatch"),
    ),
    tag = "webhook"
)]
#[instrument(name = "webhook.handshake", skip_all)]
pub async fn verify_subscription(
    Extension(config): Extension<Arc<Config>>,
    Query(query): Query<HandshakeQuery>,
) -> AppResult<String> {
    if query.mode.as_deref() != Some("subscribe") {
        return Err(ApiError::bad_request("unsupported hub.mode"));
    }

    let provided = query
        .verify_token
        .ok_or_else(|| ApiError::bad_request("missing hub.verify_token"))?;

    if provided != config.webhook.verify_token {
        return Err(ApiError::unauthorized("verify token mismatch"));
    }

    query
        .challenge
        .ok_or_else(|| ApiError::bad_request("missing hub.challenge"))
}

/// `POST /api/webhook` — event delivery. The body is verified against the
/// keyed-hash signature header before anything is parsed; a mismatch rejects
/// the request with no side effects.
#[utoipa::path(
    post,
    path = "/api/webhook",
    request_body(content = String, description = "Raw webhook payload"),
    responses(
        (status = 200, description = "Events accepted"),
        (status = 401, description = "Signature mismatch"),
    ),
    tag = "webhook"
)]
#[instrument(name = "webhook.receive", skip_all)]
pub async fn receive_events(
    State(state): State<Arc<AppState>>,
    Extension(config): Extension<Arc<Config>>,
    Extension(broadcaster): Extension<SharedBroadcaster>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<impl IntoResponse> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    if let Err(reason) = verify_signature(&config.webhook.app_secret, &body, signature) {
        warn!(reason, "webhook signature verification failed");
        return Err(ApiError::unauthorized("webhook signature verification failed"));
    }

    let envelope: WebhookEnvelope = serde_json::from_slice(&body)
        .map_err(|err| ApiError::bad_request(format!("unparseable webhook body: {err}")))?;

    info!(object = %envelope.object, entries = envelope.entry.len(), "webhook delivery accepted");

    let service = IngestService::new(
        state.workspaces.clone(),
        state.conversations.clone(),
        state.messages.clone(),
        state.platform.clone(),
        broadcaster,
    );

    service.process_envelope(&envelope).await?;

    Ok((StatusCode::OK, "EVENT_RECEIVED"))
}

/// Verifies the `sha256=<hex>` signature header over the raw body.
///
/// Comparison happens inside `Mac::verify_slice`, which is constant-time.
/// An unset secret disables verification so local development can replay
/// captured payloads; production configs always carry one.
fn verify_signature(
    secret: &str,
    body: &[u8],
    header: Option<&str>,
) -> Result<(), &'static str> {
    if secret.is_empty() {
        warn!("webhook app secret unset; accepting unsigned delivery");
        return Ok(());
    }

    let header = header.ok_or("missing_signature")?;
    let hex_digest = header.strip_prefix("sha256=").ok_or("malformed_signature")?;
    let expected = hex::decode(hex_digest).map_err(|_| "malformed_signature")?;

    let mut mac =
        Hmac::<Sha256>::new_from_slice(secret.as_bytes()).map_err(|_| "bad_secret")?;
    mac.update(body);
    mac.verify_slice(&expected).map_err(|_| "invalid_signature")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::broadcaster::WorkspaceBroadcaster;
    use crate::services::workspace_store::WorkspaceAccount;
    use crate::test_support::{
        InMemoryConversationStore, InMemoryWorkspaceStore, StubPlatform, TestHarness,
    };
    use axum::{Router, body::Body, http::Request, routing::get};
    use chrono::{TimeZone, Utc};
    use shared::config::server::{Config, Profile};
    use shared::models::{
        Conversation, MessageDirection, SyncState, Timestamp, WorkspaceStreamEvent,
    };
    use tower::ServiceExt;
    use uuid::Uuid;

    const APP_SECRET: &str = "unit-test-secret";
    const ACCOUNT_ID: &str = "17841400000000001";
    const COUNTERPART_ID: &str = "8412000000000042";

    fn test_config() -> Arc<Config> {
        let mut config = Config::default_for_profile(Profile::Test);
        config.webhook.app_secret = APP_SECRET.to_string();
        config.webhook.verify_token = "expected-token".to_string();
        Arc::new(config)
    }

    fn sign(body: &str) -> String {
        let mut mac = Hmac::<Sha256>::new_from_slice(APP_SECRET.as_bytes()).unwrap();
        mac.update(body.as_bytes());
        format!("sha256={}", hex::encode(mac.finalize().into_bytes()))
    }

    fn workspace_fixture() -> (Uuid, InMemoryWorkspaceStore, InMemoryConversationStore) {
        let workspace_id = Uuid::new_v4();
        let workspaces = InMemoryWorkspaceStore {
            accounts: vec![WorkspaceAccount {
                workspace_id,
                account_id: ACCOUNT_ID.to_string(),
            }],
            ..Default::default()
        };

        let conversations = InMemoryConversationStore::with_rows(vec![Conversation {
            id: Uuid::new_v4(),
            workspace_id,
            account_id: ACCOUNT_ID.to_string(),
            participant_id: COUNTERPART_ID.to_string(),
            participant_name: Some("Ada".to_string()),
            participant_avatar_url: Some("https://cdn.example/ada.jpg".to_string()),
            last_preview: String::new(),
            last_activity_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 1, 0, 0, 0).unwrap()),
            unread_count: 0,
            sync_state: SyncState::Done,
        }]);

        (workspace_id, workspaces, conversations)
    }

    fn router(harness: &TestHarness, broadcaster: SharedBroadcaster) -> Router {
        Router::new()
            .route("/api/webhook", get(verify_subscription).post(receive_events))
            .layer(Extension(test_config()))
            .layer(Extension(broadcaster))
            .with_state(harness.state.clone())
    }

    fn inbound_text_body(mid: &str, text: &str) -> String {
        format!(
            r#"{{
                "object": "instagram",
                "entry": [{{
                    "id": "{ACCOUNT_ID}",
                    "time": 1741444200000,
                    "messaging": [{{
                        "sender": {{"id": "{COUNTERPART_ID}"}},
                        "recipient": {{"id": "{ACCOUNT_ID}"}},
                        "timestamp": 1741444200000,
                        "message": {{"mid": "{mid}", "text": "{text}"}}
                    }}]
                }}]
            }}"#
        )
    }

    async fn deliver(app: &Router, body: &str, signature: Option<String>) -> StatusCode {
        let mut request = Request::builder()
            .method("POST")
            .uri("/api/webhook")
            .header("content-type", "application/json");
        if let Some(signature) = signature {
            request = request.header(SIGNATURE_HEADER, signature);
        }

        app.clone()
            .oneshot(request.body(Body::from(body.to_string())).unwrap())
            .await
            .unwrap()
            .status()
    }

    #[test]
    fn signature_verification_accepts_valid_and_rejects_invalid() {
        let body = b"payload".as_slice();

        let mut mac = Hmac::<Sha256>::new_from_slice(APP_SECRET.as_bytes()).unwrap();
        mac.update(body);
        let valid = format!("sha256={}", hex::encode(mac.finalize().into_bytes()));

        assert!(verify_signature(APP_SECRET, body, Some(&valid)).is_ok());
        assert_eq!(
            verify_signature(APP_SECRET, body, Some("sha256=deadbeef")),
            Err("invalid_signature")
        );
        assert_eq!(
            verify_signature(APP_SECRET, body, None),
            Err("missing_signature")
        );
        assert_eq!(
            verify_signature(APP_SECRET, body, Some("not-prefixed")),
            Err("malformed_signature")
        );
    }

    #[tokio::test]
    async fn handshake_echoes_challenge_for_matching_token() {
        let (_, workspaces, conversations) = workspace_fixture();
        let harness = TestHarness::new(workspaces, conversations, StubPlatform::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let app = router(&harness, broadcaster);

        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/webhook?hub.mode=subscribe&hub.verify_token=expected-token&hub.challenge=12345")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), 1024).await.unwrap();
        assert_eq!(&body[..], b"12345");

        let rejected = app
            .clone()
            .oneshot(
                Request::builder()
                    .uri("/api/webhook?hub.mode=subscribe&hub.verify_token=wrong&hub.challenge=12345")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(rejected.status(), StatusCode::UNAUTHORIZED);

        let missing = app
            .oneshot(
                Request::builder()
                    .uri("/api/webhook?hub.mode=subscribe")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(missing.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn rejects_bad_signature_without_side_effects() {
        let (_, workspaces, conversations) = workspace_fixture();
        let harness = TestHarness::new(workspaces, conversations, StubPlatform::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let app = router(&harness, broadcaster);

        let body = inbound_text_body("mid.1", "hello");
        let status = deliver(&app, &body, Some("sha256=deadbeef".to_string())).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert!(harness.messages.snapshot().is_empty());
    }

    #[tokio::test]
    async fn persists_and_broadcasts_inbound_message() {
        let (workspace_id, workspaces, conversations) = workspace_fixture();
        let harness = TestHarness::new(workspaces, conversations, StubPlatform::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let (_guard, mut receiver) = broadcaster.subscribe(workspace_id);
        let app = router(&harness, broadcaster);

        let body = inbound_text_body("mid.1", "hello");
        let status = deliver(&app, &body, Some(sign(&body))).await;
        assert_eq!(status, StatusCode::OK);

        let stored = harness.messages.snapshot();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].external_id.as_deref(), Some("mid.1"));
        assert_eq!(stored[0].direction, MessageDirection::Inbound);

        let conversation = &harness.conversations.snapshot()[0];
        assert_eq!(conversation.unread_count, 1);
        assert_eq!(conversation.last_preview, "hello");

        match receiver.recv().await.unwrap() {
            WorkspaceStreamEvent::NewMessage { payload } => {
                assert_eq!(payload.conversation_id, Some(conversation.id));
                assert!(!payload.from_me);
            }
            other => panic!("expected new_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn redelivery_is_idempotent() {
        let (_, workspaces, conversations) = workspace_fixture();
        let harness = TestHarness::new(workspaces, conversations, StubPlatform::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let app = router(&harness, broadcaster);

        let body = inbound_text_body("mid.dup", "are you there?");
        assert_eq!(deliver(&app, &body, Some(sign(&body))).await, StatusCode::OK);
        assert_eq!(deliver(&app, &body, Some(sign(&body))).await, StatusCode::OK);

        // Exactly one stored message, at most one unread increment.
        assert_eq!(harness.messages.snapshot().len(), 1);
        assert_eq!(harness.conversations.snapshot()[0].unread_count, 1);
    }

    #[tokio::test]
    async fn echo_clears_unread_and_broadcasts_message_echo() {
        let (workspace_id, workspaces, conversations) = workspace_fixture();
        let harness = TestHarness::new(workspaces, conversations, StubPlatform::default());
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let (_guard, mut receiver) = broadcaster.subscribe(workspace_id);
        let app = router(&harness, broadcaster);

        // Seed unread with an inbound message first.
        let inbound = inbound_text_body("mid.in", "ping");
        deliver(&app, &inbound, Some(sign(&inbound))).await;
        let _ = receiver.recv().await;

        let echo = format!(
            r#"{{
                "object": "instagram",
                "entry": [{{
                    "id": "{ACCOUNT_ID}",
                    "messaging": [{{
                        "sender": {{"id": "{ACCOUNT_ID}"}},
                        "recipient": {{"id": "{COUNTERPART_ID}"}},
                        "timestamp": 1741444300000,
                        "message": {{"mid": "mid.echo", "text": "pong", "is_echo": true}}
                    }}]
                }}]
            }}"#
        );
        assert_eq!(deliver(&app, &echo, Some(sign(&echo))).await, StatusCode::OK);

        assert_eq!(harness.conversations.snapshot()[0].unread_count, 0);

        match receiver.recv().await.unwrap() {
            WorkspaceStreamEvent::MessageEcho { payload } => {
                assert!(payload.from_me);
                assert_eq!(payload.message.external_id.as_deref(), Some("mid.echo"));
            }
            other => panic!("expected message_echo, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unresolvable_event_acks_and_broadcasts_without_persisting() {
        let workspace_id = Uuid::new_v4();
        let workspaces = InMemoryWorkspaceStore {
            accounts: vec![WorkspaceAccount {
                workspace_id,
                account_id: ACCOUNT_ID.to_string(),
            }],
            ..Default::default()
        };
        // No stored conversations and an empty platform listing: resolution
        // and its refetch-and-retry both miss.
        let harness = TestHarness::new(
            workspaces,
            InMemoryConversationStore::default(),
            StubPlatform::default(),
        );
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let (_guard, mut receiver) = broadcaster.subscribe(workspace_id);
        let app = router(&harness, broadcaster);

        let body = inbound_text_body("mid.lost", "anyone home?");
        let status = deliver(&app, &body, Some(sign(&body))).await;

        assert_eq!(status, StatusCode::OK);
        assert!(harness.messages.snapshot().is_empty());

        match receiver.recv().await.unwrap() {
            WorkspaceStreamEvent::NewMessage { payload } => {
                assert_eq!(payload.conversation_id, None);
            }
            other => panic!("expected new_message, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn refetch_fallback_resolves_new_counterpart() {
        let workspace_id = Uuid::new_v4();
        let workspaces = InMemoryWorkspaceStore {
            accounts: vec![WorkspaceAccount {
                workspace_id,
                account_id: ACCOUNT_ID.to_string(),
            }],
            ..Default::default()
        };

        let platform = StubPlatform {
            conversations: vec![crate::platform::PlatformConversation {
                participant_id: COUNTERPART_ID.to_string(),
                participant_name: Some("Ada".to_string()),
                updated_at: Timestamp(Utc.with_ymd_and_hms(2025, 3, 8, 0, 0, 0).unwrap()),
            }],
            ..Default::default()
        };

        let harness =
            TestHarness::new(workspaces, InMemoryConversationStore::default(), platform);
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));
        let app = router(&harness, broadcaster);

        let body = inbound_text_body("mid.new", "hi!");
        assert_eq!(deliver(&app, &body, Some(sign(&body))).await, StatusCode::OK);

        // The bulk refetch persisted the conversation and the retry resolved
        // it, so the message landed.
        let stored = harness.messages.snapshot();
        assert_eq!(stored.len(), 1);
        let conversations = harness.conversations.snapshot();
        assert_eq!(conversations.len(), 1);
        assert_eq!(stored[0].conversation_id, conversations[0].id);
    }
}
