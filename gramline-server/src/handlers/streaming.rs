//! Live event stream endpoint.

use std::{convert::Infallible, sync::Arc, time::Duration};

use axum::{
    extract::Extension,
    response::sse::{Event, KeepAlive, Sse},
};
use futures_util::{Stream, StreamExt, stream};
use tokio_stream::wrappers::ReceiverStream;
use tracing::info;

use shared::config::server::Config;
use shared::models::{ConnectedPayload, WorkspaceStreamEvent};

use crate::{
    http::error::ApiError,
    middleware::request_context::RequestContext,
    services::broadcaster::SharedBroadcaster,
};

/// `GET /api/stream` — one-directional workspace event stream.
///
/// The subscriber guard is owned by the response stream, so whichever way the
/// connection ends (client close, cancellation, timeout) the registration is
/// dropped and the keep-alive timer dies with the stream.
#[utoipa::path(
    get,
    path = "/api/stream",
    responses(
        (status = 200, description = "SSE stream of workspace events"),
        (status = 401, description = "Missing or invalid session"),
    ),
    tag = "stream"
)]
pub async fn stream_events(
    Extension(config): Extension<Arc<Config>>,
    Extension(broadcaster): Extension<SharedBroadcaster>,
    Extension(context): Extension<RequestContext>,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let workspace_id = context
        .workspace_id
        .ok_or_else(|| ApiError::unauthorized("stream requires a workspace session"))?;

    info!(workspace = %workspace_id, "establishing event stream");

    let (guard, receiver) = broadcaster.subscribe(workspace_id);

    let connected = WorkspaceStreamEvent::Connected {
        payload: ConnectedPayload { workspace_id },
    };

    let stream = stream::once(std::future::ready(connected))
        .chain(ReceiverStream::new(receiver))
        .map(move |event| {
            // Keeps the subscription alive exactly as long as the stream.
            let _registered = &guard;
            Ok::<_, Infallible>(sse_event(&event))
        });

    let keepalive = KeepAlive::new()
        .interval(Duration::from_secs(config.sse.heartbeat_seconds.max(5)))
        .text("keep-alive");

    Ok(Sse::new(stream).keep_alive(keepalive))
}

/// Maps a workspace event to its wire form: named SSE event, JSON envelope
/// as the data line.
fn sse_event(event: &WorkspaceStreamEvent) -> Event {
    let data = serde_json::to_string(event)
        .unwrap_or_else(|_| r#"{"type":"error","payload":{"reason":"serialization"}}"#.to_string());

    Event::default().event(event.name()).data(data)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::broadcaster::WorkspaceBroadcaster;
    use shared::config::server::Profile;
    use shared::models::MessagesSyncedPayload;
    use uuid::Uuid;

    #[tokio::test]
    async fn stream_requires_workspace_session() {
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));

        let context = RequestContext {
            request_id: "req-1".into(),
            workspace_id: None,
        };

        let result = stream_events(
            Extension(config),
            Extension(broadcaster),
            Extension(context),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn stream_registers_subscriber_and_leads_with_connected() {
        let config = Arc::new(Config::default_for_profile(Profile::Test));
        let broadcaster = Arc::new(WorkspaceBroadcaster::new(8));

        let context = RequestContext {
            request_id: "req-2".into(),
            workspace_id: Some(Uuid::new_v4()),
        };

        let response = stream_events(
            Extension(config),
            Extension(broadcaster.clone()),
            Extension(context),
        )
        .await;

        assert!(response.is_ok());
        assert_eq!(broadcaster.subscriber_count(), 1);

        // Dropping the response (and its stream) releases the subscription.
        drop(response);
        assert_eq!(broadcaster.subscriber_count(), 0);
    }

    #[test]
    fn sse_event_carries_name_and_json_envelope() {
        let event = WorkspaceStreamEvent::MessagesSynced {
            payload: MessagesSyncedPayload {
                conversation_id: Uuid::nil(),
            },
        };

        // The Event type has no public accessors; formatting is covered by
        // the serialization test on the envelope itself.
        let _ = sse_event(&event);
        let data = serde_json::to_string(&event).unwrap();
        assert!(data.contains("\"type\":\"messages_synced\""));
    }
}
