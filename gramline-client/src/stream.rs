//! Live event stream consumer.
//!
//! Parses the server's SSE wire format by hand: `event:`/`data:` fields,
//! blank-line dispatch, `:`-prefixed heartbeat comments ignored. Reconnects
//! with a short delay when the connection drops; missed events are recovered
//! by the engine's fetch path, not by the stream.

use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::mpsc;
use tokio::time::sleep;
use tracing::{debug, warn};

use shared::models::WorkspaceStreamEvent;

use crate::api::ApiClient;

/// Incremental parser for the SSE line protocol.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: String,
    event_name: Option<String>,
    data: String,
}

impl SseParser {
    /// Feeds one chunk of bytes and returns every complete event it closed.
    pub fn feed(&mut self, chunk: &str) -> Vec<WorkspaceStreamEvent> {
        let mut events = Vec::new();
        self.buffer.push_str(chunk);

        while let Some(newline) = self.buffer.find('\n') {
            let line: String = self.buffer.drain(..=newline).collect();
            let line = line.trim_end_matches(['\n', '\r']);

            if let Some(value) = line.strip_prefix("event:") {
                self.event_name = Some(value.trim().to_string());
            } else if let Some(value) = line.strip_prefix("data:") {
                self.data.push_str(value.trim());
            } else if line.starts_with(':') {
                // Heartbeat comment; keeps intermediaries from idling out.
                debug!("stream heartbeat");
            } else if line.is_empty() {
                if !self.data.is_empty() {
                    match serde_json::from_str::<WorkspaceStreamEvent>(&self.data) {
                        Ok(event) => events.push(event),
                        Err(err) => {
                            warn!(error = %err, name = ?self.event_name, "unparseable stream event");
                        }
                    }
                }
                self.event_name = None;
                self.data.clear();
            }
        }

        events
    }
}

/// Follows the stream forever, forwarding events into the channel. Returns
/// when the receiving side hangs up.
pub async fn follow(api: ApiClient, events: mpsc::Sender<WorkspaceStreamEvent>) {
    loop {
        let response = match api.open_stream().await {
            Ok(response) => response,
            Err(err) => {
                warn!(error = %err, "stream connection failed, retrying");
                sleep(Duration::from_secs(1)).await;
                continue;
            }
        };

        let mut parser = SseParser::default();
        let mut chunks = response.bytes_stream();

        while let Some(chunk) = chunks.next().await {
            let bytes = match chunk {
                Ok(bytes) => bytes,
                Err(err) => {
                    warn!(error = %err, "stream chunk error");
                    break;
                }
            };

            for event in parser.feed(&String::from_utf8_lossy(&bytes)) {
                if events.send(event).await.is_err() {
                    return;
                }
            }
        }

        debug!("stream closed, reconnecting");
        sleep(Duration::from_secs(1)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::{ConnectedPayload, MessagesSyncedPayload};
    use uuid::Uuid;

    fn frame(event: &WorkspaceStreamEvent) -> String {
        format!(
            "event: {}\ndata: {}\n\n",
            event.name(),
            serde_json::to_string(event).unwrap()
        )
    }

    #[test]
    fn parses_a_complete_frame() {
        let workspace_id = Uuid::new_v4();
        let event = WorkspaceStreamEvent::Connected {
            payload: ConnectedPayload { workspace_id },
        };

        let mut parser = SseParser::default();
        let events = parser.feed(&frame(&event));

        assert_eq!(events, vec![event]);
    }

    #[test]
    fn reassembles_frames_split_across_chunks() {
        let event = WorkspaceStreamEvent::MessagesSynced {
            payload: MessagesSyncedPayload {
                conversation_id: Uuid::new_v4(),
            },
        };
        let wire = frame(&event);
        let (head, tail) = wire.split_at(wire.len() / 2);

        let mut parser = SseParser::default();
        assert!(parser.feed(head).is_empty());
        assert_eq!(parser.feed(tail), vec![event]);
    }

    #[test]
    fn ignores_heartbeat_comments_and_garbage() {
        let mut parser = SseParser::default();
        assert!(parser.feed(": keep-alive\n\n").is_empty());
        assert!(parser.feed("data: not json\n\n").is_empty());

        // The parser recovers: the next valid frame still comes through.
        let event = WorkspaceStreamEvent::MessagesSynced {
            payload: MessagesSyncedPayload {
                conversation_id: Uuid::new_v4(),
            },
        };
        assert_eq!(parser.feed(&frame(&event)), vec![event]);
    }

    #[test]
    fn parses_back_to_back_frames_in_one_chunk() {
        let first = WorkspaceStreamEvent::MessagesSynced {
            payload: MessagesSyncedPayload {
                conversation_id: Uuid::new_v4(),
            },
        };
        let second = WorkspaceStreamEvent::MessagesSynced {
            payload: MessagesSyncedPayload {
                conversation_id: Uuid::new_v4(),
            },
        };

        let mut parser = SseParser::default();
        let wire = format!("{}{}", frame(&first), frame(&second));
        assert_eq!(parser.feed(&wire), vec![first, second]);
    }
}
