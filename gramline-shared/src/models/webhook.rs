//! Inbound webhook payload shapes as delivered by the messaging platform.
//!
//! Deserialization is deliberately tolerant: the platform ships several
//! payload generations side by side, so collections default to empty and
//! most leaf fields are optional. Normalization into [`crate::models::message::MessageContent`]
//! happens server-side after parsing.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Top-level webhook body: zero or more entries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEnvelope {
    /// Platform object class, e.g. `instagram`.
    pub object: String,

    #[serde(default)]
    pub entry: Vec<WebhookEntry>,
}

/// One entry: events for a single connected account.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookEntry {
    /// Platform account the entry belongs to.
    pub id: String,

    /// Entry time, epoch milliseconds.
    #[serde(default)]
    pub time: i64,

    /// Direct-message events.
    #[serde(default)]
    pub messaging: Vec<MessagingEvent>,

    /// Change notifications (reactions, deletions). Log-only for now.
    #[serde(default)]
    pub changes: Vec<ChangeNotification>,
}

/// Party reference inside a messaging event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EventParty {
    pub id: String,
}

/// A single direct-message event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct MessagingEvent {
    pub sender: EventParty,
    pub recipient: EventParty,

    /// Event time, epoch milliseconds.
    #[serde(default)]
    pub timestamp: i64,

    /// The message body; absent for delivery/read receipts.
    #[serde(default)]
    pub message: Option<InboundMessage>,
}

/// Message body of a messaging event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundMessage {
    /// Platform-issued message identifier.
    pub mid: String,

    #[serde(default)]
    pub text: Option<String>,

    /// True when the event reports a message our own account sent.
    #[serde(default)]
    pub is_echo: bool,

    #[serde(default)]
    pub attachments: Vec<InboundAttachment>,
}

/// Attachment as delivered by the platform. `type` hints are unreliable for
/// generic shares, hence the URL heuristics downstream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct InboundAttachment {
    #[serde(rename = "type", default)]
    pub kind: Option<String>,

    #[serde(default)]
    pub payload: Option<AttachmentPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttachmentPayload {
    #[serde(default)]
    pub url: Option<String>,
}

/// Field-level change notification. Reserved for reactions/deletions.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChangeNotification {
    pub field: String,

    #[serde(default)]
    pub value: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parses_text_event() {
        let body = r#"{
            "object": "instagram",
            "entry": [{
                "id": "17841400000000001",
                "time": 1741444200000,
                "messaging": [{
                    "sender": {"id": "8412000000000042"},
                    "recipient": {"id": "17841400000000001"},
                    "timestamp": 1741444200000,
                    "message": {"mid": "mid.abc", "text": "hi there"}
                }]
            }]
        }"#;

        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        assert_eq!(envelope.entry.len(), 1);
        let event = &envelope.entry[0].messaging[0];
        assert_eq!(event.sender.id, "8412000000000042");
        let message = event.message.as_ref().unwrap();
        assert_eq!(message.mid, "mid.abc");
        assert_eq!(message.text.as_deref(), Some("hi there"));
        assert!(!message.is_echo);
    }

    #[test]
    fn test_parses_attachment_event_with_missing_fields() {
        let body = r#"{
            "object": "instagram",
            "entry": [{
                "id": "17841400000000001",
                "messaging": [{
                    "sender": {"id": "17841400000000001"},
                    "recipient": {"id": "8412000000000042"},
                    "message": {
                        "mid": "mid.def",
                        "is_echo": true,
                        "attachments": [{"payload": {"url": "https://cdn.example/x"}}]
                    }
                }]
            }]
        }"#;

        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        let message = envelope.entry[0].messaging[0].message.as_ref().unwrap();
        assert!(message.is_echo);
        assert_eq!(message.attachments.len(), 1);
        assert!(message.attachments[0].kind.is_none());
    }

    #[test]
    fn test_parses_change_notification_without_messaging() {
        let body = r#"{
            "object": "instagram",
            "entry": [{
                "id": "17841400000000001",
                "changes": [{"field": "message_reactions", "value": {"mid": "mid.abc"}}]
            }]
        }"#;

        let envelope: WebhookEnvelope = serde_json::from_str(body).unwrap();
        assert!(envelope.entry[0].messaging.is_empty());
        assert_eq!(envelope.entry[0].changes[0].field, "message_reactions");
    }
}
