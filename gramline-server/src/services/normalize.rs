//! Attachment normalization.
//!
//! Webhook attachments arrive in several shapes: typed image/video entries,
//! generic file shares, and bare payload URLs. Everything is folded into the
//! closed [`MessageContent`] union here, with an explicit precedence: the
//! platform's type hint wins, URL heuristics break ties for generic shares.

use shared::models::MessageContent;
use shared::models::webhook::{InboundAttachment, InboundMessage};

const IMAGE_EXTENSIONS: &[&str] = &["jpg", "jpeg", "png", "gif", "webp", "heic"];
const VIDEO_EXTENSIONS: &[&str] = &["mp4", "mov", "webm", "m4v"];
const AUDIO_EXTENSIONS: &[&str] = &["mp3", "m4a", "ogg", "wav", "aac"];
const AUDIO_KEYWORDS: &[&str] = &["audioclip", "voice_message"];

/// Normalizes a webhook message body into message content.
///
/// Text wins when present; otherwise the first attachment is classified.
/// Bodiless events with no attachments normalize to empty text, which the
/// store later treats as structurally empty.
#[must_use]
pub fn normalize_message(message: &InboundMessage) -> MessageContent {
    if let Some(text) = message.text.as_deref()
        && !text.is_empty()
    {
        return MessageContent::Text {
            body: text.to_string(),
        };
    }

    match message.attachments.first() {
        Some(attachment) => normalize_attachment(attachment),
        None => MessageContent::Text {
            body: String::new(),
        },
    }
}

/// Normalizes a message row returned by the platform's history API, which
/// reports text and a bare attachment URL with no type hint at all.
#[must_use]
pub fn normalize_platform_message(
    text: Option<&str>,
    attachment_url: Option<&str>,
) -> MessageContent {
    if let Some(text) = text
        && !text.is_empty()
    {
        return MessageContent::Text {
            body: text.to_string(),
        };
    }

    match attachment_url {
        Some(url) => classify_by_url(url.to_string()),
        None => MessageContent::Text {
            body: String::new(),
        },
    }
}

/// Classifies a single attachment.
#[must_use]
pub fn normalize_attachment(attachment: &InboundAttachment) -> MessageContent {
    let url = attachment
        .payload
        .as_ref()
        .and_then(|payload| payload.url.clone())
        .unwrap_or_default();

    match attachment.kind.as_deref() {
        Some("image") => MessageContent::Image { url },
        Some("video") => MessageContent::Video { url },
        Some("audio") => MessageContent::Audio { url },
        Some("file") => MessageContent::File { url },
        // Generic shares ("share", "template") and hintless payloads fall
        // through to URL sniffing.
        _ => classify_by_url(url),
    }
}

fn classify_by_url(url: String) -> MessageContent {
    let lowered = url.to_ascii_lowercase();
    let extension = url_extension(&lowered);

    if extension.is_some_and(|ext| IMAGE_EXTENSIONS.contains(&ext)) {
        return MessageContent::Image { url };
    }
    if extension.is_some_and(|ext| VIDEO_EXTENSIONS.contains(&ext)) {
        return MessageContent::Video { url };
    }
    if extension.is_some_and(|ext| AUDIO_EXTENSIONS.contains(&ext))
        || AUDIO_KEYWORDS.iter().any(|keyword| lowered.contains(keyword))
    {
        return MessageContent::Audio { url };
    }

    MessageContent::File { url }
}

/// Extension of the URL path, ignoring query and fragment.
fn url_extension(url: &str) -> Option<&str> {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let segment = path.rsplit('/').next()?;
    let (_, extension) = segment.rsplit_once('.')?;
    (!extension.is_empty()).then_some(extension)
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::webhook::AttachmentPayload;

    fn attachment(kind: Option<&str>, url: &str) -> InboundAttachment {
        InboundAttachment {
            kind: kind.map(str::to_string),
            payload: Some(AttachmentPayload {
                url: Some(url.to_string()),
            }),
        }
    }

    #[test]
    fn type_hint_takes_precedence_over_url() {
        // The hint wins even when the URL extension disagrees.
        let normalized = normalize_attachment(&attachment(Some("video"), "https://cdn.example/poster.jpg"));
        assert!(matches!(normalized, MessageContent::Video { .. }));
    }

    #[test]
    fn url_extension_classifies_generic_shares() {
        let cases = [
            ("https://cdn.example/a.jpg?sig=abc", "image"),
            ("https://cdn.example/clip.MP4", "video"),
            ("https://cdn.example/note.m4a", "audio"),
            ("https://cdn.example/report.pdf", "file"),
        ];

        for (url, expected) in cases {
            let normalized = normalize_attachment(&attachment(Some("share"), url));
            assert_eq!(normalized.to_string(), expected, "url {url}");
        }
    }

    #[test]
    fn audio_keyword_sniffing_handles_extensionless_urls() {
        let normalized =
            normalize_attachment(&attachment(None, "https://cdn.example/audioclip-173344"));
        assert!(matches!(normalized, MessageContent::Audio { .. }));
    }

    #[test]
    fn unclassifiable_urls_fall_back_to_file() {
        let normalized = normalize_attachment(&attachment(None, "https://cdn.example/blob"));
        assert!(matches!(normalized, MessageContent::File { .. }));
    }

    #[test]
    fn text_wins_over_attachments() {
        let message = InboundMessage {
            mid: "mid.1".into(),
            text: Some("look at this".into()),
            is_echo: false,
            attachments: vec![attachment(Some("image"), "https://cdn.example/a.jpg")],
        };

        assert!(matches!(
            normalize_message(&message),
            MessageContent::Text { .. }
        ));
    }

    #[test]
    fn bodiless_event_normalizes_to_empty_text() {
        let message = InboundMessage {
            mid: "mid.2".into(),
            text: None,
            is_echo: false,
            attachments: Vec::new(),
        };

        let normalized = normalize_message(&message);
        assert!(matches!(normalized, MessageContent::Text { ref body } if body.is_empty()));
    }
}
