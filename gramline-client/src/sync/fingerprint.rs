//! Content fingerprints used to match optimistic sends to their echoes.
//!
//! The platform does not echo our temporary ids back, so an echo can only be
//! matched to a pending send by content. The fingerprint is deliberately
//! coarse (body for text, kind plus URL for attachments): two sends with
//! identical text produce identical fingerprints, and the FIFO queue
//! discipline in the engine is what keeps their confirmations from colliding.

use shared::models::MessageContent;

#[must_use]
pub fn fingerprint(content: &MessageContent) -> String {
    match content {
        MessageContent::Text { body } => format!("text:{body}"),
        MessageContent::Image { url } => format!("image:{url}"),
        MessageContent::Video { url } => format!("video:{url}"),
        MessageContent::Audio { url } => format!("audio:{url}"),
        MessageContent::File { url } => format!("file:{url}"),
    }
}
