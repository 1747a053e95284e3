//! Opaque keyset cursors for reverse-chronological message pagination.
//!
//! A cursor encodes the (sent_at, id) pair of the last row a page returned.
//! The next page selects rows strictly older under the total order
//! (sent_at DESC, id DESC), so pages never overlap or skip rows even while
//! new messages are inserted concurrently.

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

const CURSOR_VERSION: &str = "v1";

#[derive(Debug, Error, PartialEq, Eq)]
pub enum CursorError {
    #[error("cursor is not valid base64")]
    Encoding,
    #[error("cursor has an unsupported layout")]
    Layout,
}

/// Position of the last returned row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageCursor {
    pub sent_at: DateTime<Utc>,
    pub id: Uuid,
}

impl PageCursor {
    /// Serializes to the opaque wire form.
    #[must_use]
    pub fn encode(&self) -> String {
        let raw = format!(
            "{CURSOR_VERSION}:{}:{}",
            self.sent_at.timestamp_micros(),
            self.id
        );
        URL_SAFE_NO_PAD.encode(raw)
    }

    /// Parses the opaque wire form.
    ///
    /// # Errors
    /// Returns an error when the token is not one this server issued.
    pub fn decode(token: &str) -> Result<Self, CursorError> {
        let raw = URL_SAFE_NO_PAD
            .decode(token)
            .map_err(|_| CursorError::Encoding)?;
        let raw = String::from_utf8(raw).map_err(|_| CursorError::Encoding)?;

        let mut parts = raw.split(':');
        let (Some(version), Some(micros), Some(id), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(CursorError::Layout);
        };

        if version != CURSOR_VERSION {
            return Err(CursorError::Layout);
        }

        let micros: i64 = micros.parse().map_err(|_| CursorError::Layout)?;
        let sent_at = DateTime::<Utc>::from_timestamp_micros(micros).ok_or(CursorError::Layout)?;
        let id = Uuid::parse_str(id).map_err(|_| CursorError::Layout)?;

        Ok(Self { sent_at, id })
    }

    /// Whether a row at (sent_at, id) is strictly older than this cursor
    /// under the (sent_at DESC, id DESC) total order.
    #[must_use]
    pub fn is_after(&self, sent_at: DateTime<Utc>, id: Uuid) -> bool {
        (sent_at, id) < (self.sent_at, self.id)
    }
}
