//! Durable message storage with cursor pagination.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::trace;
use uuid::Uuid;

use shared::models::{
    DeliveryState, Message, MessageContent, MessageDirection, MessagePage, Timestamp,
};

use super::cursor::{CursorError, PageCursor};

/// A confirmed message ready for persistence. Identity is the platform's
/// external id; the internal row id is issued on insert.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfirmedMessage {
    pub external_id: String,
    pub direction: MessageDirection,
    pub content: MessageContent,
    pub sent_at: Timestamp,
}

/// Result of an idempotent upsert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A new row was created.
    Inserted,
    /// The external id was already stored; at most the attachment URL was
    /// backfilled.
    Duplicate,
}

#[async_trait]
pub trait MessageStore: Send + Sync {
    /// Upserts a confirmed message keyed on (workspace, external id).
    /// Redelivery must not create a second row; a confirmed row is immutable
    /// except for attachment-URL backfill.
    async fn upsert_confirmed(
        &self,
        workspace_id: Uuid,
        conversation_id: Uuid,
        message: &ConfirmedMessage,
    ) -> Result<UpsertOutcome>;

    /// One page of a conversation's history, newest first, strictly ordered
    /// by (sent_at, id) descending. Structurally-empty records are excluded
    /// before pagination math so `has_more` reflects meaningful messages.
    async fn page(
        &self,
        conversation_id: Uuid,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MessagePage, PageError>;

    /// The newest N meaningful messages of a conversation.
    async fn latest(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<Message>>;
}

#[derive(Debug, thiserror::Error)]
pub enum PageError {
    #[error(transparent)]
    Cursor(#[from] CursorError),
    #[error(transparent)]
    Store(#[from] anyhow::Error),
}

/// Postgres-backed message store.
#[derive(Debug, Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct MessageRow {
    id: Uuid,
    external_id: String,
    conversation_id: Uuid,
    direction: String,
    kind: String,
    body: Option<String>,
    media_url: Option<String>,
    sent_at: DateTime<Utc>,
}

/// Splits content into the (kind, body, media_url) column triple.
fn content_columns(content: &MessageContent) -> (&'static str, Option<&str>, Option<&str>) {
    match content {
        MessageContent::Text { body } => ("text", Some(body.as_str()), None),
        MessageContent::Image { url } => ("image", None, Some(url.as_str())),
        MessageContent::Video { url } => ("video", None, Some(url.as_str())),
        MessageContent::Audio { url } => ("audio", None, Some(url.as_str())),
        MessageContent::File { url } => ("file", None, Some(url.as_str())),
    }
}

/// Rebuilds content from the column triple. Unknown kinds degrade to text so
/// a forward-compatible row never poisons a page.
fn content_from_columns(kind: &str, body: Option<String>, media_url: Option<String>) -> MessageContent {
    let url = media_url.unwrap_or_default();
    match kind {
        "image" => MessageContent::Image { url },
        "video" => MessageContent::Video { url },
        "audio" => MessageContent::Audio { url },
        "file" => MessageContent::File { url },
        _ => MessageContent::Text {
            body: body.unwrap_or_default(),
        },
    }
}

impl MessageRow {
    fn into_message(self) -> Message {
        let direction = MessageDirection::try_from(self.direction.as_str())
            .unwrap_or(MessageDirection::Inbound);

        Message {
            id: self.id,
            external_id: Some(self.external_id),
            conversation_id: self.conversation_id,
            direction,
            content: content_from_columns(&self.kind, self.body, self.media_url),
            sent_at: Timestamp(self.sent_at),
            state: DeliveryState::Confirmed,
        }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn upsert_confirmed(
        &self,
        workspace_id: Uuid,
        conversation_id: Uuid,
        message: &ConfirmedMessage,
    ) -> Result<UpsertOutcome> {
        let (kind, body, media_url) = content_columns(&message.content);

        let inserted = sqlx::query(
            "INSERT INTO messages \
                 (id, workspace_id, conversation_id, external_id, direction, kind, body, media_url, sent_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9) \
             ON CONFLICT (workspace_id, external_id) DO NOTHING",
        )
        .bind(Uuid::new_v4())
        .bind(workspace_id)
        .bind(conversation_id)
        .bind(&message.external_id)
        .bind(message.direction.as_str())
        .bind(kind)
        .bind(body)
        .bind(media_url)
        .bind(message.sent_at.0)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if inserted > 0 {
            trace!(external_id = %message.external_id, "stored confirmed message");
            return Ok(UpsertOutcome::Inserted);
        }

        // Redelivery. The only mutation a confirmed row accepts is filling a
        // media URL that was previously missing.
        if let Some(url) = media_url {
            sqlx::query(
                "UPDATE messages SET media_url = $1 \
                 WHERE workspace_id = $2 AND external_id = $3 AND media_url IS NULL",
            )
            .bind(url)
            .bind(workspace_id)
            .bind(&message.external_id)
            .execute(&self.pool)
            .await?;
        }

        Ok(UpsertOutcome::Duplicate)
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MessagePage, PageError> {
        let cursor = cursor.map(PageCursor::decode).transpose()?;
        let limit = limit.clamp(1, 200);

        // Probe one row past the limit to learn whether older rows remain.
        let probe = i64::try_from(limit + 1).unwrap_or(i64::MAX);

        let rows: Vec<MessageRow> = match cursor {
            Some(cursor) => {
                sqlx::query_as(
                    "SELECT id, external_id, conversation_id, direction, kind, body, media_url, sent_at \
                     FROM messages \
                     WHERE conversation_id = $1 \
                       AND NOT (kind = 'text' AND COALESCE(TRIM(body), '') = '') \
                       AND (sent_at, id) < ($2, $3) \
                     ORDER BY sent_at DESC, id DESC \
                     LIMIT $4",
                )
                .bind(conversation_id)
                .bind(cursor.sent_at)
                .bind(cursor.id)
                .bind(probe)
                .fetch_all(&self.pool)
                .await
                .map_err(|err| PageError::Store(err.into()))?
            }
            None => {
                sqlx::query_as(
                    "SELECT id, external_id, conversation_id, direction, kind, body, media_url, sent_at \
                     FROM messages \
                     WHERE conversation_id = $1 \
                       AND NOT (kind = 'text' AND COALESCE(TRIM(body), '') = '') \
                     ORDER BY sent_at DESC, id DESC \
                     LIMIT $2",
                )
                .bind(conversation_id)
                .bind(probe)
                .fetch_all(&self.pool)
                .await
                .map_err(|err| PageError::Store(err.into()))?
            }
        };

        Ok(assemble_page(
            rows.into_iter().map(MessageRow::into_message).collect(),
            limit,
        ))
    }

    async fn latest(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        let limit = i64::try_from(limit.clamp(1, 50)).unwrap_or(1);

        let rows: Vec<MessageRow> = sqlx::query_as(
            "SELECT id, external_id, conversation_id, direction, kind, body, media_url, sent_at \
             FROM messages \
             WHERE conversation_id = $1 \
               AND NOT (kind = 'text' AND COALESCE(TRIM(body), '') = '') \
             ORDER BY sent_at DESC, id DESC \
             LIMIT $2",
        )
        .bind(conversation_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(MessageRow::into_message).collect())
    }
}

/// Turns an over-fetched (limit + 1) row set into a page with cursor
/// metadata. Shared by the Postgres store and the in-memory test double so
/// both pagination paths agree on cursor semantics.
pub(crate) fn assemble_page(mut messages: Vec<Message>, limit: usize) -> MessagePage {
    let has_more = messages.len() > limit;
    messages.truncate(limit);

    let next_cursor = if has_more {
        messages.last().map(|last| {
            PageCursor {
                sent_at: last.sent_at.0,
                id: last.id,
            }
            .encode()
        })
    } else {
        None
    };

    MessagePage {
        messages,
        next_cursor,
        has_more,
    }
}
