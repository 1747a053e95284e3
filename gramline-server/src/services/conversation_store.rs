//! Durable conversation storage.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracing::instrument;
use uuid::Uuid;

use shared::models::{Conversation, SyncState, Timestamp};

/// How an activity touch should treat the unread counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnreadAction {
    /// Inbound, counterpart-authored: add one.
    Increment,
    /// The workspace replied (or an echo confirmed it): force to zero.
    Clear,
    /// Metadata-only touch.
    Keep,
}

/// Fields needed to create or refresh a conversation row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewConversation {
    pub workspace_id: Uuid,
    pub account_id: String,
    pub participant_id: String,
    pub participant_name: Option<String>,
    pub last_activity_at: Timestamp,
}

#[async_trait]
pub trait ConversationStore: Send + Sync {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>>;

    /// Lookup scoped by connected account: (workspace, account, participant).
    async fn find_scoped(
        &self,
        workspace_id: Uuid,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Relaxed lookup without the account scope, supporting rows created
    /// before account scoping existed.
    async fn find_relaxed(
        &self,
        workspace_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<Conversation>>;

    /// Creates the conversation or refreshes its display metadata; unique on
    /// (workspace, participant).
    async fn upsert(&self, conversation: &NewConversation) -> Result<Conversation>;

    /// Records activity: preview, last-activity time, unread accounting.
    async fn record_activity(
        &self,
        id: Uuid,
        preview: &str,
        at: Timestamp,
        unread: UnreadAction,
    ) -> Result<()>;

    async fn set_avatar(&self, id: Uuid, url: &str) -> Result<()>;

    async fn set_sync_state(&self, id: Uuid, state: SyncState) -> Result<()>;

    /// Workspace listing, most recent activity first.
    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Conversation>>;
}

/// Postgres-backed conversation store.
#[derive(Debug, Clone)]
pub struct PgConversationStore {
    pool: PgPool,
}

impl PgConversationStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ConversationRow {
    id: Uuid,
    workspace_id: Uuid,
    account_id: String,
    participant_id: String,
    participant_name: Option<String>,
    participant_avatar_url: Option<String>,
    last_preview: String,
    last_activity_at: DateTime<Utc>,
    unread_count: i64,
    sync_state: String,
}

impl ConversationRow {
    fn into_conversation(self) -> Conversation {
        Conversation {
            id: self.id,
            workspace_id: self.workspace_id,
            account_id: self.account_id,
            participant_id: self.participant_id,
            participant_name: self.participant_name,
            participant_avatar_url: self.participant_avatar_url,
            last_preview: self.last_preview,
            last_activity_at: Timestamp(self.last_activity_at),
            unread_count: self.unread_count,
            sync_state: SyncState::try_from(self.sync_state.as_str()).unwrap_or(SyncState::Pending),
        }
    }
}

const CONVERSATION_COLUMNS: &str = "id, workspace_id, account_id, participant_id, \
     participant_name, participant_avatar_url, last_preview, last_activity_at, \
     unread_count, sync_state";

#[async_trait]
impl ConversationStore for PgConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations WHERE id = $1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ConversationRow::into_conversation))
    }

    async fn find_scoped(
        &self,
        workspace_id: Uuid,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE workspace_id = $1 AND account_id = $2 AND participant_id = $3"
        ))
        .bind(workspace_id)
        .bind(account_id)
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ConversationRow::into_conversation))
    }

    async fn find_relaxed(
        &self,
        workspace_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<Conversation>> {
        let row: Option<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE workspace_id = $1 AND participant_id = $2 \
             ORDER BY last_activity_at DESC LIMIT 1"
        ))
        .bind(workspace_id)
        .bind(participant_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(ConversationRow::into_conversation))
    }

    #[instrument(name = "conversations.upsert", skip(self, conversation), err)]
    async fn upsert(&self, conversation: &NewConversation) -> Result<Conversation> {
        let row: ConversationRow = sqlx::query_as(&format!(
            "INSERT INTO conversations \
                 (id, workspace_id, account_id, participant_id, participant_name, \
                  last_preview, last_activity_at, unread_count, sync_state) \
             VALUES ($1, $2, $3, $4, $5, '', $6, 0, 'pending') \
             ON CONFLICT (workspace_id, participant_id) DO UPDATE SET \
                 account_id = EXCLUDED.account_id, \
                 participant_name = COALESCE(EXCLUDED.participant_name, conversations.participant_name), \
                 last_activity_at = GREATEST(conversations.last_activity_at, EXCLUDED.last_activity_at) \
             RETURNING {CONVERSATION_COLUMNS}"
        ))
        .bind(Uuid::new_v4())
        .bind(conversation.workspace_id)
        .bind(&conversation.account_id)
        .bind(&conversation.participant_id)
        .bind(&conversation.participant_name)
        .bind(conversation.last_activity_at.0)
        .fetch_one(&self.pool)
        .await?;

        Ok(row.into_conversation())
    }

    async fn record_activity(
        &self,
        id: Uuid,
        preview: &str,
        at: Timestamp,
        unread: UnreadAction,
    ) -> Result<()> {
        let unread_expr = match unread {
            UnreadAction::Increment => "unread_count + 1",
            UnreadAction::Clear => "0",
            UnreadAction::Keep => "unread_count",
        };

        sqlx::query(&format!(
            "UPDATE conversations SET \
                 last_preview = $1, \
                 last_activity_at = GREATEST(last_activity_at, $2), \
                 unread_count = {unread_expr} \
             WHERE id = $3"
        ))
        .bind(preview)
        .bind(at.0)
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> Result<()> {
        sqlx::query("UPDATE conversations SET participant_avatar_url = $1 WHERE id = $2")
            .bind(url)
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn set_sync_state(&self, id: Uuid, state: SyncState) -> Result<()> {
        sqlx::query("UPDATE conversations SET sync_state = $1 WHERE id = $2")
            .bind(state.as_str())
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Conversation>> {
        let rows: Vec<ConversationRow> = sqlx::query_as(&format!(
            "SELECT {CONVERSATION_COLUMNS} FROM conversations \
             WHERE workspace_id = $1 ORDER BY last_activity_at DESC"
        ))
        .bind(workspace_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(ConversationRow::into_conversation).collect())
    }
}
