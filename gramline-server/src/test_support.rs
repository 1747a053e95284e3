//! In-memory store and platform fakes for handler and service tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::Result;
use async_trait::async_trait;
use uuid::Uuid;

use shared::models::{Conversation, Message, MessagePage, SyncState, Timestamp};

use crate::app_state::AppState;
use crate::platform::{
    MessagingPlatform, OutboundAttachmentKind, PlatformConversation, PlatformError,
    PlatformMessage,
};
use crate::services::conversation_store::{
    ConversationStore, NewConversation, UnreadAction,
};
use crate::services::cursor::PageCursor;
use crate::services::message_store::{
    ConfirmedMessage, MessageStore, PageError, UpsertOutcome, assemble_page,
};
use crate::services::workspace_store::{WorkspaceAccount, WorkspaceStore};
use shared::models::{DeliveryState, MessageDirection};

#[derive(Default)]
pub struct InMemoryWorkspaceStore {
    pub accounts: Vec<WorkspaceAccount>,
    pub sessions: HashMap<String, Uuid>,
}

#[async_trait]
impl WorkspaceStore for InMemoryWorkspaceStore {
    async fn find_by_account_id(&self, account_id: &str) -> Result<Option<WorkspaceAccount>> {
        Ok(self
            .accounts
            .iter()
            .find(|account| account.account_id == account_id)
            .cloned())
    }

    async fn find_session_workspace(&self, token: &str) -> Result<Option<Uuid>> {
        Ok(self.sessions.get(token).copied())
    }
}

#[derive(Default)]
pub struct InMemoryConversationStore {
    rows: Mutex<Vec<Conversation>>,
}

impl InMemoryConversationStore {
    pub fn with_rows(rows: Vec<Conversation>) -> Self {
        Self {
            rows: Mutex::new(rows),
        }
    }

    pub fn snapshot(&self) -> Vec<Conversation> {
        self.rows.lock().unwrap().clone()
    }
}

#[async_trait]
impl ConversationStore for InMemoryConversationStore {
    async fn get(&self, id: Uuid) -> Result<Option<Conversation>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.id == id)
            .cloned())
    }

    async fn find_scoped(
        &self,
        workspace_id: Uuid,
        account_id: &str,
        participant_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| {
                row.workspace_id == workspace_id
                    && row.account_id == account_id
                    && row.participant_id == participant_id
            })
            .cloned())
    }

    async fn find_relaxed(
        &self,
        workspace_id: Uuid,
        participant_id: &str,
    ) -> Result<Option<Conversation>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .iter()
            .find(|row| row.workspace_id == workspace_id && row.participant_id == participant_id)
            .cloned())
    }

    async fn upsert(&self, conversation: &NewConversation) -> Result<Conversation> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(existing) = rows.iter_mut().find(|row| {
            row.workspace_id == conversation.workspace_id
                && row.participant_id == conversation.participant_id
        }) {
            existing.account_id = conversation.account_id.clone();
            if conversation.participant_name.is_some() {
                existing.participant_name = conversation.participant_name.clone();
            }
            return Ok(existing.clone());
        }

        let row = Conversation {
            id: Uuid::new_v4(),
            workspace_id: conversation.workspace_id,
            account_id: conversation.account_id.clone(),
            participant_id: conversation.participant_id.clone(),
            participant_name: conversation.participant_name.clone(),
            participant_avatar_url: None,
            last_preview: String::new(),
            last_activity_at: conversation.last_activity_at,
            unread_count: 0,
            sync_state: SyncState::Pending,
        };
        rows.push(row.clone());
        Ok(row)
    }

    async fn record_activity(
        &self,
        id: Uuid,
        preview: &str,
        at: Timestamp,
        unread: UnreadAction,
    ) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.last_preview = preview.to_string();
            row.last_activity_at = row.last_activity_at.max(at);
            row.unread_count = match unread {
                UnreadAction::Increment => row.unread_count + 1,
                UnreadAction::Clear => 0,
                UnreadAction::Keep => row.unread_count,
            };
        }
        Ok(())
    }

    async fn set_avatar(&self, id: Uuid, url: &str) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.participant_avatar_url = Some(url.to_string());
        }
        Ok(())
    }

    async fn set_sync_state(&self, id: Uuid, state: SyncState) -> Result<()> {
        let mut rows = self.rows.lock().unwrap();
        if let Some(row) = rows.iter_mut().find(|row| row.id == id) {
            row.sync_state = state;
        }
        Ok(())
    }

    async fn list_for_workspace(&self, workspace_id: Uuid) -> Result<Vec<Conversation>> {
        let mut rows: Vec<Conversation> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .filter(|row| row.workspace_id == workspace_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.last_activity_at.cmp(&a.last_activity_at));
        Ok(rows)
    }
}

#[derive(Default)]
pub struct InMemoryMessageStore {
    rows: Mutex<Vec<(Uuid, Message)>>,
}

impl InMemoryMessageStore {
    pub fn snapshot(&self) -> Vec<Message> {
        self.rows
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .collect()
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn upsert_confirmed(
        &self,
        workspace_id: Uuid,
        conversation_id: Uuid,
        message: &ConfirmedMessage,
    ) -> Result<UpsertOutcome> {
        let mut rows = self.rows.lock().unwrap();

        if let Some((_, existing)) = rows.iter_mut().find(|(workspace, row)| {
            *workspace == workspace_id && row.external_id.as_deref() == Some(&message.external_id)
        }) {
            // Attachment-URL backfill is the only permitted mutation.
            if existing.content.media_url().is_none_or(str::is_empty)
                && message.content.media_url().is_some()
            {
                existing.content = message.content.clone();
            }
            return Ok(UpsertOutcome::Duplicate);
        }

        rows.push((
            workspace_id,
            Message {
                id: Uuid::new_v4(),
                external_id: Some(message.external_id.clone()),
                conversation_id,
                direction: message.direction,
                content: message.content.clone(),
                sent_at: message.sent_at,
                state: DeliveryState::Confirmed,
            },
        ));
        Ok(UpsertOutcome::Inserted)
    }

    async fn page(
        &self,
        conversation_id: Uuid,
        limit: usize,
        cursor: Option<&str>,
    ) -> Result<MessagePage, PageError> {
        let cursor = cursor.map(PageCursor::decode).transpose()?;

        let mut messages: Vec<Message> = self
            .rows
            .lock()
            .unwrap()
            .iter()
            .map(|(_, message)| message.clone())
            .filter(|message| {
                message.conversation_id == conversation_id && !message.is_structurally_empty()
            })
            .filter(|message| {
                cursor.is_none_or(|cursor| cursor.is_after(message.sent_at.0, message.id))
            })
            .collect();

        messages.sort_by(|a, b| (b.sent_at.0, b.id).cmp(&(a.sent_at.0, a.id)));
        messages.truncate(limit + 1);

        Ok(assemble_page(messages, limit))
    }

    async fn latest(&self, conversation_id: Uuid, limit: usize) -> Result<Vec<Message>> {
        let page = self.page(conversation_id, limit, None).await.map_err(
            |err| match err {
                PageError::Store(inner) => inner,
                PageError::Cursor(_) => anyhow::anyhow!("unexpected cursor error"),
            },
        )?;
        Ok(page.messages)
    }
}

/// What an outbound platform call recorded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentPayload {
    pub account_id: String,
    pub recipient_id: String,
    pub body: String,
}

#[derive(Default)]
pub struct StubPlatform {
    pub conversations: Vec<PlatformConversation>,
    pub recent: Vec<PlatformMessage>,
    pub profile_pictures: HashMap<String, String>,
    pub fail_sends: bool,
    pub sent: Mutex<Vec<SentPayload>>,
}

#[async_trait]
impl MessagingPlatform for StubPlatform {
    async fn send_text(
        &self,
        account_id: &str,
        recipient_id: &str,
        text: &str,
    ) -> Result<(), PlatformError> {
        if self.fail_sends {
            return Err(PlatformError::RateLimited);
        }
        self.sent.lock().unwrap().push(SentPayload {
            account_id: account_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: text.to_string(),
        });
        Ok(())
    }

    async fn send_attachment(
        &self,
        account_id: &str,
        recipient_id: &str,
        _kind: OutboundAttachmentKind,
        url: &str,
    ) -> Result<(), PlatformError> {
        if self.fail_sends {
            return Err(PlatformError::RateLimited);
        }
        self.sent.lock().unwrap().push(SentPayload {
            account_id: account_id.to_string(),
            recipient_id: recipient_id.to_string(),
            body: url.to_string(),
        });
        Ok(())
    }

    async fn recent_messages(
        &self,
        _account_id: &str,
        _participant_id: &str,
        limit: usize,
    ) -> Result<Vec<PlatformMessage>, PlatformError> {
        Ok(self.recent.iter().take(limit).cloned().collect())
    }

    async fn list_conversations(
        &self,
        _account_id: &str,
    ) -> Result<Vec<PlatformConversation>, PlatformError> {
        Ok(self.conversations.clone())
    }

    async fn profile_picture(
        &self,
        participant_id: &str,
    ) -> Result<Option<String>, PlatformError> {
        Ok(self.profile_pictures.get(participant_id).cloned())
    }
}

/// Bundles the fakes behind an [`AppState`] for router tests.
pub struct TestHarness {
    pub state: Arc<AppState>,
    pub workspaces: Arc<InMemoryWorkspaceStore>,
    pub conversations: Arc<InMemoryConversationStore>,
    pub messages: Arc<InMemoryMessageStore>,
    pub platform: Arc<StubPlatform>,
}

impl TestHarness {
    pub fn new(
        workspaces: InMemoryWorkspaceStore,
        conversations: InMemoryConversationStore,
        platform: StubPlatform,
    ) -> Self {
        let workspaces = Arc::new(workspaces);
        let conversations = Arc::new(conversations);
        let messages = Arc::new(InMemoryMessageStore::default());
        let platform = Arc::new(platform);

        let state = Arc::new(AppState::new(
            None,
            workspaces.clone(),
            conversations.clone(),
            messages.clone(),
            platform.clone(),
        ));

        Self {
            state,
            workspaces,
            conversations,
            messages,
            platform,
        }
    }
}
