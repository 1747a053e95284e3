//! Webhook ingestion: normalize, resolve, persist, broadcast.

use std::sync::Arc;

use metrics::counter;
use thiserror::Error;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use shared::models::webhook::{ChangeNotification, MessagingEvent, WebhookEnvelope};
use shared::models::{
    Conversation, DeliveryState, Message, MessageDirection, MessageEventPayload, SyncState,
    Timestamp, UserStatusPayload, WorkspaceStreamEvent,
};

use super::broadcaster::SharedBroadcaster;
use super::conversation_store::{ConversationStore, NewConversation, UnreadAction};
use super::message_store::{ConfirmedMessage, MessageStore, UpsertOutcome};
use super::normalize::normalize_message;
use super::workspace_store::{WorkspaceAccount, WorkspaceStore};
use crate::platform::MessagingPlatform;

#[derive(Debug, Error)]
pub enum IngestError {
    #[error("store operation failed: {0}")]
    Store(#[from] anyhow::Error),
}

/// Processes verified webhook payloads.
///
/// Instances are cheap: every field is a shared handle, and the webhook
/// handler constructs one per request.
#[derive(Clone)]
pub struct IngestService {
    workspaces: Arc<dyn WorkspaceStore>,
    conversations: Arc<dyn ConversationStore>,
    messages: Arc<dyn MessageStore>,
    platform: Arc<dyn MessagingPlatform>,
    broadcaster: SharedBroadcaster,
}

impl std::fmt::Debug for IngestService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IngestService").finish()
    }
}

impl IngestService {
    pub fn new(
        workspaces: Arc<dyn WorkspaceStore>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        platform: Arc<dyn MessagingPlatform>,
        broadcaster: SharedBroadcaster,
    ) -> Self {
        Self {
            workspaces,
            conversations,
            messages,
            platform,
            broadcaster,
        }
    }

    /// Processes every event in a verified envelope. Individual events that
    /// cannot be attributed to a workspace are dropped; store failures abort
    /// the envelope so the platform retries delivery (all writes are
    /// idempotent upserts, so replays are safe).
    #[instrument(name = "ingest.envelope", skip_all, fields(entries = envelope.entry.len()))]
    pub async fn process_envelope(&self, envelope: &WebhookEnvelope) -> Result<(), IngestError> {
        for entry in &envelope.entry {
            for event in &entry.messaging {
                self.process_messaging_event(event).await?;
            }
            for change in &entry.changes {
                log_change_notification(change);
            }
        }

        Ok(())
    }

    #[instrument(name = "ingest.event", skip_all, fields(sender = %event.sender.id))]
    async fn process_messaging_event(&self, event: &MessagingEvent) -> Result<(), IngestError> {
        let Some(inbound) = event.message.as_ref() else {
            debug!("messaging event without message body, skipping");
            return Ok(());
        };

        // Exactly one side of the event must be a connected account; that
        // side is us, the other side is the counterpart.
        let Some((account, counterpart_id, from_me)) = self.resolve_identity(event).await? else {
            debug!("event does not involve a connected account, dropping");
            counter!("gramline_ingest_events_total", "outcome" => "unknown_account").increment(1);
            return Ok(());
        };

        let from_me = from_me || inbound.is_echo;
        let sent_at = Timestamp::from_epoch_millis(event.timestamp);
        let content = normalize_message(inbound);

        let conversation = self.resolve_conversation(&account, &counterpart_id).await?;

        let direction = if from_me {
            MessageDirection::Outbound
        } else {
            MessageDirection::Inbound
        };

        let mut message = Message {
            id: Uuid::new_v4(),
            external_id: Some(inbound.mid.clone()),
            conversation_id: Uuid::nil(),
            direction,
            content: content.clone(),
            sent_at,
            state: DeliveryState::Confirmed,
        };

        match conversation {
            Some(conversation) => {
                message.conversation_id = conversation.id;

                let outcome = self
                    .messages
                    .upsert_confirmed(
                        account.workspace_id,
                        conversation.id,
                        &ConfirmedMessage {
                            external_id: inbound.mid.clone(),
                            direction,
                            content: content.clone(),
                            sent_at,
                        },
                    )
                    .await?;

                // Unread accounting keys off actual insertion so a webhook
                // redelivery can never double-count.
                let unread = match (outcome, from_me) {
                    (_, true) => UnreadAction::Clear,
                    (UpsertOutcome::Inserted, false) => UnreadAction::Increment,
                    (UpsertOutcome::Duplicate, false) => UnreadAction::Keep,
                };

                self.conversations
                    .record_activity(conversation.id, &content.preview(), sent_at, unread)
                    .await?;

                if !from_me && conversation.participant_avatar_url.is_none() {
                    self.spawn_profile_refresh(&conversation);
                }

                counter!("gramline_ingest_events_total", "outcome" => "stored").increment(1);
                self.broadcast_message(account.workspace_id, Some(conversation.id), from_me, message);
            }
            None => {
                // Resolution miss is recoverable: skip persistence and let
                // the clients self-heal through a full refetch.
                warn!(
                    workspace = %account.workspace_id,
                    counterpart = %counterpart_id,
                    "conversation unresolved after refetch, broadcasting without persistence"
                );
                counter!("gramline_ingest_events_total", "outcome" => "unresolved").increment(1);
                self.broadcast_message(account.workspace_id, None, from_me, message);
            }
        }

        Ok(())
    }

    /// Matches the event's sender/recipient against the connected-account
    /// index. Returns the account, the counterpart id, and whether the
    /// connected account authored the event.
    async fn resolve_identity(
        &self,
        event: &MessagingEvent,
    ) -> Result<Option<(WorkspaceAccount, String, bool)>, IngestError> {
        if let Some(account) = self.workspaces.find_by_account_id(&event.sender.id).await? {
            return Ok(Some((account, event.recipient.id.clone(), true)));
        }

        if let Some(account) = self
            .workspaces
            .find_by_account_id(&event.recipient.id)
            .await?
        {
            return Ok(Some((account, event.sender.id.clone(), false)));
        }

        Ok(None)
    }

    /// Two-step conversation resolution with a one-shot refetch fallback.
    ///
    /// The relaxed second step can, in a workspace with several connected
    /// accounts, pick the other account's conversation when both talk to the
    /// same counterpart; the warn log keeps that ambiguity operator-visible.
    async fn resolve_conversation(
        &self,
        account: &WorkspaceAccount,
        counterpart_id: &str,
    ) -> Result<Option<Conversation>, IngestError> {
        if let Some(conversation) = self
            .conversations
            .find_scoped(account.workspace_id, &account.account_id, counterpart_id)
            .await?
        {
            return Ok(Some(conversation));
        }

        if let Some(conversation) = self
            .conversations
            .find_relaxed(account.workspace_id, counterpart_id)
            .await?
        {
            warn!(
                workspace = %account.workspace_id,
                account = %account.account_id,
                matched_account = %conversation.account_id,
                "conversation resolved through relaxed lookup"
            );
            return Ok(Some(conversation));
        }

        // Unknown counterpart: refresh the conversation list from the
        // platform once and retry. A platform failure here degrades to an
        // unresolved event rather than failing the webhook.
        match self.platform.list_conversations(&account.account_id).await {
            Ok(listing) => {
                info!(
                    workspace = %account.workspace_id,
                    count = listing.len(),
                    "refetched conversation list from platform"
                );
                for remote in listing {
                    let upserted = self
                        .conversations
                        .upsert(&NewConversation {
                            workspace_id: account.workspace_id,
                            account_id: account.account_id.clone(),
                            participant_id: remote.participant_id.clone(),
                            participant_name: remote.participant_name.clone(),
                            last_activity_at: remote.updated_at,
                        })
                        .await?;
                    self.conversations
                        .set_sync_state(upserted.id, SyncState::Done)
                        .await?;
                }
            }
            Err(err) => {
                warn!(error = %err, "conversation refetch failed, continuing unresolved");
            }
        }

        let retried = self
            .conversations
            .find_scoped(account.workspace_id, &account.account_id, counterpart_id)
            .await?;

        if let Some(conversation) = &retried {
            debug!(conversation = %conversation.id, "conversation resolved after refetch");
        }

        Ok(retried)
    }

    /// Best-effort avatar refresh for first-time inbound senders. Failures
    /// must never fail the webhook, so the work is detached and the error
    /// swallowed with a log line.
    fn spawn_profile_refresh(&self, conversation: &Conversation) {
        let platform = Arc::clone(&self.platform);
        let conversations = Arc::clone(&self.conversations);
        let broadcaster = Arc::clone(&self.broadcaster);
        let conversation_id = conversation.id;
        let workspace_id = conversation.workspace_id;
        let participant_id = conversation.participant_id.clone();

        tokio::spawn(async move {
            match platform.profile_picture(&participant_id).await {
                Ok(Some(url)) => {
                    if let Err(err) = conversations.set_avatar(conversation_id, &url).await {
                        warn!(error = %err, "failed to store refreshed avatar");
                        return;
                    }
                    broadcaster.publish(
                        workspace_id,
                        &WorkspaceStreamEvent::UserStatusUpdated {
                            payload: UserStatusPayload {
                                participant_id,
                                avatar_url: Some(url),
                            },
                        },
                    );
                }
                Ok(None) => {}
                Err(err) => {
                    warn!(error = %err, participant = %participant_id, "profile refresh failed");
                }
            }
        });
    }

    fn broadcast_message(
        &self,
        workspace_id: Uuid,
        conversation_id: Option<Uuid>,
        from_me: bool,
        message: Message,
    ) {
        let payload = MessageEventPayload {
            conversation_id,
            from_me,
            message,
        };

        let event = if from_me {
            WorkspaceStreamEvent::MessageEcho { payload }
        } else {
            WorkspaceStreamEvent::NewMessage { payload }
        };

        self.broadcaster.publish(workspace_id, &event);
    }
}

fn log_change_notification(change: &ChangeNotification) {
    // Reactions and deletions arrive here; handling is reserved.
    info!(field = %change.field, "change notification received");
}
