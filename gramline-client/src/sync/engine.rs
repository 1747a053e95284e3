//! Per-conversation reconciliation engine.
//!
//! One engine runs per dashboard session and keeps each conversation's local
//! message list consistent across three concurrent inputs: background history
//! fetches, live stream events, and the user's own optimistic sends. State is
//! fully partitioned by conversation id; nothing here crosses conversations.
//!
//! The engine is purely synchronous. The command loop that owns it is the
//! single writer, which is what serializes mutations per conversation.

use std::collections::{HashMap, VecDeque};

use tracing::debug;
use uuid::Uuid;

use shared::models::{
    DeliveryState, Message, MessageContent, MessageDirection, Timestamp, WorkspaceStreamEvent,
};

use super::cache::MessageCache;
use super::fingerprint::fingerprint;

/// A locally-pending send awaiting its platform confirmation.
///
/// Lives only in this queue: the authoritative replacement is the confirmed
/// message that eventually arrives as an echo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingSend {
    pub temp_id: Uuid,
    pub fingerprint: String,
    /// The raw input, restored to the composer on send failure.
    pub draft: String,
}

#[derive(Debug, Default)]
struct ConversationState {
    /// Oldest first, the way the view renders.
    messages: Vec<Message>,
    /// Bumped by every new fetch and every live event; a completed fetch is
    /// applied only if its captured generation is still current.
    generation: u64,
    /// FIFO queue of unconfirmed sends.
    pending: VecDeque<PendingSend>,
}

/// What happened to a completed background fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchOutcome {
    Applied,
    /// A newer fetch or a live event superseded it; the result was dropped.
    Discarded,
}

/// How a live event folded into the local list.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventOutcome {
    /// The confirmed id was already present; nothing changed.
    AlreadyKnown,
    /// An echo resolved the pending placeholder with this temporary id.
    ConfirmedPending { temp_id: Uuid },
    /// A genuinely new message was appended.
    Appended,
    /// The event carried no conversation id; the caller refetches instead.
    Unroutable,
}

pub struct SyncEngine<C: MessageCache> {
    states: HashMap<Uuid, ConversationState>,
    cache: C,
}

impl<C: MessageCache> std::fmt::Debug for SyncEngine<C> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SyncEngine")
            .field("conversations", &self.states.len())
            .finish()
    }
}

impl<C: MessageCache> SyncEngine<C> {
    pub fn new(cache: C) -> Self {
        Self {
            states: HashMap::new(),
            cache,
        }
    }

    /// Begins a background fetch: bumps the generation and returns the value
    /// the caller must present when the fetch completes.
    pub fn begin_fetch(&mut self, conversation_id: Uuid) -> u64 {
        let state = self.states.entry(conversation_id).or_default();
        state.generation += 1;
        state.generation
    }

    /// Applies a completed fetch if (and only if) its generation is still
    /// current. `fetched` is oldest-first, the full recent window.
    ///
    /// Still-pending placeholders survive the replacement: the fetch cannot
    /// know about sends the server has not confirmed yet.
    pub fn complete_fetch(
        &mut self,
        conversation_id: Uuid,
        generation: u64,
        fetched: Vec<Message>,
    ) -> FetchOutcome {
        let state = self.states.entry(conversation_id).or_default();

        if state.generation != generation {
            debug!(
                conversation = %conversation_id,
                captured = generation,
                current = state.generation,
                "discarding stale fetch result"
            );
            return FetchOutcome::Discarded;
        }

        let mut merged = fetched;
        for message in &state.messages {
            if message.state == DeliveryState::Pending {
                merged.push(message.clone());
            }
        }

        state.messages = merged;
        self.persist(conversation_id);
        FetchOutcome::Applied
    }

    /// Folds a live stream event into the local state.
    ///
    /// The generation is bumped before anything else so that any in-flight
    /// fetch begun earlier can no longer clobber what the stream just
    /// delivered.
    pub fn on_live_event(&mut self, event: &WorkspaceStreamEvent) -> EventOutcome {
        let (payload, is_echo) = match event {
            WorkspaceStreamEvent::NewMessage { payload } => (payload, false),
            WorkspaceStreamEvent::MessageEcho { payload } => (payload, true),
            _ => return EventOutcome::Unroutable,
        };

        let Some(conversation_id) = payload.conversation_id else {
            return EventOutcome::Unroutable;
        };

        let outcome = self.apply_confirmed(conversation_id, payload.message.clone(), is_echo);
        self.persist(conversation_id);
        outcome
    }

    /// Appends an optimistic placeholder and queues its pending record.
    /// Returns the placeholder shown to the user.
    pub fn stage_send(
        &mut self,
        conversation_id: Uuid,
        content: MessageContent,
        draft: String,
    ) -> Message {
        let placeholder = Message {
            id: Uuid::new_v4(),
            external_id: None,
            conversation_id,
            direction: MessageDirection::Outbound,
            content: content.clone(),
            sent_at: Timestamp::now(),
            state: DeliveryState::Pending,
        };

        let state = self.states.entry(conversation_id).or_default();
        state.messages.push(placeholder.clone());
        state.pending.push_back(PendingSend {
            temp_id: placeholder.id,
            fingerprint: fingerprint(&content),
            draft,
        });

        self.persist(conversation_id);
        placeholder
    }

    /// Rolls back a failed send: removes the placeholder and its queue entry
    /// and returns the draft so the composer can restore it.
    pub fn rollback_send(&mut self, conversation_id: Uuid, temp_id: Uuid) -> Option<String> {
        let state = self.states.get_mut(&conversation_id)?;

        state.messages.retain(|message| message.id != temp_id);
        let position = state
            .pending
            .iter()
            .position(|pending| pending.temp_id == temp_id)?;
        let pending = state.pending.remove(position)?;

        self.persist(conversation_id);
        Some(pending.draft)
    }

    /// Whether a staged send is still awaiting confirmation. The timed
    /// fallback consults this so it can no-op once the echo has landed.
    #[must_use]
    pub fn is_pending(&self, conversation_id: Uuid, temp_id: Uuid) -> bool {
        self.states
            .get(&conversation_id)
            .is_some_and(|state| state.pending.iter().any(|p| p.temp_id == temp_id))
    }

    /// Forced resync from a latest-messages fetch: applies the same matching
    /// rules as live events. Returns how many pending sends were resolved.
    pub fn resolve_with_latest(&mut self, conversation_id: Uuid, latest: Vec<Message>) -> usize {
        let mut resolved = 0;
        for message in latest {
            let is_echo = message.direction == MessageDirection::Outbound;
            if let EventOutcome::ConfirmedPending { .. } =
                self.apply_confirmed(conversation_id, message, is_echo)
            {
                resolved += 1;
            }
        }

        if resolved > 0 {
            self.persist(conversation_id);
        }
        resolved
    }

    /// The conversation's local list, oldest first.
    #[must_use]
    pub fn messages(&self, conversation_id: Uuid) -> &[Message] {
        self.states
            .get(&conversation_id)
            .map_or(&[], |state| state.messages.as_slice())
    }

    #[must_use]
    pub fn generation(&self, conversation_id: Uuid) -> u64 {
        self.states
            .get(&conversation_id)
            .map_or(0, |state| state.generation)
    }

    #[must_use]
    pub fn pending_count(&self, conversation_id: Uuid) -> usize {
        self.states
            .get(&conversation_id)
            .map_or(0, |state| state.pending.len())
    }

    /// Core merge: idempotence by confirmed id, FIFO echo matching, append
    /// otherwise. Exactly one queue entry may be consumed per confirmation.
    fn apply_confirmed(
        &mut self,
        conversation_id: Uuid,
        confirmed: Message,
        is_echo: bool,
    ) -> EventOutcome {
        let state = self.states.entry(conversation_id).or_default();

        // Any signal for this conversation outruns in-flight fetches.
        state.generation += 1;

        if let Some(external_id) = confirmed.external_id.as_deref()
            && state
                .messages
                .iter()
                .any(|message| message.external_id.as_deref() == Some(external_id))
        {
            return EventOutcome::AlreadyKnown;
        }

        if is_echo {
            // Pop the FIRST queue entry whose fingerprint matches, and only
            // that one. With two queued sends of identical text, the first
            // echo must resolve the first entry and the second echo the
            // second; a find-without-remove would pin both echoes to the
            // first placeholder and leave the other stuck unconfirmed.
            let matched = state
                .pending
                .iter()
                .position(|pending| pending.fingerprint == fingerprint(&confirmed.content));

            if let Some(position) = matched
                && let Some(pending) = state.pending.remove(position)
            {
                // Replace the placeholder in place, keeping list position.
                if let Some(slot) = state
                    .messages
                    .iter_mut()
                    .find(|message| message.id == pending.temp_id)
                {
                    *slot = confirmed;
                } else {
                    state.messages.push(confirmed);
                }

                return EventOutcome::ConfirmedPending {
                    temp_id: pending.temp_id,
                };
            }
        }

        state.messages.push(confirmed);
        EventOutcome::Appended
    }

    fn persist(&mut self, conversation_id: Uuid) {
        if let Some(state) = self.states.get(&conversation_id) {
            self.cache.store(conversation_id, &state.messages);
        }
    }
}
