//! Local message cache.
//!
//! The dashboard keeps the authoritative per-conversation message list in a
//! local cache layer so a reopened conversation renders instantly while the
//! background fetch runs. The engine writes through after every mutation.

use std::collections::HashMap;

use shared::models::Message;
use uuid::Uuid;

pub trait MessageCache {
    /// Persists the full message list of one conversation.
    fn store(&mut self, conversation_id: Uuid, messages: &[Message]);

    /// Loads a conversation's cached list, if present.
    fn load(&self, conversation_id: Uuid) -> Option<Vec<Message>>;
}

/// Process-local cache used by the CLI session.
#[derive(Debug, Default)]
pub struct InMemoryCache {
    entries: HashMap<Uuid, Vec<Message>>,
}

impl MessageCache for InMemoryCache {
    fn store(&mut self, conversation_id: Uuid, messages: &[Message]) {
        self.entries.insert(conversation_id, messages.to_vec());
    }

    fn load(&self, conversation_id: Uuid) -> Option<Vec<Message>> {
        self.entries.get(&conversation_id).cloned()
    }
}
