use std::sync::Arc;

use crate::platform::MessagingPlatform;
use crate::services::conversation_store::ConversationStore;
use crate::services::message_store::MessageStore;
use crate::services::workspace_store::WorkspaceStore;

/// Application state shared across all routes.
///
/// Stores and the platform client sit behind trait objects so handlers can
/// be exercised against in-memory fakes.
#[derive(Clone)]
pub struct AppState {
    pub(crate) pool: Option<sqlx::PgPool>,
    pub(crate) workspaces: Arc<dyn WorkspaceStore>,
    pub(crate) conversations: Arc<dyn ConversationStore>,
    pub(crate) messages: Arc<dyn MessageStore>,
    pub(crate) platform: Arc<dyn MessagingPlatform>,
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("has_pool", &self.pool.is_some())
            .finish()
    }
}

impl AppState {
    pub fn new(
        pool: Option<sqlx::PgPool>,
        workspaces: Arc<dyn WorkspaceStore>,
        conversations: Arc<dyn ConversationStore>,
        messages: Arc<dyn MessageStore>,
        platform: Arc<dyn MessagingPlatform>,
    ) -> Self {
        Self {
            pool,
            workspaces,
            conversations,
            messages,
            platform,
        }
    }
}
