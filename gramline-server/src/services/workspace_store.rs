//! Workspace account index and session lookups.
//!
//! Session issuance and team management live outside this service; the
//! server only needs two reads: which workspace owns a connected platform
//! account, and which workspace a bearer session token belongs to.

use anyhow::Result;
use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

/// A connected platform account and its owning workspace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkspaceAccount {
    pub workspace_id: Uuid,
    pub account_id: String,
}

#[async_trait]
pub trait WorkspaceStore: Send + Sync {
    /// Resolves a platform account id to its workspace, if connected.
    async fn find_by_account_id(&self, account_id: &str) -> Result<Option<WorkspaceAccount>>;

    /// Resolves a dashboard session token to its workspace, if valid.
    async fn find_session_workspace(&self, token: &str) -> Result<Option<Uuid>>;
}

/// Postgres-backed workspace store.
#[derive(Debug, Clone)]
pub struct PgWorkspaceStore {
    pool: PgPool,
}

impl PgWorkspaceStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl WorkspaceStore for PgWorkspaceStore {
    async fn find_by_account_id(&self, account_id: &str) -> Result<Option<WorkspaceAccount>> {
        let row: Option<(Uuid, String)> = sqlx::query_as(
            "SELECT workspace_id, account_id FROM workspace_accounts WHERE account_id = $1",
        )
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(workspace_id, account_id)| WorkspaceAccount {
            workspace_id,
            account_id,
        }))
    }

    async fn find_session_workspace(&self, token: &str) -> Result<Option<Uuid>> {
        let row: Option<(Uuid,)> = sqlx::query_as(
            "SELECT workspace_id FROM workspace_sessions \
             WHERE token = $1 AND expires_at > NOW()",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(workspace_id,)| workspace_id))
    }
}
