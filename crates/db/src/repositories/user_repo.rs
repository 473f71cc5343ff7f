//! Repository for the `workspaces` and `users` tables.

use cadence_core::types::DbId;
use sqlx::PgPool;

use crate::models::user::{User, Workspace};

/// Column list for workspaces queries.
const WORKSPACE_COLUMNS: &str = "id, name, created_at, updated_at";

/// Column list for users queries.
const USER_COLUMNS: &str =
    "id, workspace_id, email, name, role, is_active, created_at, updated_at";

// ---------------------------------------------------------------------------
// WorkspaceRepo
// ---------------------------------------------------------------------------

/// Provides basic operations for tenants.
pub struct WorkspaceRepo;

impl WorkspaceRepo {
    pub async fn create(pool: &PgPool, name: &str) -> Result<Workspace, sqlx::Error> {
        let query =
            format!("INSERT INTO workspaces (name) VALUES ($1) RETURNING {WORKSPACE_COLUMNS}");
        sqlx::query_as::<_, Workspace>(&query)
            .bind(name)
            .fetch_one(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// UserRepo
// ---------------------------------------------------------------------------

/// Provides basic operations for workspace members.
pub struct UserRepo;

impl UserRepo {
    pub async fn create(
        pool: &PgPool,
        workspace_id: DbId,
        email: &str,
        name: &str,
        role: &str,
    ) -> Result<User, sqlx::Error> {
        let query = format!(
            "INSERT INTO users (workspace_id, email, name, role) \
             VALUES ($1, $2, $3, $4) \
             RETURNING {USER_COLUMNS}"
        );
        sqlx::query_as::<_, User>(&query)
            .bind(workspace_id)
            .bind(email)
            .bind(name)
            .bind(role)
            .fetch_one(pool)
            .await
    }

    /// Whether the user is an active member of the workspace.
    pub async fn is_member(
        pool: &PgPool,
        workspace_id: DbId,
        user_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM users WHERE id = $1 AND workspace_id = $2 AND is_active)",
        )
        .bind(user_id)
        .bind(workspace_id)
        .fetch_one(pool)
        .await
    }
}
