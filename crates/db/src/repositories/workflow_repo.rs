//! Repository for the `workflows` table.

use cadence_core::engine::WorkflowDraft;
use cadence_core::types::DbId;
use cadence_core::workflow::WorkflowFilter;
use sqlx::{PgPool, Postgres, Transaction};

use super::contains_pattern;
use crate::models::workflow::WorkflowRow;

/// Column list for workflows queries.
const COLUMNS: &str = "id, workspace_id, name, description, workflow_type, config, is_active, \
    created_by, deleted_at, created_at, updated_at";

/// Shared WHERE clause for list/count. Binds: $1 workspace, $2 type,
/// $3 active flag, $4 search pattern.
const FILTER: &str = "workspace_id = $1 AND deleted_at IS NULL \
    AND ($2::text IS NULL OR workflow_type = $2) \
    AND ($3::bool IS NULL OR is_active = $3) \
    AND ($4::text IS NULL OR name ILIKE $4 OR description ILIKE $4)";

/// Provides CRUD operations for workflow definitions.
pub struct WorkflowRepo;

impl WorkflowRepo {
    /// Insert a workflow row inside an open transaction.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: DbId,
        created_by: DbId,
        draft: &WorkflowDraft,
    ) -> Result<WorkflowRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflows \
                (workspace_id, name, description, workflow_type, config, is_active, created_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(workspace_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(draft.workflow_type.as_str())
            .bind(draft.config.to_json())
            .bind(draft.is_active)
            .bind(created_by)
            .fetch_one(&mut **tx)
            .await
    }

    /// Overwrite the scalar fields of a live workflow. Returns `None` if the
    /// workflow does not exist in the workspace or was deleted.
    pub async fn update(
        tx: &mut Transaction<'_, Postgres>,
        workspace_id: DbId,
        id: DbId,
        draft: &WorkflowDraft,
    ) -> Result<Option<WorkflowRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workflows SET \
                name = $3, description = $4, workflow_type = $5, config = $6, \
                is_active = $7, updated_at = NOW() \
             WHERE id = $1 AND workspace_id = $2 AND deleted_at IS NULL \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(id)
            .bind(workspace_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(draft.workflow_type.as_str())
            .bind(draft.config.to_json())
            .bind(draft.is_active)
            .fetch_optional(&mut **tx)
            .await
    }

    /// Soft-delete a workflow. Returns `false` if nothing was deleted.
    pub async fn soft_delete(
        pool: &PgPool,
        workspace_id: DbId,
        id: DbId,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workflows SET deleted_at = NOW(), updated_at = NOW() \
             WHERE id = $1 AND workspace_id = $2 AND deleted_at IS NULL",
        )
        .bind(id)
        .bind(workspace_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find a workflow by ID within a workspace.
    pub async fn find_by_id(
        pool: &PgPool,
        workspace_id: DbId,
        id: DbId,
        include_deleted: bool,
    ) -> Result<Option<WorkflowRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows \
             WHERE id = $1 AND workspace_id = $2 AND ($3 OR deleted_at IS NULL)"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(id)
            .bind(workspace_id)
            .bind(include_deleted)
            .fetch_optional(pool)
            .await
    }

    /// List live workflows matching `filter`, newest first.
    pub async fn list(
        pool: &PgPool,
        workspace_id: DbId,
        filter: &WorkflowFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WorkflowRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflows WHERE {FILTER} \
             ORDER BY created_at DESC, id DESC \
             LIMIT $5 OFFSET $6"
        );
        sqlx::query_as::<_, WorkflowRow>(&query)
            .bind(workspace_id)
            .bind(filter.workflow_type.map(|t| t.as_str()))
            .bind(filter.is_active)
            .bind(search_pattern(filter))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count live workflows matching `filter`.
    pub async fn count(
        pool: &PgPool,
        workspace_id: DbId,
        filter: &WorkflowFilter,
    ) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM workflows WHERE {FILTER}");
        sqlx::query_scalar::<_, i64>(&query)
            .bind(workspace_id)
            .bind(filter.workflow_type.map(|t| t.as_str()))
            .bind(filter.is_active)
            .bind(search_pattern(filter))
            .fetch_one(pool)
            .await
    }
}

fn search_pattern(filter: &WorkflowFilter) -> Option<String> {
    filter
        .search
        .as_deref()
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(contains_pattern)
}
