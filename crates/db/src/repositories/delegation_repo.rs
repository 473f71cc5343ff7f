//! Repository for the `workflow_delegations` table.

use cadence_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::delegation::DelegationRow;

/// Column list for workflow_delegations queries.
const COLUMNS: &str = "id, workspace_id, from_user_id, to_user_id, start_date, end_date, \
    reason, is_active, created_at, updated_at";

/// Provides CRUD operations for approval delegations.
pub struct DelegationRepo;

impl DelegationRepo {
    /// Insert an active delegation.
    ///
    /// Fails with an exclusion violation (`23P01`) when the window overlaps
    /// another active delegation from the same user.
    pub async fn create(
        pool: &PgPool,
        workspace_id: DbId,
        from_user_id: DbId,
        to_user_id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> Result<DelegationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_delegations \
                (workspace_id, from_user_id, to_user_id, start_date, end_date, reason) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(from_user_id)
            .bind(to_user_id)
            .bind(start_date)
            .bind(end_date)
            .bind(reason)
            .fetch_one(pool)
            .await
    }

    /// Find a delegation by ID within a workspace.
    pub async fn find_by_id(
        pool: &PgPool,
        workspace_id: DbId,
        id: DbId,
    ) -> Result<Option<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations WHERE id = $1 AND workspace_id = $2"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(pool)
            .await
    }

    /// Delegations the user gave or received, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        workspace_id: DbId,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations \
             WHERE workspace_id = $1 AND (from_user_id = $2 OR to_user_id = $2) \
             ORDER BY created_at DESC, id DESC \
             LIMIT $3 OFFSET $4"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count for [`DelegationRepo::list_for_user`].
    pub async fn count_for_user(
        pool: &PgPool,
        workspace_id: DbId,
        user_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workflow_delegations \
             WHERE workspace_id = $1 AND (from_user_id = $2 OR to_user_id = $2)",
        )
        .bind(workspace_id)
        .bind(user_id)
        .fetch_one(pool)
        .await
    }

    /// Delegations given or received by the user that cover `at`.
    pub async fn list_active_for_user(
        pool: &PgPool,
        workspace_id: DbId,
        user_id: DbId,
        at: Timestamp,
    ) -> Result<Vec<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations \
             WHERE workspace_id = $1 AND (from_user_id = $2 OR to_user_id = $2) \
               AND is_active AND start_date <= $3 AND end_date >= $3 \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(user_id)
            .bind(at)
            .fetch_all(pool)
            .await
    }

    /// Delegations from any of `from_user_ids` that cover `at`.
    pub async fn list_active_from(
        pool: &PgPool,
        workspace_id: DbId,
        from_user_ids: &[DbId],
        at: Timestamp,
    ) -> Result<Vec<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations \
             WHERE workspace_id = $1 AND from_user_id = ANY($2) \
               AND is_active AND start_date <= $3 AND end_date >= $3 \
             ORDER BY start_date ASC"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(from_user_ids)
            .bind(at)
            .fetch_all(pool)
            .await
    }

    /// Delegations to the user that cover `at`.
    pub async fn list_active_to(
        pool: &PgPool,
        workspace_id: DbId,
        to_user_id: DbId,
        at: Timestamp,
    ) -> Result<Vec<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations \
             WHERE workspace_id = $1 AND to_user_id = $2 \
               AND is_active AND start_date <= $3 AND end_date >= $3 \
             ORDER BY start_date ASC"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(to_user_id)
            .bind(at)
            .fetch_all(pool)
            .await
    }

    /// First active delegation from the user whose closed window intersects
    /// `[start, end]`, ignoring `exclude_id`.
    pub async fn find_overlapping(
        pool: &PgPool,
        workspace_id: DbId,
        from_user_id: DbId,
        start: Timestamp,
        end: Timestamp,
        exclude_id: Option<DbId>,
    ) -> Result<Option<DelegationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_delegations \
             WHERE workspace_id = $1 AND from_user_id = $2 AND is_active \
               AND ($5::bigint IS NULL OR id <> $5) \
               AND start_date <= $4 AND end_date >= $3 \
             ORDER BY start_date ASC \
             LIMIT 1"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(workspace_id)
            .bind(from_user_id)
            .bind(start)
            .bind(end)
            .bind(exclude_id)
            .fetch_optional(pool)
            .await
    }

    /// Replace the window and reason of a delegation.
    pub async fn update(
        pool: &PgPool,
        id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> Result<Option<DelegationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workflow_delegations SET \
                start_date = $2, end_date = $3, reason = $4, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(id)
            .bind(start_date)
            .bind(end_date)
            .bind(reason)
            .fetch_optional(pool)
            .await
    }

    /// Cancel a delegation by clearing `is_active`.
    pub async fn deactivate(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<DelegationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workflow_delegations SET is_active = FALSE, updated_at = NOW() \
             WHERE id = $1 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, DelegationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }
}
