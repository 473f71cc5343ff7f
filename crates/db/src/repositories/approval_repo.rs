//! Repository for the `workflow_approvals` table.

use cadence_core::approval::{NewApproval, RecordedDecision};
use cadence_core::types::{DbId, Timestamp};
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::approval::{ApprovalRow, ApprovalSummaryRow};
use crate::models::status::{ApprovalStatusId, StatusId};

/// Column list for workflow_approvals queries.
const COLUMNS: &str = "id, instance_id, step_id, approver_id, delegated_from, status_id, \
    comments, metadata, responded_by, responded_at, created_at, updated_at";

/// Same columns, qualified with the `a` alias for joins.
const JOINED_COLUMNS: &str = "a.id, a.instance_id, a.step_id, a.approver_id, a.delegated_from, \
    a.status_id, a.comments, a.metadata, a.responded_by, a.responded_at, a.created_at, \
    a.updated_at";

/// Provides CRUD operations for per-approver approvals.
pub struct ApprovalRepo;

impl ApprovalRepo {
    /// Insert one `PENDING` approval inside an open transaction.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        input: &NewApproval,
    ) -> Result<ApprovalRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_approvals \
                (instance_id, step_id, approver_id, delegated_from, status_id) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApprovalRow>(&query)
            .bind(input.instance_id)
            .bind(input.step_id)
            .bind(input.approver_id)
            .bind(input.delegated_from)
            .bind(ApprovalStatusId::Pending.id())
            .fetch_one(&mut **tx)
            .await
    }

    /// Find an approval by ID, scoped to the workspace of its instance.
    pub async fn find_by_id(
        pool: &PgPool,
        workspace_id: DbId,
        id: DbId,
    ) -> Result<Option<ApprovalRow>, sqlx::Error> {
        let query = format!(
            "SELECT {JOINED_COLUMNS} FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id \
             WHERE a.id = $1 AND i.workspace_id = $2"
        );
        sqlx::query_as::<_, ApprovalRow>(&query)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(pool)
            .await
    }

    /// Record a decision if the approval is still `PENDING`. Returns `None`
    /// when it was already answered or closed.
    pub async fn record_decision(
        pool: &PgPool,
        id: DbId,
        decision: &RecordedDecision,
    ) -> Result<Option<ApprovalRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workflow_approvals SET \
                status_id = $2, comments = $3, metadata = $4, responded_by = $5, \
                responded_at = $6, updated_at = $6 \
             WHERE id = $1 AND status_id = $7 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ApprovalRow>(&query)
            .bind(id)
            .bind(ApprovalStatusId::from(decision.status).id())
            .bind(&decision.comments)
            .bind(&decision.metadata)
            .bind(decision.responded_by)
            .bind(decision.responded_at)
            .bind(ApprovalStatusId::Pending.id())
            .fetch_optional(pool)
            .await
    }

    /// All approvals of one step of one instance.
    pub async fn list_for_step(
        pool: &PgPool,
        instance_id: DbId,
        step_id: DbId,
    ) -> Result<Vec<ApprovalRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_approvals \
             WHERE instance_id = $1 AND step_id = $2 \
             ORDER BY id ASC"
        );
        sqlx::query_as::<_, ApprovalRow>(&query)
            .bind(instance_id)
            .bind(step_id)
            .fetch_all(pool)
            .await
    }

    /// Mark every remaining `PENDING` approval of a step as `SKIPPED`.
    pub async fn close_pending(
        pool: &PgPool,
        instance_id: DbId,
        step_id: DbId,
        at: Timestamp,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workflow_approvals SET status_id = $3, updated_at = $4 \
             WHERE instance_id = $1 AND step_id = $2 AND status_id = $5",
        )
        .bind(instance_id)
        .bind(step_id)
        .bind(ApprovalStatusId::Skipped.id())
        .bind(at)
        .bind(ApprovalStatusId::Pending.id())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Every approval of an instance, oldest first.
    pub async fn list_for_instance(
        pool: &PgPool,
        instance_id: DbId,
    ) -> Result<Vec<ApprovalRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_approvals \
             WHERE instance_id = $1 \
             ORDER BY created_at ASC, id ASC"
        );
        sqlx::query_as::<_, ApprovalRow>(&query)
            .bind(instance_id)
            .fetch_all(pool)
            .await
    }

    /// Approvals in `status` assigned to any of `approver_ids`, with their
    /// workflow context, newest first.
    pub async fn list_for_approvers(
        pool: &PgPool,
        workspace_id: DbId,
        approver_ids: &[DbId],
        status: StatusId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ApprovalSummaryRow>, sqlx::Error> {
        let query = format!(
            "SELECT {JOINED_COLUMNS}, \
                w.id AS workflow_id, w.name AS workflow_name, s.name AS step_name, \
                i.entity_type, i.entity_id \
             FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id \
             JOIN workflows w ON w.id = i.workflow_id \
             JOIN workflow_steps s ON s.id = a.step_id \
             WHERE i.workspace_id = $1 AND a.approver_id = ANY($2) AND a.status_id = $3 \
             ORDER BY a.created_at DESC, a.id DESC \
             LIMIT $4 OFFSET $5"
        );
        sqlx::query_as::<_, ApprovalSummaryRow>(&query)
            .bind(workspace_id)
            .bind(approver_ids)
            .bind(status)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count for [`ApprovalRepo::list_for_approvers`].
    pub async fn count_for_approvers(
        pool: &PgPool,
        workspace_id: DbId,
        approver_ids: &[DbId],
        status: StatusId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workflow_approvals a \
             JOIN workflow_instances i ON i.id = a.instance_id \
             WHERE i.workspace_id = $1 AND a.approver_id = ANY($2) AND a.status_id = $3",
        )
        .bind(workspace_id)
        .bind(approver_ids)
        .bind(status)
        .fetch_one(pool)
        .await
    }
}
