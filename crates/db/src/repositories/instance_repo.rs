//! Repository for the `workflow_instances` table.

use cadence_core::instance::{InstanceFilter, NewInstance};
use cadence_core::types::{DbId, Timestamp};
use sqlx::PgPool;

use crate::models::instance::{InstanceCountsRow, InstanceRow};
use crate::models::status::{InstanceStatusId, StatusId};

/// Column list for workflow_instances queries.
const COLUMNS: &str = "id, workflow_id, workspace_id, entity_type, entity_id, status_id, \
    current_step_id, metadata, started_by, version, started_at, completed_at, updated_at";

/// Shared WHERE clause for list/count. Binds: $1 workspace, $2 workflow,
/// $3 entity type, $4 entity id, $5 status.
const FILTER: &str = "workspace_id = $1 \
    AND ($2::bigint IS NULL OR workflow_id = $2) \
    AND ($3::text IS NULL OR entity_type = $3) \
    AND ($4::text IS NULL OR entity_id = $4) \
    AND ($5::smallint IS NULL OR status_id = $5)";

/// Provides CRUD operations for workflow instances.
pub struct InstanceRepo;

impl InstanceRepo {
    /// Insert a new `IN_PROGRESS` instance.
    pub async fn create(pool: &PgPool, input: &NewInstance) -> Result<InstanceRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_instances \
                (workflow_id, workspace_id, entity_type, entity_id, status_id, \
                 current_step_id, metadata, started_by) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InstanceRow>(&query)
            .bind(input.workflow_id)
            .bind(input.workspace_id)
            .bind(&input.entity_type)
            .bind(&input.entity_id)
            .bind(InstanceStatusId::InProgress.id())
            .bind(input.current_step_id)
            .bind(&input.metadata)
            .bind(input.started_by)
            .fetch_one(pool)
            .await
    }

    /// Find an instance by ID within a workspace.
    pub async fn find_by_id(
        pool: &PgPool,
        workspace_id: DbId,
        id: DbId,
    ) -> Result<Option<InstanceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_instances WHERE id = $1 AND workspace_id = $2"
        );
        sqlx::query_as::<_, InstanceRow>(&query)
            .bind(id)
            .bind(workspace_id)
            .fetch_optional(pool)
            .await
    }

    /// List instances matching `filter`, most recently started first.
    pub async fn list(
        pool: &PgPool,
        workspace_id: DbId,
        filter: &InstanceFilter,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<InstanceRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_instances WHERE {FILTER} \
             ORDER BY started_at DESC, id DESC \
             LIMIT $6 OFFSET $7"
        );
        sqlx::query_as::<_, InstanceRow>(&query)
            .bind(workspace_id)
            .bind(filter.workflow_id)
            .bind(&filter.entity_type)
            .bind(&filter.entity_id)
            .bind(status_param(filter))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    /// Count instances matching `filter`.
    pub async fn count(
        pool: &PgPool,
        workspace_id: DbId,
        filter: &InstanceFilter,
    ) -> Result<i64, sqlx::Error> {
        let query = format!("SELECT COUNT(*) FROM workflow_instances WHERE {FILTER}");
        sqlx::query_scalar::<_, i64>(&query)
            .bind(workspace_id)
            .bind(filter.workflow_id)
            .bind(&filter.entity_type)
            .bind(&filter.entity_id)
            .bind(status_param(filter))
            .fetch_one(pool)
            .await
    }

    /// Compare-and-set update of an in-progress instance.
    ///
    /// Applies only when the stored `version` equals `expected_version` and
    /// the instance is still `IN_PROGRESS`; the version is bumped on
    /// success. Returns `None` when the guard does not match.
    pub async fn transition(
        pool: &PgPool,
        id: DbId,
        expected_version: i32,
        status: InstanceStatusId,
        current_step_id: Option<DbId>,
        completed_at: Option<Timestamp>,
    ) -> Result<Option<InstanceRow>, sqlx::Error> {
        let query = format!(
            "UPDATE workflow_instances SET \
                status_id = $3, current_step_id = $4, completed_at = $5, \
                version = version + 1, updated_at = NOW() \
             WHERE id = $1 AND version = $2 AND status_id = $6 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, InstanceRow>(&query)
            .bind(id)
            .bind(expected_version)
            .bind(status.id())
            .bind(current_step_id)
            .bind(completed_at)
            .bind(InstanceStatusId::InProgress.id())
            .fetch_optional(pool)
            .await
    }

    /// Number of `IN_PROGRESS` instances of a workflow.
    pub async fn count_in_progress(pool: &PgPool, workflow_id: DbId) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM workflow_instances WHERE workflow_id = $1 AND status_id = $2",
        )
        .bind(workflow_id)
        .bind(InstanceStatusId::InProgress.id())
        .fetch_one(pool)
        .await
    }

    /// Per-status counts and mean completion time, optionally for one
    /// workflow.
    pub async fn counts(
        pool: &PgPool,
        workspace_id: DbId,
        workflow_id: Option<DbId>,
    ) -> Result<InstanceCountsRow, sqlx::Error> {
        sqlx::query_as::<_, InstanceCountsRow>(
            "SELECT \
                COUNT(*)::BIGINT AS total, \
                COUNT(*) FILTER (WHERE status_id = $3)::BIGINT AS completed, \
                COUNT(*) FILTER (WHERE status_id = $4)::BIGINT AS rejected, \
                COUNT(*) FILTER (WHERE status_id = $5)::BIGINT AS in_progress, \
                (AVG(EXTRACT(EPOCH FROM (completed_at - started_at)) / 3600.0) \
                    FILTER (WHERE status_id = $3 AND completed_at IS NOT NULL))::FLOAT8 \
                    AS avg_completion_hours \
             FROM workflow_instances \
             WHERE workspace_id = $1 AND ($2::bigint IS NULL OR workflow_id = $2)",
        )
        .bind(workspace_id)
        .bind(workflow_id)
        .bind(InstanceStatusId::Completed.id())
        .bind(InstanceStatusId::Rejected.id())
        .bind(InstanceStatusId::InProgress.id())
        .fetch_one(pool)
        .await
    }
}

fn status_param(filter: &InstanceFilter) -> Option<StatusId> {
    filter.status.map(|s| InstanceStatusId::from(s).id())
}
