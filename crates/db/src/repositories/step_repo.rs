//! Repository for the `workflow_steps` and `workflow_conditions` tables.

use cadence_core::condition::Condition;
use cadence_core::engine::StepDraft;
use cadence_core::types::DbId;
use sqlx::{PgPool, Postgres, Transaction};

use crate::models::workflow::{ConditionRow, StepRow};

/// Column list for workflow_steps queries.
const STEP_COLUMNS: &str =
    "id, workflow_id, name, description, step_type, step_order, config, is_required";

/// Column list for workflow_conditions queries.
const CONDITION_COLUMNS: &str =
    "id, step_id, field, operator, value, logical_operator, condition_order";

// ---------------------------------------------------------------------------
// StepRepo
// ---------------------------------------------------------------------------

/// Provides operations on workflow steps. Steps are never updated in place:
/// a new step list retires the old one.
pub struct StepRepo;

impl StepRepo {
    /// Insert one step inside an open transaction.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: DbId,
        draft: &StepDraft,
    ) -> Result<StepRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_steps \
                (workflow_id, name, description, step_type, step_order, config, is_required) \
             VALUES ($1, $2, $3, $4, $5, $6, $7) \
             RETURNING {STEP_COLUMNS}"
        );
        sqlx::query_as::<_, StepRow>(&query)
            .bind(workflow_id)
            .bind(&draft.name)
            .bind(&draft.description)
            .bind(draft.kind.step_type().as_str())
            .bind(draft.order)
            .bind(draft.kind.config_json())
            .bind(draft.is_required)
            .fetch_one(&mut **tx)
            .await
    }

    /// Soft-delete every live step of a workflow. Returns how many were
    /// retired.
    pub async fn retire_for_workflow(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: DbId,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE workflow_steps SET deleted_at = NOW(), updated_at = NOW() \
             WHERE workflow_id = $1 AND deleted_at IS NULL",
        )
        .bind(workflow_id)
        .execute(&mut **tx)
        .await?;
        Ok(result.rows_affected())
    }

    /// Live steps of the given workflows, by workflow then order.
    pub async fn list_for_workflows(
        pool: &PgPool,
        workflow_ids: &[DbId],
    ) -> Result<Vec<StepRow>, sqlx::Error> {
        let query = format!(
            "SELECT {STEP_COLUMNS} FROM workflow_steps \
             WHERE workflow_id = ANY($1) AND deleted_at IS NULL \
             ORDER BY workflow_id, step_order ASC"
        );
        sqlx::query_as::<_, StepRow>(&query)
            .bind(workflow_ids)
            .fetch_all(pool)
            .await
    }
}

// ---------------------------------------------------------------------------
// ConditionRepo
// ---------------------------------------------------------------------------

/// Provides operations on step conditions.
pub struct ConditionRepo;

impl ConditionRepo {
    /// Insert one condition inside an open transaction.
    pub async fn create(
        tx: &mut Transaction<'_, Postgres>,
        step_id: DbId,
        condition: &Condition,
    ) -> Result<ConditionRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_conditions \
                (step_id, field, operator, value, logical_operator, condition_order) \
             VALUES ($1, $2, $3, $4, $5, $6) \
             RETURNING {CONDITION_COLUMNS}"
        );
        sqlx::query_as::<_, ConditionRow>(&query)
            .bind(step_id)
            .bind(&condition.field)
            .bind(condition.operator.as_str())
            .bind(&condition.value)
            .bind(condition.logical_operator.as_str())
            .bind(condition.order)
            .fetch_one(&mut **tx)
            .await
    }

    /// Conditions of the given steps, by step then evaluation order.
    pub async fn list_for_steps(
        pool: &PgPool,
        step_ids: &[DbId],
    ) -> Result<Vec<ConditionRow>, sqlx::Error> {
        let query = format!(
            "SELECT {CONDITION_COLUMNS} FROM workflow_conditions \
             WHERE step_id = ANY($1) \
             ORDER BY step_id, condition_order ASC, id ASC"
        );
        sqlx::query_as::<_, ConditionRow>(&query)
            .bind(step_ids)
            .fetch_all(pool)
            .await
    }
}
