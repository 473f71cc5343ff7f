//! Rows of `workflow_instances`, plus the aggregate used by analytics.

use cadence_core::analytics::InstanceCounts;
use cadence_core::instance::WorkflowInstance;
use cadence_core::types::{DbId, Timestamp};
use serde_json::Value;
use sqlx::FromRow;

use super::status::{instance_status, StatusId};
use super::RowError;

/// A row from the `workflow_instances` table.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub workspace_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub status_id: StatusId,
    pub current_step_id: Option<DbId>,
    pub metadata: Value,
    pub started_by: Option<DbId>,
    pub version: i32,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

impl TryFrom<InstanceRow> for WorkflowInstance {
    type Error = RowError;

    fn try_from(row: InstanceRow) -> Result<Self, Self::Error> {
        Ok(WorkflowInstance {
            id: row.id,
            workflow_id: row.workflow_id,
            workspace_id: row.workspace_id,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
            status: instance_status(row.status_id)?,
            current_step_id: row.current_step_id,
            metadata: row.metadata,
            started_by: row.started_by,
            version: row.version,
            started_at: row.started_at,
            completed_at: row.completed_at,
            updated_at: row.updated_at,
        })
    }
}

/// Per-status instance counts for one workspace or workflow.
#[derive(Debug, Clone, FromRow)]
pub struct InstanceCountsRow {
    pub total: i64,
    pub completed: i64,
    pub rejected: i64,
    pub in_progress: i64,
    pub avg_completion_hours: Option<f64>,
}

impl From<InstanceCountsRow> for InstanceCounts {
    fn from(row: InstanceCountsRow) -> Self {
        InstanceCounts {
            total: row.total,
            completed: row.completed,
            rejected: row.rejected,
            in_progress: row.in_progress,
            avg_completion_hours: row.avg_completion_hours,
        }
    }
}
