//! Rows of `workflow_approvals`.

use cadence_core::approval::{Approval, ApprovalSummary};
use cadence_core::types::{DbId, Timestamp};
use serde_json::Value;
use sqlx::FromRow;

use super::status::{approval_status, StatusId};
use super::RowError;

/// A row from the `workflow_approvals` table.
#[derive(Debug, Clone, FromRow)]
pub struct ApprovalRow {
    pub id: DbId,
    pub instance_id: DbId,
    pub step_id: DbId,
    pub approver_id: DbId,
    pub delegated_from: Option<DbId>,
    pub status_id: StatusId,
    pub comments: Option<String>,
    pub metadata: Value,
    pub responded_by: Option<DbId>,
    pub responded_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl TryFrom<ApprovalRow> for Approval {
    type Error = RowError;

    fn try_from(row: ApprovalRow) -> Result<Self, Self::Error> {
        Ok(Approval {
            id: row.id,
            instance_id: row.instance_id,
            step_id: row.step_id,
            approver_id: row.approver_id,
            delegated_from: row.delegated_from,
            status: approval_status(row.status_id)?,
            comments: row.comments,
            metadata: row.metadata,
            responded_by: row.responded_by,
            responded_at: row.responded_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// An approval joined with the instance, workflow and step it belongs to.
#[derive(Debug, Clone, FromRow)]
pub struct ApprovalSummaryRow {
    #[sqlx(flatten)]
    pub approval: ApprovalRow,
    pub workflow_id: DbId,
    pub workflow_name: String,
    pub step_name: String,
    pub entity_type: String,
    pub entity_id: String,
}

impl TryFrom<ApprovalSummaryRow> for ApprovalSummary {
    type Error = RowError;

    fn try_from(row: ApprovalSummaryRow) -> Result<Self, Self::Error> {
        Ok(ApprovalSummary {
            approval: row.approval.try_into()?,
            workflow_id: row.workflow_id,
            workflow_name: row.workflow_name,
            step_name: row.step_name,
            entity_type: row.entity_type,
            entity_id: row.entity_id,
        })
    }
}
