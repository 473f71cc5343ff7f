//! Rows of `workflow_delegations`.

use cadence_core::delegation::Delegation;
use cadence_core::types::{DbId, Timestamp};
use sqlx::FromRow;

/// A row from the `workflow_delegations` table.
#[derive(Debug, Clone, FromRow)]
pub struct DelegationRow {
    pub id: DbId,
    pub workspace_id: DbId,
    pub from_user_id: DbId,
    pub to_user_id: DbId,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl From<DelegationRow> for Delegation {
    fn from(row: DelegationRow) -> Self {
        Delegation {
            id: row.id,
            workspace_id: row.workspace_id,
            from_user_id: row.from_user_id,
            to_user_id: row.to_user_id,
            start_date: row.start_date,
            end_date: row.end_date,
            reason: row.reason,
            is_active: row.is_active,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}
