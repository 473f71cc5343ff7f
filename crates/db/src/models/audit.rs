//! Rows of `workflow_audit_logs`. Immutable once written (no `updated_at`).

use cadence_core::audit::AuditEntry;
use cadence_core::types::{DbId, Timestamp};
use serde_json::Value;
use sqlx::FromRow;

/// A row from the `workflow_audit_logs` table.
#[derive(Debug, Clone, FromRow)]
pub struct AuditLogRow {
    pub id: DbId,
    pub instance_id: DbId,
    pub step_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub action: String,
    pub details: Value,
    pub created_at: Timestamp,
}

impl From<AuditLogRow> for AuditEntry {
    fn from(row: AuditLogRow) -> Self {
        AuditEntry {
            id: row.id,
            instance_id: row.instance_id,
            step_id: row.step_id,
            user_id: row.user_id,
            action: row.action,
            details: row.details,
            created_at: row.created_at,
        }
    }
}
