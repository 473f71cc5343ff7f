//! Repository for the append-only `workflow_audit_logs` table.

use cadence_core::audit::NewAuditEntry;
use cadence_core::types::DbId;
use sqlx::PgPool;

use crate::models::audit::AuditLogRow;

/// Column list for workflow_audit_logs queries.
const COLUMNS: &str = "id, instance_id, step_id, user_id, action, details, created_at";

/// Provides insert and read operations for instance audit logs.
pub struct AuditLogRepo;

impl AuditLogRepo {
    /// Append one entry. Details are expected to be redacted already.
    pub async fn create(pool: &PgPool, entry: &NewAuditEntry) -> Result<AuditLogRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO workflow_audit_logs (instance_id, step_id, user_id, action, details) \
             VALUES ($1, $2, $3, $4, $5) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(entry.instance_id)
            .bind(entry.step_id)
            .bind(entry.user_id)
            .bind(entry.action)
            .bind(&entry.details)
            .fetch_one(pool)
            .await
    }

    /// Every entry for an instance, newest first.
    pub async fn list_for_instance(
        pool: &PgPool,
        instance_id: DbId,
    ) -> Result<Vec<AuditLogRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM workflow_audit_logs \
             WHERE instance_id = $1 \
             ORDER BY created_at DESC, id DESC"
        );
        sqlx::query_as::<_, AuditLogRow>(&query)
            .bind(instance_id)
            .fetch_all(pool)
            .await
    }
}
