//! Workflow audit trail vocabulary and entry types.
//!
//! The audit trail is append-only. The engine writes it but never reads it
//! back to make decisions.

use serde::Serialize;

use crate::aggregation::ApprovalStatus;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Action tags
// ---------------------------------------------------------------------------

/// Known action tags for workflow audit entries.
pub mod actions {
    pub const WORKFLOW_STARTED: &str = "WORKFLOW_STARTED";
    pub const WORKFLOW_COMPLETED: &str = "WORKFLOW_COMPLETED";
    pub const WORKFLOW_REJECTED: &str = "WORKFLOW_REJECTED";
    pub const STEP_SKIPPED: &str = "STEP_SKIPPED";
    pub const STEP_BLOCKED: &str = "STEP_BLOCKED";
    pub const STEP_UNDECIDED: &str = "STEP_UNDECIDED";
    pub const STEP_FAILED: &str = "STEP_FAILED";
    pub const APPROVALS_CREATED: &str = "APPROVALS_CREATED";
    pub const APPROVALS_CLOSED: &str = "APPROVALS_CLOSED";
    pub const APPROVAL_APPROVED: &str = "APPROVAL_APPROVED";
    pub const APPROVAL_REJECTED: &str = "APPROVAL_REJECTED";
    pub const APPROVAL_SKIPPED: &str = "APPROVAL_SKIPPED";
    pub const NOTIFICATIONS_SENT: &str = "NOTIFICATIONS_SENT";
    pub const ACTION_EXECUTED: &str = "ACTION_EXECUTED";
}

/// The `APPROVAL_<STATUS>` tag for a recorded decision.
pub fn approval_action(status: ApprovalStatus) -> &'static str {
    match status {
        ApprovalStatus::Approved => actions::APPROVAL_APPROVED,
        ApprovalStatus::Rejected => actions::APPROVAL_REJECTED,
        // Pending is never recorded as a decision.
        ApprovalStatus::Skipped | ApprovalStatus::Pending => actions::APPROVAL_SKIPPED,
    }
}

// ---------------------------------------------------------------------------
// Entries
// ---------------------------------------------------------------------------

/// A stored audit entry. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: DbId,
    pub instance_id: DbId,
    pub step_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub action: String,
    pub details: serde_json::Value,
    pub created_at: Timestamp,
}

/// An entry to append.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAuditEntry {
    pub instance_id: DbId,
    pub step_id: Option<DbId>,
    pub user_id: Option<DbId>,
    pub action: &'static str,
    pub details: serde_json::Value,
}

impl NewAuditEntry {
    /// Build an entry with sensitive fields already redacted from `details`.
    pub fn new(instance_id: DbId, action: &'static str, details: serde_json::Value) -> Self {
        Self {
            instance_id,
            step_id: None,
            user_id: None,
            action,
            details: redact_sensitive_fields(&details),
        }
    }

    pub fn with_step(mut self, step_id: DbId) -> Self {
        self.step_id = Some(step_id);
        self
    }

    pub fn with_user(mut self, user_id: Option<DbId>) -> Self {
        self.user_id = user_id;
        self
    }
}

// ---------------------------------------------------------------------------
// Sensitive field redaction
// ---------------------------------------------------------------------------

/// Fields that should be redacted from audit details before storage.
pub const SENSITIVE_FIELDS: &[&str] = &[
    "password",
    "token",
    "secret",
    "api_key",
    "private_key",
    "authorization",
    "credential",
];

/// Redact sensitive keys anywhere in a JSON value.
///
/// Replaces the value of any key containing one of [`SENSITIVE_FIELDS`]
/// (case-insensitive) with `"[REDACTED]"`.
pub fn redact_sensitive_fields(value: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::Object(map) => {
            let mut redacted = serde_json::Map::new();
            for (key, val) in map {
                let lower_key = key.to_lowercase();
                if SENSITIVE_FIELDS.iter().any(|f| lower_key.contains(f)) {
                    redacted.insert(
                        key.clone(),
                        serde_json::Value::String("[REDACTED]".to_string()),
                    );
                } else {
                    redacted.insert(key.clone(), redact_sensitive_fields(val));
                }
            }
            serde_json::Value::Object(redacted)
        }
        serde_json::Value::Array(arr) => {
            serde_json::Value::Array(arr.iter().map(redact_sensitive_fields).collect())
        }
        other => other.clone(),
    }
}
