//! Approval records and the inputs for responding to them.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::aggregation::{ApprovalDecision, ApprovalStatus};
use crate::pagination::PageRequest;
use crate::types::{DbId, Timestamp};

/// One approver's decision slot for an instance step.
///
/// `approver_id` is the effective approver resolved when the step
/// activated; `delegated_from` holds the nominal approver when a delegation
/// applied.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Approval {
    pub id: DbId,
    pub instance_id: DbId,
    pub step_id: DbId,
    pub approver_id: DbId,
    pub delegated_from: Option<DbId>,
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub metadata: Value,
    pub responded_by: Option<DbId>,
    pub responded_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// Row to insert when an approval step activates.
#[derive(Debug, Clone, PartialEq)]
pub struct NewApproval {
    pub instance_id: DbId,
    pub step_id: DbId,
    pub approver_id: DbId,
    pub delegated_from: Option<DbId>,
}

/// A decision to persist on a `PENDING` approval.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedDecision {
    pub status: ApprovalStatus,
    pub comments: Option<String>,
    pub metadata: Value,
    pub responded_by: DbId,
    pub responded_at: Timestamp,
}

/// Body of an approval response.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct ApprovalInput {
    pub action: ApprovalDecision,
    #[validate(length(max = 5000))]
    pub comments: Option<String>,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Body of a bulk approval request.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct BulkApproveInput {
    #[serde(alias = "approvalIds")]
    #[validate(length(min = 1, max = 100))]
    pub approval_ids: Vec<DbId>,
    pub action: ApprovalDecision,
    #[validate(length(max = 5000))]
    pub comments: Option<String>,
}

/// Per-item failure in a bulk approval.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BulkFailure {
    pub approval_id: DbId,
    pub error: String,
}

/// Outcome of a bulk approval. Items are processed independently.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BulkApproveResult {
    pub successful: usize,
    pub failed: usize,
    pub total: usize,
    pub failures: Vec<BulkFailure>,
}

impl BulkApproveResult {
    pub fn record_success(&mut self) {
        self.successful += 1;
        self.total += 1;
    }

    pub fn record_failure(&mut self, approval_id: DbId, error: impl ToString) {
        self.failed += 1;
        self.total += 1;
        self.failures.push(BulkFailure {
            approval_id,
            error: error.to_string(),
        });
    }
}

/// An approval together with the instance and step it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ApprovalSummary {
    #[serde(flatten)]
    pub approval: Approval,
    pub workflow_id: DbId,
    pub workflow_name: String,
    pub step_name: String,
    pub entity_type: String,
    pub entity_id: String,
}

/// Query for an approver's inbox.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ApprovalQuery {
    /// Defaults to `PENDING`.
    pub status: Option<ApprovalStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl ApprovalQuery {
    pub fn status(&self) -> ApprovalStatus {
        self.status.unwrap_or(ApprovalStatus::Pending)
    }

    pub fn page(&self) -> PageRequest {
        PageRequest::new(self.limit, self.offset)
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn bulk_result_counts_both_outcomes() {
        let mut result = BulkApproveResult::default();
        result.record_success();
        result.record_failure(9, "Conflict: Approval already resolved");
        assert_eq!(result.successful, 1);
        assert_eq!(result.failed, 1);
        assert_eq!(result.total, 2);
        assert_eq!(result.failures[0].approval_id, 9);
    }

    #[test]
    fn bulk_input_rejects_empty_id_list() {
        let input: BulkApproveInput =
            serde_json::from_value(json!({"approvalIds": [], "action": "APPROVE"})).unwrap();
        assert!(input.validate().is_err());
    }

    #[test]
    fn approval_query_defaults_to_pending() {
        assert_eq!(ApprovalQuery::default().status(), ApprovalStatus::Pending);
    }
}
