//! Storage traits the engine is generic over.
//!
//! Every method is scoped so that an implementation can enforce tenancy in
//! its queries. Lookups return `Ok(None)` for rows that are absent or
//! belong to another workspace; the engine turns that into `NotFound`.

use async_trait::async_trait;

use super::EngineResult;
use crate::aggregation::ApprovalStatus;
use crate::analytics::InstanceCounts;
use crate::approval::{Approval, ApprovalSummary, NewApproval, RecordedDecision};
use crate::audit::{AuditEntry, NewAuditEntry};
use crate::condition::Condition;
use crate::delegation::Delegation;
use crate::instance::{InstanceQuery, InstanceTransition, NewInstance, WorkflowInstance};
use crate::pagination::{Page, PageRequest};
use crate::types::{DbId, Timestamp};
use crate::workflow::{StepKind, WorkflowConfig, WorkflowDefinition, WorkflowFilter, WorkflowType};

/// Scalar workflow fields ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkflowDraft {
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: WorkflowType,
    pub config: WorkflowConfig,
    pub is_active: bool,
}

/// A validated step ready to persist.
#[derive(Debug, Clone, PartialEq)]
pub struct StepDraft {
    pub name: String,
    pub description: Option<String>,
    pub order: i32,
    pub is_required: bool,
    pub kind: StepKind,
    pub conditions: Vec<Condition>,
}

/// Workflow definitions, instances and approvals.
#[async_trait]
pub trait WorkflowStore: Send + Sync {
    // -- definitions --------------------------------------------------------

    /// Insert a workflow with its steps and conditions as one unit.
    async fn insert_workflow(
        &self,
        workspace_id: DbId,
        created_by: DbId,
        draft: &WorkflowDraft,
        steps: &[StepDraft],
    ) -> EngineResult<WorkflowDefinition>;

    /// Overwrite scalar fields and, when `steps` is given, replace every
    /// step as one unit. Replaced steps stay readable for history.
    async fn update_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        draft: &WorkflowDraft,
        steps: Option<&[StepDraft]>,
    ) -> EngineResult<Option<WorkflowDefinition>>;

    /// Soft-delete. Returns `false` if nothing matched.
    async fn soft_delete_workflow(&self, workspace_id: DbId, id: DbId) -> EngineResult<bool>;

    /// Find a workflow with its current steps. Deleted workflows are only
    /// returned when `include_deleted` is set.
    async fn find_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        include_deleted: bool,
    ) -> EngineResult<Option<WorkflowDefinition>>;

    async fn list_workflows(
        &self,
        workspace_id: DbId,
        filter: &WorkflowFilter,
        page: PageRequest,
    ) -> EngineResult<Page<WorkflowDefinition>>;

    // -- instances ----------------------------------------------------------

    async fn insert_instance(&self, input: &NewInstance) -> EngineResult<WorkflowInstance>;

    async fn find_instance(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<Option<WorkflowInstance>>;

    async fn list_instances(
        &self,
        workspace_id: DbId,
        query: &InstanceQuery,
    ) -> EngineResult<Page<WorkflowInstance>>;

    /// Apply `transition` only if the stored version equals
    /// `expected_version`. Returns `None` on a version mismatch.
    async fn transition_instance(
        &self,
        id: DbId,
        expected_version: i32,
        transition: InstanceTransition,
    ) -> EngineResult<Option<WorkflowInstance>>;

    async fn count_in_progress(&self, workflow_id: DbId) -> EngineResult<i64>;

    async fn instance_counts(
        &self,
        workspace_id: DbId,
        workflow_id: Option<DbId>,
    ) -> EngineResult<InstanceCounts>;

    // -- approvals ----------------------------------------------------------

    async fn insert_approvals(&self, approvals: &[NewApproval]) -> EngineResult<Vec<Approval>>;

    async fn find_approval(&self, workspace_id: DbId, id: DbId) -> EngineResult<Option<Approval>>;

    /// Persist a decision if the approval is still `PENDING`. Returns
    /// `None` when it was already resolved.
    async fn record_decision(
        &self,
        id: DbId,
        decision: &RecordedDecision,
    ) -> EngineResult<Option<Approval>>;

    async fn step_approvals(&self, instance_id: DbId, step_id: DbId) -> EngineResult<Vec<Approval>>;

    /// Mark every remaining `PENDING` approval of a step as `SKIPPED`.
    /// Returns the number of approvals closed.
    async fn close_pending_approvals(
        &self,
        instance_id: DbId,
        step_id: DbId,
        at: Timestamp,
    ) -> EngineResult<u64>;

    async fn instance_approvals(&self, instance_id: DbId) -> EngineResult<Vec<Approval>>;

    /// Approvals assigned to any of `approver_ids`, newest first.
    async fn approvals_for_approvers(
        &self,
        workspace_id: DbId,
        approver_ids: &[DbId],
        status: ApprovalStatus,
        page: PageRequest,
    ) -> EngineResult<Page<ApprovalSummary>>;
}

/// Delegations and workspace membership.
#[async_trait]
pub trait DelegationStore: Send + Sync {
    async fn insert_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        to_user_id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Delegation>;

    async fn find_delegation(&self, workspace_id: DbId, id: DbId)
        -> EngineResult<Option<Delegation>>;

    /// Delegations given or received by `user_id`, newest first.
    async fn list_delegations(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        page: PageRequest,
    ) -> EngineResult<Page<Delegation>>;

    /// Active delegations given or received by `user_id` covering `at`.
    async fn active_delegations_for_user(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>>;

    /// Active delegations from any of `from_user_ids` covering `at`.
    async fn active_delegations_from(
        &self,
        workspace_id: DbId,
        from_user_ids: &[DbId],
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>>;

    /// Active delegations to `to_user_id` covering `at`.
    async fn active_delegations_to(
        &self,
        workspace_id: DbId,
        to_user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>>;

    /// First active delegation from `from_user_id` whose window intersects
    /// `[start, end]`, ignoring `exclude_id`.
    async fn find_overlapping_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        start: Timestamp,
        end: Timestamp,
        exclude_id: Option<DbId>,
    ) -> EngineResult<Option<Delegation>>;

    async fn update_delegation(
        &self,
        id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Option<Delegation>>;

    async fn deactivate_delegation(&self, id: DbId) -> EngineResult<Option<Delegation>>;

    async fn user_in_workspace(&self, workspace_id: DbId, user_id: DbId) -> EngineResult<bool>;
}

/// Append-only audit trail.
#[async_trait]
pub trait AuditSink: Send + Sync {
    async fn append(&self, entry: NewAuditEntry) -> EngineResult<AuditEntry>;

    /// Entries for an instance, newest first. Used for display only.
    async fn instance_audit_log(&self, instance_id: DbId) -> EngineResult<Vec<AuditEntry>>;
}

/// Everything the engine needs from storage.
pub trait EngineStore: WorkflowStore + DelegationStore + AuditSink {}

impl<T: WorkflowStore + DelegationStore + AuditSink> EngineStore for T {}
