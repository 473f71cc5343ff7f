//! [`PgStore`]: the engine's storage traits backed by PostgreSQL.

use async_trait::async_trait;
use cadence_core::aggregation::ApprovalStatus;
use cadence_core::analytics::InstanceCounts;
use cadence_core::approval::{Approval, ApprovalSummary, NewApproval, RecordedDecision};
use cadence_core::audit::{AuditEntry, NewAuditEntry};
use cadence_core::delegation::Delegation;
use cadence_core::engine::{
    AuditSink, DelegationStore, EngineError, EngineResult, StepDraft, WorkflowDraft, WorkflowStore,
};
use cadence_core::error::CoreError;
use cadence_core::instance::{InstanceQuery, InstanceTransition, NewInstance, WorkflowInstance};
use cadence_core::pagination::{Page, PageRequest};
use cadence_core::types::{DbId, Timestamp};
use cadence_core::workflow::{WorkflowDefinition, WorkflowFilter};
use sqlx::{PgPool, Postgres, Transaction};
use tracing::debug;

use crate::models::status::{ApprovalStatusId, InstanceStatusId};
use crate::models::workflow::{assemble, ConditionRow, StepRow, WorkflowRow};
use crate::models::RowError;
use crate::repositories::{
    ApprovalRepo, AuditLogRepo, ConditionRepo, DelegationRepo, InstanceRepo, StepRepo, UserRepo,
    WorkflowRepo,
};

// ---------------------------------------------------------------------------
// Error mapping
// ---------------------------------------------------------------------------

/// Map a database error into the engine's error space.
///
/// Constraint violations that encode domain rules become domain errors;
/// everything else is an opaque storage failure.
fn db_error(err: sqlx::Error) -> EngineError {
    if let sqlx::Error::Database(db) = &err {
        let constraint = db.constraint().unwrap_or_default();
        let mapped = match (db.code().as_deref(), constraint) {
            (Some("23P01"), "ex_workflow_delegations_overlap") => Some(CoreError::BadRequest(
                "Delegation period overlaps with an existing delegation".into(),
            )),
            (Some("23514"), "ck_workflow_delegations_range") => Some(CoreError::BadRequest(
                "End date must be after start date".into(),
            )),
            (Some("23514"), "ck_workflow_delegations_not_self") => {
                Some(CoreError::BadRequest("Cannot delegate to yourself".into()))
            }
            (Some("23505"), "uq_workflow_approvals_assignee") => Some(CoreError::Conflict(
                "Approval already exists for approver".into(),
            )),
            (Some("23505"), "uq_workflow_steps_order") => Some(CoreError::Validation(
                "Step orders must be unique within a workflow".into(),
            )),
            _ => None,
        };
        if let Some(core) = mapped {
            debug!(constraint, error = %db, "Constraint violation mapped to domain error");
            return core.into();
        }
    }
    EngineError::storage(err)
}

fn row_error(err: RowError) -> EngineError {
    EngineError::storage(err)
}

fn convert<R, T>(rows: Vec<R>) -> EngineResult<Vec<T>>
where
    T: TryFrom<R, Error = RowError>,
{
    rows.into_iter()
        .map(|row| T::try_from(row).map_err(row_error))
        .collect()
}

fn page_of<T>(items: Vec<T>, total: i64, page: PageRequest) -> Page<T> {
    Page {
        items,
        total,
        limit: page.limit(),
        offset: page.offset(),
    }
}

// ---------------------------------------------------------------------------
// PgStore
// ---------------------------------------------------------------------------

/// PostgreSQL implementation of [`WorkflowStore`], [`DelegationStore`] and
/// [`AuditSink`].
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Load steps and conditions for workflow rows and assemble definitions.
    async fn hydrate(&self, rows: Vec<WorkflowRow>) -> EngineResult<Vec<WorkflowDefinition>> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }
        let ids: Vec<DbId> = rows.iter().map(|w| w.id).collect();
        let steps = StepRepo::list_for_workflows(&self.pool, &ids)
            .await
            .map_err(db_error)?;
        let step_ids: Vec<DbId> = steps.iter().map(|s| s.id).collect();
        let conditions = ConditionRepo::list_for_steps(&self.pool, &step_ids)
            .await
            .map_err(db_error)?;
        assemble(rows, steps, conditions).map_err(row_error)
    }

    async fn insert_steps(
        tx: &mut Transaction<'_, Postgres>,
        workflow_id: DbId,
        drafts: &[StepDraft],
    ) -> Result<(Vec<StepRow>, Vec<ConditionRow>), sqlx::Error> {
        let mut steps = Vec::with_capacity(drafts.len());
        let mut conditions = Vec::new();
        for draft in drafts {
            let step = StepRepo::create(tx, workflow_id, draft).await?;
            for condition in &draft.conditions {
                conditions.push(ConditionRepo::create(tx, step.id, condition).await?);
            }
            steps.push(step);
        }
        Ok((steps, conditions))
    }
}

#[async_trait]
impl WorkflowStore for PgStore {
    async fn insert_workflow(
        &self,
        workspace_id: DbId,
        created_by: DbId,
        draft: &WorkflowDraft,
        steps: &[StepDraft],
    ) -> EngineResult<WorkflowDefinition> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let workflow = WorkflowRepo::create(&mut tx, workspace_id, created_by, draft)
            .await
            .map_err(db_error)?;
        let (step_rows, condition_rows) = Self::insert_steps(&mut tx, workflow.id, steps)
            .await
            .map_err(db_error)?;
        tx.commit().await.map_err(db_error)?;

        assemble(vec![workflow], step_rows, condition_rows)
            .map_err(row_error)?
            .pop()
            .ok_or_else(|| CoreError::Internal("Inserted workflow was not assembled".into()).into())
    }

    async fn update_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        draft: &WorkflowDraft,
        steps: Option<&[StepDraft]>,
    ) -> EngineResult<Option<WorkflowDefinition>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let Some(workflow) = WorkflowRepo::update(&mut tx, workspace_id, id, draft)
            .await
            .map_err(db_error)?
        else {
            return Ok(None);
        };
        if let Some(drafts) = steps {
            let retired = StepRepo::retire_for_workflow(&mut tx, workflow.id)
                .await
                .map_err(db_error)?;
            Self::insert_steps(&mut tx, workflow.id, drafts)
                .await
                .map_err(db_error)?;
            debug!(workflow_id = id, retired, added = drafts.len(), "Workflow steps replaced");
        }
        tx.commit().await.map_err(db_error)?;

        Ok(self.hydrate(vec![workflow]).await?.pop())
    }

    async fn soft_delete_workflow(&self, workspace_id: DbId, id: DbId) -> EngineResult<bool> {
        WorkflowRepo::soft_delete(&self.pool, workspace_id, id)
            .await
            .map_err(db_error)
    }

    async fn find_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        include_deleted: bool,
    ) -> EngineResult<Option<WorkflowDefinition>> {
        let row = WorkflowRepo::find_by_id(&self.pool, workspace_id, id, include_deleted)
            .await
            .map_err(db_error)?;
        match row {
            Some(row) => Ok(self.hydrate(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_workflows(
        &self,
        workspace_id: DbId,
        filter: &WorkflowFilter,
        page: PageRequest,
    ) -> EngineResult<Page<WorkflowDefinition>> {
        let rows = WorkflowRepo::list(&self.pool, workspace_id, filter, page.limit(), page.offset())
            .await
            .map_err(db_error)?;
        let total = WorkflowRepo::count(&self.pool, workspace_id, filter)
            .await
            .map_err(db_error)?;
        Ok(page_of(self.hydrate(rows).await?, total, page))
    }

    async fn insert_instance(&self, input: &NewInstance) -> EngineResult<WorkflowInstance> {
        let row = InstanceRepo::create(&self.pool, input)
            .await
            .map_err(db_error)?;
        row.try_into().map_err(row_error)
    }

    async fn find_instance(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<Option<WorkflowInstance>> {
        InstanceRepo::find_by_id(&self.pool, workspace_id, id)
            .await
            .map_err(db_error)?
            .map(WorkflowInstance::try_from)
            .transpose()
            .map_err(row_error)
    }

    async fn list_instances(
        &self,
        workspace_id: DbId,
        query: &InstanceQuery,
    ) -> EngineResult<Page<WorkflowInstance>> {
        let rows = InstanceRepo::list(
            &self.pool,
            workspace_id,
            &query.filter,
            query.page.limit(),
            query.page.offset(),
        )
        .await
        .map_err(db_error)?;
        let total = InstanceRepo::count(&self.pool, workspace_id, &query.filter)
            .await
            .map_err(db_error)?;
        Ok(page_of(convert(rows)?, total, query.page))
    }

    async fn transition_instance(
        &self,
        id: DbId,
        expected_version: i32,
        transition: InstanceTransition,
    ) -> EngineResult<Option<WorkflowInstance>> {
        let (status, current_step_id, completed_at) = match transition {
            InstanceTransition::Advance { step_id } => (InstanceStatusId::InProgress, Some(step_id), None),
            InstanceTransition::Complete { at } => (InstanceStatusId::Completed, None, Some(at)),
            InstanceTransition::Reject { at } => (InstanceStatusId::Rejected, None, Some(at)),
        };
        InstanceRepo::transition(
            &self.pool,
            id,
            expected_version,
            status,
            current_step_id,
            completed_at,
        )
        .await
        .map_err(db_error)?
        .map(WorkflowInstance::try_from)
        .transpose()
        .map_err(row_error)
    }

    async fn count_in_progress(&self, workflow_id: DbId) -> EngineResult<i64> {
        InstanceRepo::count_in_progress(&self.pool, workflow_id)
            .await
            .map_err(db_error)
    }

    async fn instance_counts(
        &self,
        workspace_id: DbId,
        workflow_id: Option<DbId>,
    ) -> EngineResult<InstanceCounts> {
        InstanceRepo::counts(&self.pool, workspace_id, workflow_id)
            .await
            .map(InstanceCounts::from)
            .map_err(db_error)
    }

    async fn insert_approvals(&self, approvals: &[NewApproval]) -> EngineResult<Vec<Approval>> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let mut rows = Vec::with_capacity(approvals.len());
        for approval in approvals {
            rows.push(ApprovalRepo::create(&mut tx, approval).await.map_err(db_error)?);
        }
        tx.commit().await.map_err(db_error)?;
        convert(rows)
    }

    async fn find_approval(&self, workspace_id: DbId, id: DbId) -> EngineResult<Option<Approval>> {
        ApprovalRepo::find_by_id(&self.pool, workspace_id, id)
            .await
            .map_err(db_error)?
            .map(Approval::try_from)
            .transpose()
            .map_err(row_error)
    }

    async fn record_decision(
        &self,
        id: DbId,
        decision: &RecordedDecision,
    ) -> EngineResult<Option<Approval>> {
        ApprovalRepo::record_decision(&self.pool, id, decision)
            .await
            .map_err(db_error)?
            .map(Approval::try_from)
            .transpose()
            .map_err(row_error)
    }

    async fn step_approvals(&self, instance_id: DbId, step_id: DbId) -> EngineResult<Vec<Approval>> {
        let rows = ApprovalRepo::list_for_step(&self.pool, instance_id, step_id)
            .await
            .map_err(db_error)?;
        convert(rows)
    }

    async fn close_pending_approvals(
        &self,
        instance_id: DbId,
        step_id: DbId,
        at: Timestamp,
    ) -> EngineResult<u64> {
        ApprovalRepo::close_pending(&self.pool, instance_id, step_id, at)
            .await
            .map_err(db_error)
    }

    async fn instance_approvals(&self, instance_id: DbId) -> EngineResult<Vec<Approval>> {
        let rows = ApprovalRepo::list_for_instance(&self.pool, instance_id)
            .await
            .map_err(db_error)?;
        convert(rows)
    }

    async fn approvals_for_approvers(
        &self,
        workspace_id: DbId,
        approver_ids: &[DbId],
        status: ApprovalStatus,
        page: PageRequest,
    ) -> EngineResult<Page<ApprovalSummary>> {
        let status = ApprovalStatusId::from(status).id();
        let rows = ApprovalRepo::list_for_approvers(
            &self.pool,
            workspace_id,
            approver_ids,
            status,
            page.limit(),
            page.offset(),
        )
        .await
        .map_err(db_error)?;
        let total = ApprovalRepo::count_for_approvers(&self.pool, workspace_id, approver_ids, status)
            .await
            .map_err(db_error)?;
        Ok(page_of(convert(rows)?, total, page))
    }
}

#[async_trait]
impl DelegationStore for PgStore {
    async fn insert_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        to_user_id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Delegation> {
        DelegationRepo::create(
            &self.pool,
            workspace_id,
            from_user_id,
            to_user_id,
            start_date,
            end_date,
            reason,
        )
        .await
        .map(Delegation::from)
        .map_err(db_error)
    }

    async fn find_delegation(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<Option<Delegation>> {
        DelegationRepo::find_by_id(&self.pool, workspace_id, id)
            .await
            .map(|row| row.map(Delegation::from))
            .map_err(db_error)
    }

    async fn list_delegations(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        page: PageRequest,
    ) -> EngineResult<Page<Delegation>> {
        let rows = DelegationRepo::list_for_user(
            &self.pool,
            workspace_id,
            user_id,
            page.limit(),
            page.offset(),
        )
        .await
        .map_err(db_error)?;
        let total = DelegationRepo::count_for_user(&self.pool, workspace_id, user_id)
            .await
            .map_err(db_error)?;
        Ok(page_of(
            rows.into_iter().map(Delegation::from).collect(),
            total,
            page,
        ))
    }

    async fn active_delegations_for_user(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        DelegationRepo::list_active_for_user(&self.pool, workspace_id, user_id, at)
            .await
            .map(|rows| rows.into_iter().map(Delegation::from).collect())
            .map_err(db_error)
    }

    async fn active_delegations_from(
        &self,
        workspace_id: DbId,
        from_user_ids: &[DbId],
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        DelegationRepo::list_active_from(&self.pool, workspace_id, from_user_ids, at)
            .await
            .map(|rows| rows.into_iter().map(Delegation::from).collect())
            .map_err(db_error)
    }

    async fn active_delegations_to(
        &self,
        workspace_id: DbId,
        to_user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        DelegationRepo::list_active_to(&self.pool, workspace_id, to_user_id, at)
            .await
            .map(|rows| rows.into_iter().map(Delegation::from).collect())
            .map_err(db_error)
    }

    async fn find_overlapping_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        start: Timestamp,
        end: Timestamp,
        exclude_id: Option<DbId>,
    ) -> EngineResult<Option<Delegation>> {
        DelegationRepo::find_overlapping(&self.pool, workspace_id, from_user_id, start, end, exclude_id)
            .await
            .map(|row| row.map(Delegation::from))
            .map_err(db_error)
    }

    async fn update_delegation(
        &self,
        id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Option<Delegation>> {
        DelegationRepo::update(&self.pool, id, start_date, end_date, reason)
            .await
            .map(|row| row.map(Delegation::from))
            .map_err(db_error)
    }

    async fn deactivate_delegation(&self, id: DbId) -> EngineResult<Option<Delegation>> {
        DelegationRepo::deactivate(&self.pool, id)
            .await
            .map(|row| row.map(Delegation::from))
            .map_err(db_error)
    }

    async fn user_in_workspace(&self, workspace_id: DbId, user_id: DbId) -> EngineResult<bool> {
        UserRepo::is_member(&self.pool, workspace_id, user_id)
            .await
            .map_err(db_error)
    }
}

#[async_trait]
impl AuditSink for PgStore {
    async fn append(&self, entry: NewAuditEntry) -> EngineResult<AuditEntry> {
        AuditLogRepo::create(&self.pool, &entry)
            .await
            .map(AuditEntry::from)
            .map_err(db_error)
    }

    async fn instance_audit_log(&self, instance_id: DbId) -> EngineResult<Vec<AuditEntry>> {
        AuditLogRepo::list_for_instance(&self.pool, instance_id)
            .await
            .map(|rows| rows.into_iter().map(AuditEntry::from).collect())
            .map_err(db_error)
    }
}
