use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};
use tracing::{debug, info, warn};
use validator::Validate;

use super::collaborators::{
    ActionExecutor, CollaboratorError, EmptyEntityAccessor, EntityAccessor, NoopActionExecutor,
    NoopNotifier, Notifier, StepContext,
};
use super::locks::InstanceLocks;
use super::store::{EngineStore, StepDraft, WorkflowDraft};
use super::{EngineConfig, EngineError, EngineResult};
use crate::aggregation::{aggregate, ApprovalPolicy, StepOutcome};
use crate::analytics::{AnalyticsScope, WorkflowAnalytics};
use crate::approval::{
    Approval, ApprovalInput, ApprovalQuery, ApprovalSummary, BulkApproveInput, BulkApproveResult,
    NewApproval, RecordedDecision,
};
use crate::audit::{actions, approval_action, NewAuditEntry};
use crate::condition::evaluate_conditions;
use crate::delegation::{may_act_for, resolve_approvers};
use crate::error::CoreError;
use crate::instance::{
    InstanceDetail, InstanceQuery, InstanceTransition, NewInstance, StartWorkflow, WorkflowInstance,
};
use crate::pagination::{Page, PageRequest};
use crate::types::DbId;
use crate::workflow::{
    ActionConfig, ApprovalConfig, NewStep, NewWorkflow, NotificationConfig, SideEffectPolicy,
    StepDefinition, StepGate, StepKind, WorkflowDefinition, WorkflowFilter, WorkflowPatch,
};

/// Result of responding to an approval.
#[derive(Debug, Clone, Serialize)]
pub struct ApprovalOutcome {
    pub approval: Approval,
    pub instance: WorkflowInstance,
}

/// Where the forward drive stands after advancing past a step.
enum Progress {
    At(WorkflowInstance, usize),
    Done(WorkflowInstance),
}

/// Drives workflow instances and serves the workflow operations.
///
/// Cheap to clone; clones share the store, collaborators and instance locks.
#[derive(Clone)]
pub struct WorkflowEngine {
    store: Arc<dyn EngineStore>,
    entities: Arc<dyn EntityAccessor>,
    notifier: Arc<dyn Notifier>,
    actions: Arc<dyn ActionExecutor>,
    locks: InstanceLocks,
    config: EngineConfig,
}

impl WorkflowEngine {
    /// Engine with no-op collaborators and default configuration.
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self {
            store,
            entities: Arc::new(EmptyEntityAccessor),
            notifier: Arc::new(NoopNotifier),
            actions: Arc::new(NoopActionExecutor),
            locks: InstanceLocks::new(),
            config: EngineConfig::default(),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_entity_accessor(mut self, entities: Arc<dyn EntityAccessor>) -> Self {
        self.entities = entities;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_action_executor(mut self, actions: Arc<dyn ActionExecutor>) -> Self {
        self.actions = actions;
        self
    }

    pub fn store(&self) -> &Arc<dyn EngineStore> {
        &self.store
    }

    pub fn config(&self) -> EngineConfig {
        self.config
    }

    // -----------------------------------------------------------------------
    // Definitions
    // -----------------------------------------------------------------------

    pub async fn create_workflow(
        &self,
        workspace_id: DbId,
        author: DbId,
        input: NewWorkflow,
    ) -> EngineResult<WorkflowDefinition> {
        let kinds = input.check()?;
        let draft = WorkflowDraft {
            name: input.name.trim().to_string(),
            description: input.description.clone(),
            workflow_type: input.workflow_type,
            config: input.config.clone(),
            is_active: input.is_active.unwrap_or(true),
        };
        let steps = step_drafts(&input.steps, kinds);
        let workflow = self
            .store
            .insert_workflow(workspace_id, author, &draft, &steps)
            .await?;

        info!(
            workflow_id = workflow.id,
            workspace_id,
            steps = workflow.steps.len(),
            "Workflow created"
        );
        Ok(workflow)
    }

    /// Patch a workflow. Supplying `steps` replaces every step, which is
    /// refused while any instance of the workflow is in progress.
    pub async fn update_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        patch: WorkflowPatch,
    ) -> EngineResult<WorkflowDefinition> {
        let kinds = patch.check()?;
        let current = self.require_workflow(workspace_id, id).await?;
        if kinds.is_some() {
            self.ensure_no_live_instances(id, "replace the steps of").await?;
        }

        let draft = WorkflowDraft {
            name: patch
                .name
                .as_deref()
                .map(|n| n.trim().to_string())
                .unwrap_or(current.name),
            description: patch.description.clone().or(current.description),
            workflow_type: patch.workflow_type.unwrap_or(current.workflow_type),
            config: patch.config.clone().unwrap_or(current.config),
            is_active: patch.is_active.unwrap_or(current.is_active),
        };
        let steps = match (patch.steps.as_deref(), kinds) {
            (Some(steps), Some(kinds)) => Some(step_drafts(steps, kinds)),
            _ => None,
        };

        let workflow = self
            .store
            .update_workflow(workspace_id, id, &draft, steps.as_deref())
            .await?
            .ok_or_else(|| CoreError::not_found("Workflow", id))?;

        info!(
            workflow_id = id,
            workspace_id,
            steps_replaced = steps.is_some(),
            "Workflow updated"
        );
        Ok(workflow)
    }

    /// Soft-delete a workflow. Refused while instances are in progress.
    pub async fn delete_workflow(&self, workspace_id: DbId, id: DbId) -> EngineResult<()> {
        self.require_workflow(workspace_id, id).await?;
        self.ensure_no_live_instances(id, "delete").await?;
        if !self.store.soft_delete_workflow(workspace_id, id).await? {
            return Err(CoreError::not_found("Workflow", id).into());
        }
        info!(workflow_id = id, workspace_id, "Workflow deleted");
        Ok(())
    }

    pub async fn get_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<WorkflowDefinition> {
        self.require_workflow(workspace_id, id).await
    }

    pub async fn list_workflows(
        &self,
        workspace_id: DbId,
        filter: &WorkflowFilter,
        page: PageRequest,
    ) -> EngineResult<Page<WorkflowDefinition>> {
        self.store.list_workflows(workspace_id, filter, page).await
    }

    // -----------------------------------------------------------------------
    // Instances
    // -----------------------------------------------------------------------

    /// Start an instance and drive it until it waits for approvals or
    /// reaches a terminal state.
    pub async fn start_workflow(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        input: StartWorkflow,
    ) -> EngineResult<WorkflowInstance> {
        input.validate().map_err(CoreError::from)?;
        let workflow = self.require_workflow(workspace_id, input.workflow_id).await?;

        if !workflow.is_active {
            return Err(CoreError::BadRequest("Workflow is not active".into()).into());
        }
        if !workflow.config.applies_to(&input.entity_type) {
            return Err(CoreError::BadRequest(format!(
                "Workflow does not apply to entity type '{}'",
                input.entity_type
            ))
            .into());
        }
        let Some(first) = workflow.steps.first() else {
            return Err(CoreError::BadRequest("Workflow has no steps".into()).into());
        };

        let metadata = match input.metadata {
            Some(Value::Null) | None => json!({}),
            Some(value) => value,
        };
        let instance = self
            .store
            .insert_instance(&NewInstance {
                workflow_id: workflow.id,
                workspace_id,
                entity_type: input.entity_type.clone(),
                entity_id: input.entity_id.clone(),
                current_step_id: first.id,
                metadata,
                started_by: Some(user_id),
            })
            .await?;

        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::WORKFLOW_STARTED,
                json!({
                    "workflow_name": workflow.name,
                    "entity_type": instance.entity_type,
                    "entity_id": instance.entity_id,
                }),
            )
            .with_user(Some(user_id)),
        )
        .await?;

        info!(
            instance_id = instance.id,
            workflow_id = workflow.id,
            entity_type = %instance.entity_type,
            entity_id = %instance.entity_id,
            user_id,
            "Workflow instance started"
        );

        let _guard = self.locks.lock(instance.id).await;
        self.drive(&workflow, instance, 0, Some(user_id)).await
    }

    pub async fn get_instance(&self, workspace_id: DbId, id: DbId) -> EngineResult<InstanceDetail> {
        let instance = self.require_instance(workspace_id, id).await?;
        let workflow = self
            .store
            .find_workflow(workspace_id, instance.workflow_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("Workflow", instance.workflow_id))?;
        let approvals = self.store.instance_approvals(instance.id).await?;
        let audit_log = self.store.instance_audit_log(instance.id).await?;
        Ok(InstanceDetail {
            instance,
            workflow,
            approvals,
            audit_log,
        })
    }

    pub async fn list_instances(
        &self,
        workspace_id: DbId,
        query: &InstanceQuery,
    ) -> EngineResult<Page<WorkflowInstance>> {
        self.store.list_instances(workspace_id, query).await
    }

    // -----------------------------------------------------------------------
    // Approvals
    // -----------------------------------------------------------------------

    /// Record `acting_user`'s decision on an approval and settle its step.
    ///
    /// The acting user must be the assigned approver or hold a delegation
    /// from them that is active now. Only `PENDING` approvals on the
    /// instance's current step can be answered.
    pub async fn approve(
        &self,
        workspace_id: DbId,
        approval_id: DbId,
        acting_user: DbId,
        input: ApprovalInput,
    ) -> EngineResult<ApprovalOutcome> {
        input.validate().map_err(CoreError::from)?;
        let approval = self.require_approval(workspace_id, approval_id).await?;
        self.authorize(workspace_id, &approval, acting_user).await?;

        let _guard = self.locks.lock(approval.instance_id).await;

        let approval = self.require_approval(workspace_id, approval_id).await?;
        if approval.status.is_resolved() {
            return Err(CoreError::Conflict(format!(
                "Approval {approval_id} has already been responded to"
            ))
            .into());
        }
        let instance = self.require_instance(workspace_id, approval.instance_id).await?;
        if instance.status.is_terminal() {
            return Err(CoreError::Conflict(format!(
                "Workflow instance {} is no longer in progress",
                instance.id
            ))
            .into());
        }
        if instance.current_step_id != Some(approval.step_id) {
            return Err(CoreError::Conflict(format!(
                "Approval {approval_id} belongs to a step that is no longer active"
            ))
            .into());
        }

        let workflow = self
            .store
            .find_workflow(workspace_id, instance.workflow_id, true)
            .await?
            .ok_or_else(|| CoreError::not_found("Workflow", instance.workflow_id))?;
        let index = workflow.step_index(approval.step_id).ok_or_else(|| {
            CoreError::Conflict(format!("Step {} no longer exists", approval.step_id))
        })?;
        let StepKind::Approval(ApprovalConfig { approval_type, .. }) = &workflow.steps[index].kind
        else {
            return Err(CoreError::Internal(format!(
                "Approval {approval_id} is attached to a non-approval step"
            ))
            .into());
        };

        let status = input.action.status();
        let decision = RecordedDecision {
            status,
            comments: input.comments.clone(),
            metadata: input.metadata.clone().unwrap_or_else(|| json!({})),
            responded_by: acting_user,
            responded_at: Utc::now(),
        };
        let recorded = self
            .store
            .record_decision(approval.id, &decision)
            .await?
            .ok_or_else(|| {
                CoreError::Conflict(format!("Approval {approval_id} has already been responded to"))
            })?;

        let on_behalf_of = (recorded.approver_id != acting_user).then_some(recorded.approver_id);
        self.audit(
            NewAuditEntry::new(
                instance.id,
                approval_action(status),
                json!({
                    "approval_id": recorded.id,
                    "comments": recorded.comments,
                    "on_behalf_of": on_behalf_of,
                }),
            )
            .with_step(recorded.step_id)
            .with_user(Some(acting_user)),
        )
        .await?;

        info!(
            approval_id,
            instance_id = instance.id,
            step_id = recorded.step_id,
            user_id = acting_user,
            status = status.as_str(),
            "Approval recorded"
        );

        let instance = self
            .settle_step(&workflow, index, *approval_type, instance, acting_user)
            .await?;
        Ok(ApprovalOutcome {
            approval: recorded,
            instance,
        })
    }

    /// Apply the same decision to several approvals. Each item succeeds or
    /// fails on its own; nothing is rolled back.
    pub async fn bulk_approve(
        &self,
        workspace_id: DbId,
        acting_user: DbId,
        input: BulkApproveInput,
    ) -> EngineResult<BulkApproveResult> {
        input.validate().map_err(CoreError::from)?;
        let mut result = BulkApproveResult::default();

        for &approval_id in &input.approval_ids {
            let single = ApprovalInput {
                action: input.action,
                comments: input.comments.clone(),
                metadata: None,
            };
            match self.approve(workspace_id, approval_id, acting_user, single).await {
                Ok(_) => result.record_success(),
                Err(err) => {
                    warn!(approval_id, user_id = acting_user, error = %err, "Bulk approval item failed");
                    let message = match &err {
                        EngineError::Storage(_) => "Internal error".to_string(),
                        other => other.to_string(),
                    };
                    result.record_failure(approval_id, message);
                }
            }
        }

        info!(
            user_id = acting_user,
            successful = result.successful,
            failed = result.failed,
            "Bulk approval finished"
        );
        Ok(result)
    }

    /// Approvals assigned to `user_id` or to anyone currently delegating to
    /// them.
    pub async fn list_pending_approvals(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        query: &ApprovalQuery,
    ) -> EngineResult<Page<ApprovalSummary>> {
        let delegations = self
            .store
            .active_delegations_to(workspace_id, user_id, Utc::now())
            .await?;
        let mut approver_ids = vec![user_id];
        for delegation in &delegations {
            if !approver_ids.contains(&delegation.from_user_id) {
                approver_ids.push(delegation.from_user_id);
            }
        }
        self.store
            .approvals_for_approvers(workspace_id, &approver_ids, query.status(), query.page())
            .await
    }

    pub async fn analytics(
        &self,
        workspace_id: DbId,
        scope: AnalyticsScope,
    ) -> EngineResult<WorkflowAnalytics> {
        if let Some(workflow_id) = scope.workflow_id {
            self.store
                .find_workflow(workspace_id, workflow_id, true)
                .await?
                .ok_or_else(|| CoreError::not_found("Workflow", workflow_id))?;
        }
        let counts = self
            .store
            .instance_counts(workspace_id, scope.workflow_id)
            .await?;
        Ok(WorkflowAnalytics::from_counts(scope.workflow_id, counts))
    }

    // -----------------------------------------------------------------------
    // Forward drive
    // -----------------------------------------------------------------------

    /// Run steps from `index` until an approval step opens or the instance
    /// terminates. The caller must hold the instance lock.
    async fn drive(
        &self,
        workflow: &WorkflowDefinition,
        mut instance: WorkflowInstance,
        mut index: usize,
        actor: Option<DbId>,
    ) -> EngineResult<WorkflowInstance> {
        loop {
            let step = workflow.steps.get(index).ok_or_else(|| {
                CoreError::Internal(format!(
                    "Workflow {} has no step at position {index}",
                    workflow.id
                ))
            })?;

            let passed = self.conditions_pass(&instance, step).await;
            let run = match step.gate(passed, workflow.config.required_step_policy) {
                StepGate::Proceed => true,
                StepGate::Skip => {
                    debug!(instance_id = instance.id, step_id = step.id, "Step conditions not met, skipping");
                    self.audit(
                        NewAuditEntry::new(
                            instance.id,
                            actions::STEP_SKIPPED,
                            json!({ "step_name": step.name, "reason": "conditions_not_met" }),
                        )
                        .with_step(step.id)
                        .with_user(actor),
                    )
                    .await?;
                    false
                }
                StepGate::Block => {
                    self.audit(
                        NewAuditEntry::new(
                            instance.id,
                            actions::STEP_BLOCKED,
                            json!({ "step_name": step.name, "reason": "conditions_not_met" }),
                        )
                        .with_step(step.id)
                        .with_user(actor),
                    )
                    .await?;
                    let rejected = self
                        .transition(&instance, InstanceTransition::Reject { at: Utc::now() })
                        .await?;
                    self.record_rejection(workflow, &rejected, step, actor, "required_step_blocked")
                        .await?;
                    return Ok(rejected);
                }
            };

            if run {
                debug!(
                    instance_id = instance.id,
                    step_id = step.id,
                    step_type = step.kind.step_type().as_str(),
                    "Processing step"
                );
                let failure = match &step.kind {
                    StepKind::Approval(config) => {
                        self.open_approvals(&instance, step, config, actor).await?;
                        return Ok(instance);
                    }
                    StepKind::Notification(config) => {
                        self.send_notifications(workflow, &instance, step, config, actor)
                            .await?
                    }
                    StepKind::Action(config) => {
                        self.execute_action(workflow, &instance, step, config, actor)
                            .await?
                    }
                    StepKind::Condition => None,
                };
                if let Some(message) = failure {
                    if workflow.config.side_effect_policy == SideEffectPolicy::Strict {
                        self.fail_step(workflow, &instance, step, actor, &message).await?;
                        return Err(EngineError::SideEffect {
                            step: step.name.clone(),
                            message,
                        });
                    }
                }
            }

            match self.advance(workflow, instance, index, actor).await? {
                Progress::At(next, next_index) => {
                    instance = next;
                    index = next_index;
                }
                Progress::Done(done) => return Ok(done),
            }
        }
    }

    /// Move past the step at `index`: to the next step, or to COMPLETED.
    async fn advance(
        &self,
        workflow: &WorkflowDefinition,
        instance: WorkflowInstance,
        index: usize,
        actor: Option<DbId>,
    ) -> EngineResult<Progress> {
        match workflow.steps.get(index + 1) {
            Some(next) => {
                let moved = self
                    .transition(&instance, InstanceTransition::Advance { step_id: next.id })
                    .await?;
                debug!(instance_id = moved.id, step_id = next.id, "Advanced to next step");
                Ok(Progress::At(moved, index + 1))
            }
            None => {
                let done = self
                    .transition(&instance, InstanceTransition::Complete { at: Utc::now() })
                    .await?;
                self.record_completion(workflow, &done, actor).await?;
                Ok(Progress::Done(done))
            }
        }
    }

    /// Aggregate the approvals of the step at `index` and act on the
    /// outcome, retrying on version conflicts.
    async fn settle_step(
        &self,
        workflow: &WorkflowDefinition,
        index: usize,
        policy: ApprovalPolicy,
        mut instance: WorkflowInstance,
        actor: DbId,
    ) -> EngineResult<WorkflowInstance> {
        let step = &workflow.steps[index];

        for attempt in 0..=self.config.conflict_retries {
            if attempt > 0 {
                instance = self.require_instance(instance.workspace_id, instance.id).await?;
                if instance.status.is_terminal() || instance.current_step_id != Some(step.id) {
                    debug!(instance_id = instance.id, step_id = step.id, "Step already settled elsewhere");
                    return Ok(instance);
                }
            }

            let approvals = self.store.step_approvals(instance.id, step.id).await?;
            let statuses: Vec<_> = approvals.iter().map(|a| a.status).collect();
            let outcome = aggregate(policy, &statuses);
            debug!(
                instance_id = instance.id,
                step_id = step.id,
                outcome = ?outcome,
                "Approval step aggregated"
            );

            let now = Utc::now();
            let transition = match outcome {
                StepOutcome::Pending => return Ok(instance),
                StepOutcome::Rejected | StepOutcome::Undecided => {
                    InstanceTransition::Reject { at: now }
                }
                StepOutcome::Satisfied => match workflow.steps.get(index + 1) {
                    Some(next) => InstanceTransition::Advance { step_id: next.id },
                    None => InstanceTransition::Complete { at: now },
                },
            };

            let Some(updated) = self
                .store
                .transition_instance(instance.id, instance.version, transition)
                .await?
            else {
                warn!(
                    instance_id = instance.id,
                    attempt,
                    "Instance modified concurrently while settling approval step"
                );
                continue;
            };

            self.close_leftover_approvals(&updated, step, outcome, actor)
                .await?;

            return match transition {
                InstanceTransition::Reject { .. } => {
                    let reason = if outcome == StepOutcome::Undecided {
                        self.audit(
                            NewAuditEntry::new(
                                updated.id,
                                actions::STEP_UNDECIDED,
                                json!({ "step_name": step.name, "approval_type": policy }),
                            )
                            .with_step(step.id)
                            .with_user(Some(actor)),
                        )
                        .await?;
                        "no_decision"
                    } else {
                        "approval_rejected"
                    };
                    self.record_rejection(workflow, &updated, step, Some(actor), reason)
                        .await?;
                    Ok(updated)
                }
                InstanceTransition::Complete { .. } => {
                    self.record_completion(workflow, &updated, Some(actor)).await?;
                    Ok(updated)
                }
                InstanceTransition::Advance { .. } => {
                    self.drive(workflow, updated, index + 1, Some(actor)).await
                }
            };
        }

        Err(CoreError::Conflict(format!(
            "Workflow instance {} kept changing while settling step {}",
            instance.id, step.id
        ))
        .into())
    }

    // -----------------------------------------------------------------------
    // Step handlers
    // -----------------------------------------------------------------------

    async fn conditions_pass(&self, instance: &WorkflowInstance, step: &StepDefinition) -> bool {
        if step.conditions.is_empty() {
            return true;
        }
        let entity = self.fetch_entity(instance).await;
        evaluate_conditions(&entity, &instance.metadata, &step.conditions)
    }

    /// Fetch the entity snapshot. Failures and timeouts fall back to an
    /// empty snapshot so conditions resolve against metadata only.
    async fn fetch_entity(&self, instance: &WorkflowInstance) -> Value {
        let fetch = self.entities.fetch(
            instance.workspace_id,
            &instance.entity_type,
            &instance.entity_id,
        );
        match tokio::time::timeout(self.config.entity_fetch_timeout, fetch).await {
            Ok(Ok(entity)) => entity,
            Ok(Err(err)) => {
                warn!(
                    instance_id = instance.id,
                    entity_type = %instance.entity_type,
                    entity_id = %instance.entity_id,
                    error = %err,
                    "Entity fetch failed, evaluating against an empty snapshot"
                );
                json!({})
            }
            Err(_) => {
                warn!(
                    instance_id = instance.id,
                    entity_type = %instance.entity_type,
                    entity_id = %instance.entity_id,
                    timeout_ms = self.config.entity_fetch_timeout.as_millis() as u64,
                    "Entity fetch timed out, evaluating against an empty snapshot"
                );
                json!({})
            }
        }
    }

    async fn open_approvals(
        &self,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        config: &ApprovalConfig,
        actor: Option<DbId>,
    ) -> EngineResult<()> {
        let now = Utc::now();
        let delegations = self
            .store
            .active_delegations_from(instance.workspace_id, &config.approvers, now)
            .await?;
        let resolved = resolve_approvers(&config.approvers, &delegations, now);

        let rows: Vec<NewApproval> = resolved
            .iter()
            .map(|r| NewApproval {
                instance_id: instance.id,
                step_id: step.id,
                approver_id: r.effective,
                delegated_from: r.delegated_from(),
            })
            .collect();
        let created = self.store.insert_approvals(&rows).await?;

        let delegated: Vec<Value> = resolved
            .iter()
            .filter_map(|r| {
                r.delegated_from()
                    .map(|from| json!({ "from": from, "to": r.effective }))
            })
            .collect();
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::APPROVALS_CREATED,
                json!({
                    "step_name": step.name,
                    "approval_type": config.approval_type,
                    "approvers": resolved.iter().map(|r| r.effective).collect::<Vec<_>>(),
                    "delegated": delegated,
                }),
            )
            .with_step(step.id)
            .with_user(actor),
        )
        .await?;

        info!(
            instance_id = instance.id,
            step_id = step.id,
            approvals = created.len(),
            "Awaiting approvals"
        );
        Ok(())
    }

    async fn send_notifications(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        config: &NotificationConfig,
        actor: Option<DbId>,
    ) -> EngineResult<Option<String>> {
        let ctx = step_context(workflow, instance, step);
        let error = self
            .notifier
            .notify(&config.recipients, &ctx)
            .await
            .err()
            .map(|err| log_side_effect_failure(instance, step, &err));
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::NOTIFICATIONS_SENT,
                json!({
                    "step_name": step.name,
                    "recipients": config.recipients,
                    "delivered": error.is_none(),
                    "error": error,
                }),
            )
            .with_step(step.id)
            .with_user(actor),
        )
        .await?;
        Ok(error)
    }

    async fn execute_action(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        config: &ActionConfig,
        actor: Option<DbId>,
    ) -> EngineResult<Option<String>> {
        let ctx = step_context(workflow, instance, step);
        let error = self
            .actions
            .execute(config, &ctx)
            .await
            .err()
            .map(|err| log_side_effect_failure(instance, step, &err));
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::ACTION_EXECUTED,
                json!({
                    "step_name": step.name,
                    "action_type": config.action_type,
                    "action_config": config.action_config,
                    "succeeded": error.is_none(),
                    "error": error,
                }),
            )
            .with_step(step.id)
            .with_user(actor),
        )
        .await?;
        Ok(error)
    }

    /// End the instance after a side effect failed under the `STRICT`
    /// policy. The step is recorded as failed and the instance rejected.
    async fn fail_step(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        actor: Option<DbId>,
        message: &str,
    ) -> EngineResult<()> {
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::STEP_FAILED,
                json!({
                    "step_name": step.name,
                    "step_type": step.kind.step_type().as_str(),
                    "error": message,
                }),
            )
            .with_step(step.id)
            .with_user(actor),
        )
        .await?;
        let rejected = self
            .transition(instance, InstanceTransition::Reject { at: Utc::now() })
            .await?;
        self.record_rejection(workflow, &rejected, step, actor, "side_effect_failed")
            .await
    }

    // -----------------------------------------------------------------------
    // Helpers
    // -----------------------------------------------------------------------

    async fn transition(
        &self,
        instance: &WorkflowInstance,
        transition: InstanceTransition,
    ) -> EngineResult<WorkflowInstance> {
        self.store
            .transition_instance(instance.id, instance.version, transition)
            .await?
            .ok_or_else(|| {
                CoreError::Conflict(format!(
                    "Workflow instance {} was modified concurrently",
                    instance.id
                ))
                .into()
            })
    }

    async fn record_completion(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        actor: Option<DbId>,
    ) -> EngineResult<()> {
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::WORKFLOW_COMPLETED,
                json!({ "workflow_name": workflow.name }),
            )
            .with_user(actor),
        )
        .await?;
        info!(instance_id = instance.id, workflow_id = workflow.id, "Workflow instance completed");
        Ok(())
    }

    async fn record_rejection(
        &self,
        workflow: &WorkflowDefinition,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        actor: Option<DbId>,
        reason: &str,
    ) -> EngineResult<()> {
        self.audit(
            NewAuditEntry::new(
                instance.id,
                actions::WORKFLOW_REJECTED,
                json!({ "workflow_name": workflow.name, "step_name": step.name, "reason": reason }),
            )
            .with_step(step.id)
            .with_user(actor),
        )
        .await?;
        info!(
            instance_id = instance.id,
            workflow_id = workflow.id,
            step_id = step.id,
            reason,
            "Workflow instance rejected"
        );
        Ok(())
    }

    async fn close_leftover_approvals(
        &self,
        instance: &WorkflowInstance,
        step: &StepDefinition,
        outcome: StepOutcome,
        actor: DbId,
    ) -> EngineResult<()> {
        let closed = self
            .store
            .close_pending_approvals(instance.id, step.id, Utc::now())
            .await?;
        if closed > 0 {
            self.audit(
                NewAuditEntry::new(
                    instance.id,
                    actions::APPROVALS_CLOSED,
                    json!({ "count": closed, "outcome": outcome }),
                )
                .with_step(step.id)
                .with_user(Some(actor)),
            )
            .await?;
        }
        Ok(())
    }

    async fn authorize(
        &self,
        workspace_id: DbId,
        approval: &Approval,
        acting_user: DbId,
    ) -> EngineResult<()> {
        if approval.approver_id == acting_user {
            return Ok(());
        }
        let now = Utc::now();
        let delegations = self
            .store
            .active_delegations_from(workspace_id, &[approval.approver_id], now)
            .await?;
        if may_act_for(&delegations, approval.approver_id, acting_user, now) {
            Ok(())
        } else {
            Err(CoreError::Forbidden(
                "You are not authorized to respond to this approval".into(),
            )
            .into())
        }
    }

    async fn ensure_no_live_instances(&self, workflow_id: DbId, verb: &str) -> EngineResult<()> {
        let live = self.store.count_in_progress(workflow_id).await?;
        if live > 0 {
            return Err(CoreError::Conflict(format!(
                "Cannot {verb} workflow {workflow_id} while {live} instance(s) are in progress"
            ))
            .into());
        }
        Ok(())
    }

    async fn require_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<WorkflowDefinition> {
        self.store
            .find_workflow(workspace_id, id, false)
            .await?
            .ok_or_else(|| CoreError::not_found("Workflow", id).into())
    }

    async fn require_instance(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<WorkflowInstance> {
        self.store
            .find_instance(workspace_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("WorkflowInstance", id).into())
    }

    async fn require_approval(&self, workspace_id: DbId, id: DbId) -> EngineResult<Approval> {
        self.store
            .find_approval(workspace_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("Approval", id).into())
    }

    async fn audit(&self, entry: NewAuditEntry) -> EngineResult<()> {
        self.store.append(entry).await.map(|_| ())
    }
}

fn log_side_effect_failure(
    instance: &WorkflowInstance,
    step: &StepDefinition,
    err: &CollaboratorError,
) -> String {
    warn!(
        instance_id = instance.id,
        step_id = step.id,
        step_type = step.kind.step_type().as_str(),
        error = %err,
        "Step side effect failed"
    );
    err.to_string()
}

fn step_drafts(steps: &[NewStep], kinds: Vec<StepKind>) -> Vec<StepDraft> {
    steps
        .iter()
        .zip(kinds)
        .map(|(step, kind)| StepDraft {
            name: step.name.trim().to_string(),
            description: step.description.clone(),
            order: step.order,
            is_required: step.required(),
            kind,
            conditions: step.conditions.clone(),
        })
        .collect()
}

fn step_context(
    workflow: &WorkflowDefinition,
    instance: &WorkflowInstance,
    step: &StepDefinition,
) -> StepContext {
    StepContext {
        workspace_id: instance.workspace_id,
        workflow_id: workflow.id,
        workflow_name: workflow.name.clone(),
        instance_id: instance.id,
        step_id: step.id,
        step_name: step.name.clone(),
        entity_type: instance.entity_type.clone(),
        entity_id: instance.entity_id.clone(),
        metadata: instance.metadata.clone(),
    }
}
