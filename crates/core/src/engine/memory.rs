//! In-process implementations of the storage and collaborator traits.
//!
//! Used by the test suites and by embedders that do not need durability.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{json, Value};

use super::collaborators::{ActionExecutor, CollaboratorError, EntityAccessor, Notifier, StepContext};
use super::store::{AuditSink, DelegationStore, StepDraft, WorkflowDraft, WorkflowStore};
use super::EngineResult;
use crate::aggregation::ApprovalStatus;
use crate::analytics::{mean_hours, InstanceCounts};
use crate::approval::{Approval, ApprovalSummary, NewApproval, RecordedDecision};
use crate::audit::{AuditEntry, NewAuditEntry};
use crate::delegation::Delegation;
use crate::error::CoreError;
use crate::instance::{
    InstanceQuery, InstanceStatus, InstanceTransition, NewInstance, WorkflowInstance,
};
use crate::pagination::{Page, PageRequest};
use crate::types::{DbId, Timestamp};
use crate::workflow::{ActionConfig, StepDefinition, WorkflowDefinition, WorkflowFilter};

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

#[derive(Debug)]
struct StoredWorkflow {
    definition: WorkflowDefinition,
    deleted_at: Option<Timestamp>,
}

#[derive(Debug, Default)]
struct State {
    last_id: DbId,
    workflows: BTreeMap<DbId, StoredWorkflow>,
    /// Every step ever created, including replaced ones.
    step_names: HashMap<DbId, String>,
    instances: BTreeMap<DbId, WorkflowInstance>,
    approvals: BTreeMap<DbId, Approval>,
    delegations: BTreeMap<DbId, Delegation>,
    audit: Vec<AuditEntry>,
    members: HashSet<(DbId, DbId)>,
}

impl State {
    fn next_id(&mut self) -> DbId {
        self.last_id += 1;
        self.last_id
    }

    fn build_steps(&mut self, workflow_id: DbId, drafts: &[StepDraft]) -> Vec<StepDefinition> {
        let mut steps: Vec<StepDefinition> = drafts
            .iter()
            .map(|draft| {
                let id = self.next_id();
                self.step_names.insert(id, draft.name.clone());
                let mut conditions = draft.conditions.clone();
                conditions.sort_by_key(|c| c.order);
                StepDefinition {
                    id,
                    workflow_id,
                    name: draft.name.clone(),
                    description: draft.description.clone(),
                    order: draft.order,
                    is_required: draft.is_required,
                    kind: draft.kind.clone(),
                    conditions,
                }
            })
            .collect();
        steps.sort_by_key(|s| s.order);
        steps
    }

    fn instance_in_workspace(&self, instance_id: DbId, workspace_id: DbId) -> bool {
        self.instances
            .get(&instance_id)
            .is_some_and(|i| i.workspace_id == workspace_id)
    }
}

/// Thread-safe, non-durable engine store.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: Mutex<State>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `user_ids` as members of `workspace_id`.
    pub fn add_members(&self, workspace_id: DbId, user_ids: &[DbId]) {
        let mut state = self.state();
        for &user_id in user_ids {
            state.members.insert((workspace_id, user_id));
        }
    }

    /// Audit entries for an instance in the order they were written.
    pub fn audit_trail(&self, instance_id: DbId) -> Vec<AuditEntry> {
        self.state()
            .audit
            .iter()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl WorkflowStore for InMemoryStore {
    async fn insert_workflow(
        &self,
        workspace_id: DbId,
        created_by: DbId,
        draft: &WorkflowDraft,
        steps: &[StepDraft],
    ) -> EngineResult<WorkflowDefinition> {
        let mut state = self.state();
        let id = state.next_id();
        let now = Utc::now();
        let definition = WorkflowDefinition {
            id,
            workspace_id,
            name: draft.name.clone(),
            description: draft.description.clone(),
            workflow_type: draft.workflow_type,
            config: draft.config.clone(),
            is_active: draft.is_active,
            created_by,
            created_at: now,
            updated_at: now,
            steps: state.build_steps(id, steps),
        };
        state.workflows.insert(
            id,
            StoredWorkflow {
                definition: definition.clone(),
                deleted_at: None,
            },
        );
        Ok(definition)
    }

    async fn update_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        draft: &WorkflowDraft,
        steps: Option<&[StepDraft]>,
    ) -> EngineResult<Option<WorkflowDefinition>> {
        let mut state = self.state();
        let exists = state.workflows.get(&id).is_some_and(|w| {
            w.definition.workspace_id == workspace_id && w.deleted_at.is_none()
        });
        if !exists {
            return Ok(None);
        }
        let new_steps = steps.map(|drafts| state.build_steps(id, drafts));
        let Some(stored) = state.workflows.get_mut(&id) else {
            return Ok(None);
        };
        let wf = &mut stored.definition;
        wf.name = draft.name.clone();
        wf.description = draft.description.clone();
        wf.workflow_type = draft.workflow_type;
        wf.config = draft.config.clone();
        wf.is_active = draft.is_active;
        wf.updated_at = Utc::now();
        if let Some(new_steps) = new_steps {
            wf.steps = new_steps;
        }
        Ok(Some(wf.clone()))
    }

    async fn soft_delete_workflow(&self, workspace_id: DbId, id: DbId) -> EngineResult<bool> {
        let mut state = self.state();
        match state.workflows.get_mut(&id) {
            Some(stored)
                if stored.definition.workspace_id == workspace_id && stored.deleted_at.is_none() =>
            {
                stored.deleted_at = Some(Utc::now());
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn find_workflow(
        &self,
        workspace_id: DbId,
        id: DbId,
        include_deleted: bool,
    ) -> EngineResult<Option<WorkflowDefinition>> {
        let state = self.state();
        Ok(state
            .workflows
            .get(&id)
            .filter(|w| w.definition.workspace_id == workspace_id)
            .filter(|w| include_deleted || w.deleted_at.is_none())
            .map(|w| w.definition.clone()))
    }

    async fn list_workflows(
        &self,
        workspace_id: DbId,
        filter: &WorkflowFilter,
        page: PageRequest,
    ) -> EngineResult<Page<WorkflowDefinition>> {
        let state = self.state();
        let matching: Vec<WorkflowDefinition> = state
            .workflows
            .values()
            .rev()
            .filter(|w| w.deleted_at.is_none() && w.definition.workspace_id == workspace_id)
            .filter(|w| filter.matches(&w.definition))
            .map(|w| w.definition.clone())
            .collect();
        Ok(page.slice(&matching))
    }

    async fn insert_instance(&self, input: &NewInstance) -> EngineResult<WorkflowInstance> {
        let mut state = self.state();
        let id = state.next_id();
        let now = Utc::now();
        let instance = WorkflowInstance {
            id,
            workflow_id: input.workflow_id,
            workspace_id: input.workspace_id,
            entity_type: input.entity_type.clone(),
            entity_id: input.entity_id.clone(),
            status: InstanceStatus::InProgress,
            current_step_id: Some(input.current_step_id),
            metadata: input.metadata.clone(),
            started_by: input.started_by,
            version: 0,
            started_at: now,
            completed_at: None,
            updated_at: now,
        };
        state.instances.insert(id, instance.clone());
        Ok(instance)
    }

    async fn find_instance(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<Option<WorkflowInstance>> {
        Ok(self
            .state()
            .instances
            .get(&id)
            .filter(|i| i.workspace_id == workspace_id)
            .cloned())
    }

    async fn list_instances(
        &self,
        workspace_id: DbId,
        query: &InstanceQuery,
    ) -> EngineResult<Page<WorkflowInstance>> {
        let state = self.state();
        let matching: Vec<WorkflowInstance> = state
            .instances
            .values()
            .rev()
            .filter(|i| i.workspace_id == workspace_id && query.filter.matches(i))
            .cloned()
            .collect();
        Ok(query.page.slice(&matching))
    }

    async fn transition_instance(
        &self,
        id: DbId,
        expected_version: i32,
        transition: InstanceTransition,
    ) -> EngineResult<Option<WorkflowInstance>> {
        let mut state = self.state();
        let Some(instance) = state.instances.get_mut(&id) else {
            return Err(CoreError::not_found("WorkflowInstance", id).into());
        };
        if instance.version != expected_version || instance.status.is_terminal() {
            return Ok(None);
        }
        transition.apply(instance, Utc::now());
        Ok(Some(instance.clone()))
    }

    async fn count_in_progress(&self, workflow_id: DbId) -> EngineResult<i64> {
        Ok(self
            .state()
            .instances
            .values()
            .filter(|i| i.workflow_id == workflow_id && i.status == InstanceStatus::InProgress)
            .count() as i64)
    }

    async fn instance_counts(
        &self,
        workspace_id: DbId,
        workflow_id: Option<DbId>,
    ) -> EngineResult<InstanceCounts> {
        let state = self.state();
        let scoped: Vec<&WorkflowInstance> = state
            .instances
            .values()
            .filter(|i| i.workspace_id == workspace_id)
            .filter(|i| workflow_id.is_none_or(|w| w == i.workflow_id))
            .collect();
        let count = |status: InstanceStatus| scoped.iter().filter(|i| i.status == status).count() as i64;
        Ok(InstanceCounts {
            total: scoped.len() as i64,
            completed: count(InstanceStatus::Completed),
            rejected: count(InstanceStatus::Rejected),
            in_progress: count(InstanceStatus::InProgress),
            avg_completion_hours: mean_hours(scoped.iter().filter_map(|i| {
                (i.status == InstanceStatus::Completed)
                    .then_some(i.completed_at)
                    .flatten()
                    .map(|done| done - i.started_at)
            })),
        })
    }

    async fn insert_approvals(&self, approvals: &[NewApproval]) -> EngineResult<Vec<Approval>> {
        let mut state = self.state();
        let duplicate = approvals.iter().any(|new| {
            state.approvals.values().any(|a| {
                a.instance_id == new.instance_id
                    && a.step_id == new.step_id
                    && a.approver_id == new.approver_id
            })
        });
        if duplicate {
            return Err(CoreError::Conflict("Approval already exists for approver".into()).into());
        }
        let now = Utc::now();
        let mut created = Vec::with_capacity(approvals.len());
        for new in approvals {
            let id = state.next_id();
            let approval = Approval {
                id,
                instance_id: new.instance_id,
                step_id: new.step_id,
                approver_id: new.approver_id,
                delegated_from: new.delegated_from,
                status: ApprovalStatus::Pending,
                comments: None,
                metadata: json!({}),
                responded_by: None,
                responded_at: None,
                created_at: now,
                updated_at: now,
            };
            state.approvals.insert(id, approval.clone());
            created.push(approval);
        }
        Ok(created)
    }

    async fn find_approval(&self, workspace_id: DbId, id: DbId) -> EngineResult<Option<Approval>> {
        let state = self.state();
        Ok(state
            .approvals
            .get(&id)
            .filter(|a| state.instance_in_workspace(a.instance_id, workspace_id))
            .cloned())
    }

    async fn record_decision(
        &self,
        id: DbId,
        decision: &RecordedDecision,
    ) -> EngineResult<Option<Approval>> {
        let mut state = self.state();
        match state.approvals.get_mut(&id) {
            Some(approval) if approval.status == ApprovalStatus::Pending => {
                approval.status = decision.status;
                approval.comments = decision.comments.clone();
                approval.metadata = decision.metadata.clone();
                approval.responded_by = Some(decision.responded_by);
                approval.responded_at = Some(decision.responded_at);
                approval.updated_at = decision.responded_at;
                Ok(Some(approval.clone()))
            }
            _ => Ok(None),
        }
    }

    async fn step_approvals(&self, instance_id: DbId, step_id: DbId) -> EngineResult<Vec<Approval>> {
        Ok(self
            .state()
            .approvals
            .values()
            .filter(|a| a.instance_id == instance_id && a.step_id == step_id)
            .cloned()
            .collect())
    }

    async fn close_pending_approvals(
        &self,
        instance_id: DbId,
        step_id: DbId,
        at: Timestamp,
    ) -> EngineResult<u64> {
        let mut state = self.state();
        let mut closed = 0;
        for approval in state.approvals.values_mut().filter(|a| {
            a.instance_id == instance_id && a.step_id == step_id && a.status == ApprovalStatus::Pending
        }) {
            approval.status = ApprovalStatus::Skipped;
            approval.updated_at = at;
            closed += 1;
        }
        Ok(closed)
    }

    async fn instance_approvals(&self, instance_id: DbId) -> EngineResult<Vec<Approval>> {
        Ok(self
            .state()
            .approvals
            .values()
            .filter(|a| a.instance_id == instance_id)
            .cloned()
            .collect())
    }

    async fn approvals_for_approvers(
        &self,
        workspace_id: DbId,
        approver_ids: &[DbId],
        status: ApprovalStatus,
        page: PageRequest,
    ) -> EngineResult<Page<ApprovalSummary>> {
        let state = self.state();
        let matching: Vec<ApprovalSummary> = state
            .approvals
            .values()
            .rev()
            .filter(|a| a.status == status && approver_ids.contains(&a.approver_id))
            .filter_map(|a| {
                let instance = state
                    .instances
                    .get(&a.instance_id)
                    .filter(|i| i.workspace_id == workspace_id)?;
                let workflow = state.workflows.get(&instance.workflow_id)?;
                Some(ApprovalSummary {
                    approval: a.clone(),
                    workflow_id: workflow.definition.id,
                    workflow_name: workflow.definition.name.clone(),
                    step_name: state.step_names.get(&a.step_id).cloned().unwrap_or_default(),
                    entity_type: instance.entity_type.clone(),
                    entity_id: instance.entity_id.clone(),
                })
            })
            .collect();
        Ok(page.slice(&matching))
    }
}

#[async_trait]
impl DelegationStore for InMemoryStore {
    async fn insert_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        to_user_id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Delegation> {
        let mut state = self.state();
        let id = state.next_id();
        let now = Utc::now();
        let delegation = Delegation {
            id,
            workspace_id,
            from_user_id,
            to_user_id,
            start_date,
            end_date,
            reason: reason.map(str::to_string),
            is_active: true,
            created_at: now,
            updated_at: now,
        };
        state.delegations.insert(id, delegation.clone());
        Ok(delegation)
    }

    async fn find_delegation(
        &self,
        workspace_id: DbId,
        id: DbId,
    ) -> EngineResult<Option<Delegation>> {
        Ok(self
            .state()
            .delegations
            .get(&id)
            .filter(|d| d.workspace_id == workspace_id)
            .cloned())
    }

    async fn list_delegations(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        page: PageRequest,
    ) -> EngineResult<Page<Delegation>> {
        let state = self.state();
        let matching: Vec<Delegation> = state
            .delegations
            .values()
            .rev()
            .filter(|d| {
                d.workspace_id == workspace_id
                    && (d.from_user_id == user_id || d.to_user_id == user_id)
            })
            .cloned()
            .collect();
        Ok(page.slice(&matching))
    }

    async fn active_delegations_for_user(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        Ok(self
            .state()
            .delegations
            .values()
            .rev()
            .filter(|d| {
                d.workspace_id == workspace_id
                    && (d.from_user_id == user_id || d.to_user_id == user_id)
                    && d.covers(at)
            })
            .cloned()
            .collect())
    }

    async fn active_delegations_from(
        &self,
        workspace_id: DbId,
        from_user_ids: &[DbId],
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        Ok(self
            .state()
            .delegations
            .values()
            .filter(|d| {
                d.workspace_id == workspace_id
                    && from_user_ids.contains(&d.from_user_id)
                    && d.covers(at)
            })
            .cloned()
            .collect())
    }

    async fn active_delegations_to(
        &self,
        workspace_id: DbId,
        to_user_id: DbId,
        at: Timestamp,
    ) -> EngineResult<Vec<Delegation>> {
        Ok(self
            .state()
            .delegations
            .values()
            .filter(|d| d.workspace_id == workspace_id && d.to_user_id == to_user_id && d.covers(at))
            .cloned()
            .collect())
    }

    async fn find_overlapping_delegation(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        start: Timestamp,
        end: Timestamp,
        exclude_id: Option<DbId>,
    ) -> EngineResult<Option<Delegation>> {
        Ok(self
            .state()
            .delegations
            .values()
            .find(|d| {
                d.workspace_id == workspace_id
                    && d.from_user_id == from_user_id
                    && d.is_active
                    && Some(d.id) != exclude_id
                    && d.overlaps(start, end)
            })
            .cloned())
    }

    async fn update_delegation(
        &self,
        id: DbId,
        start_date: Timestamp,
        end_date: Timestamp,
        reason: Option<&str>,
    ) -> EngineResult<Option<Delegation>> {
        let mut state = self.state();
        Ok(state.delegations.get_mut(&id).map(|d| {
            d.start_date = start_date;
            d.end_date = end_date;
            d.reason = reason.map(str::to_string);
            d.updated_at = Utc::now();
            d.clone()
        }))
    }

    async fn deactivate_delegation(&self, id: DbId) -> EngineResult<Option<Delegation>> {
        let mut state = self.state();
        Ok(state.delegations.get_mut(&id).map(|d| {
            d.is_active = false;
            d.updated_at = Utc::now();
            d.clone()
        }))
    }

    async fn user_in_workspace(&self, workspace_id: DbId, user_id: DbId) -> EngineResult<bool> {
        Ok(self.state().members.contains(&(workspace_id, user_id)))
    }
}

#[async_trait]
impl AuditSink for InMemoryStore {
    async fn append(&self, entry: NewAuditEntry) -> EngineResult<AuditEntry> {
        let mut state = self.state();
        let id = state.next_id();
        let stored = AuditEntry {
            id,
            instance_id: entry.instance_id,
            step_id: entry.step_id,
            user_id: entry.user_id,
            action: entry.action.to_string(),
            details: entry.details,
            created_at: Utc::now(),
        };
        state.audit.push(stored.clone());
        Ok(stored)
    }

    async fn instance_audit_log(&self, instance_id: DbId) -> EngineResult<Vec<AuditEntry>> {
        Ok(self
            .state()
            .audit
            .iter()
            .rev()
            .filter(|e| e.instance_id == instance_id)
            .cloned()
            .collect())
    }
}

// ---------------------------------------------------------------------------
// Collaborators
// ---------------------------------------------------------------------------

/// Serves fixed entity snapshots keyed by `(entity_type, entity_id)`.
#[derive(Debug, Default)]
pub struct StaticEntityAccessor {
    entities: Mutex<HashMap<(String, String), Value>>,
}

impl StaticEntityAccessor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, entity_type: &str, entity_id: &str, snapshot: Value) {
        self.entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .insert((entity_type.to_string(), entity_id.to_string()), snapshot);
    }
}

#[async_trait]
impl EntityAccessor for StaticEntityAccessor {
    async fn fetch(
        &self,
        _workspace_id: DbId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Value, CollaboratorError> {
        self.entities
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .get(&(entity_type.to_string(), entity_id.to_string()))
            .cloned()
            .ok_or_else(|| format!("{entity_type} {entity_id} not found").into())
    }
}

/// Records every notification; optionally fails them all.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(Vec<DbId>, StepContext)>>,
    fail: bool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn sent(&self) -> Vec<(Vec<DbId>, StepContext)> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn notify(&self, recipients: &[DbId], ctx: &StepContext) -> Result<(), CollaboratorError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((recipients.to_vec(), ctx.clone()));
        if self.fail {
            return Err("notification channel unavailable".into());
        }
        Ok(())
    }
}

/// Records every action; optionally fails them all.
#[derive(Debug, Default)]
pub struct RecordingActionExecutor {
    executed: Mutex<Vec<(ActionConfig, StepContext)>>,
    fail: bool,
}

impl RecordingActionExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn executed(&self) -> Vec<(ActionConfig, StepContext)> {
        self.executed.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }
}

#[async_trait]
impl ActionExecutor for RecordingActionExecutor {
    async fn execute(
        &self,
        action: &ActionConfig,
        ctx: &StepContext,
    ) -> Result<(), CollaboratorError> {
        self.executed
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((action.clone(), ctx.clone()));
        if self.fail {
            return Err(format!("action '{}' failed", action.action_type).into());
        }
        Ok(())
    }
}
