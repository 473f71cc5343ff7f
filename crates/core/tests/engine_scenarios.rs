//! End-to-end engine behaviour against the in-memory store.

use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::{json, Value};

use cadence_core::aggregation::{ApprovalDecision, ApprovalStatus};
use cadence_core::analytics::AnalyticsScope;
use cadence_core::approval::{Approval, ApprovalInput, ApprovalQuery, BulkApproveInput};
use cadence_core::delegation::{DelegationPatch, NewDelegation};
use cadence_core::engine::{
    CollaboratorError, DelegationService, EngineConfig, EngineError, EngineStore, EntityAccessor,
    InMemoryStore, RecordingActionExecutor, RecordingNotifier, StaticEntityAccessor,
    WorkflowEngine,
};
use cadence_core::error::CoreError;
use cadence_core::instance::{InstanceStatus, StartWorkflow, WorkflowInstance};
use cadence_core::types::DbId;
use cadence_core::workflow::{NewWorkflow, WorkflowDefinition, WorkflowPatch};

const WS: DbId = 1;
const ADMIN: DbId = 100;
const ALICE: DbId = 101;
const BOB: DbId = 102;
const CAROL: DbId = 103;
const VICTOR: DbId = 104;
const WALTER: DbId = 105;

// ---------------------------------------------------------------------------
// Harness
// ---------------------------------------------------------------------------

struct Harness {
    store: Arc<InMemoryStore>,
    engine: WorkflowEngine,
    delegations: DelegationService,
    entities: Arc<StaticEntityAccessor>,
    notifier: Arc<RecordingNotifier>,
    actions: Arc<RecordingActionExecutor>,
}

fn harness_with(notifier: RecordingNotifier, actions: RecordingActionExecutor) -> Harness {
    let store = Arc::new(InMemoryStore::new());
    store.add_members(WS, &[ADMIN, ALICE, BOB, CAROL, VICTOR, WALTER]);
    let dyn_store: Arc<dyn EngineStore> = store.clone();
    let entities = Arc::new(StaticEntityAccessor::new());
    let notifier = Arc::new(notifier);
    let actions = Arc::new(actions);
    let engine = WorkflowEngine::new(dyn_store.clone())
        .with_entity_accessor(entities.clone())
        .with_notifier(notifier.clone())
        .with_action_executor(actions.clone());
    Harness {
        store,
        engine,
        delegations: DelegationService::new(dyn_store),
        entities,
        notifier,
        actions,
    }
}

fn harness() -> Harness {
    harness_with(RecordingNotifier::new(), RecordingActionExecutor::new())
}

fn definition(body: Value) -> NewWorkflow {
    serde_json::from_value(body).expect("workflow definition should parse")
}

impl Harness {
    async fn create(&self, body: Value) -> WorkflowDefinition {
        self.engine
            .create_workflow(WS, ADMIN, definition(body))
            .await
            .expect("workflow should be created")
    }

    async fn start(&self, workflow_id: DbId, metadata: Value) -> WorkflowInstance {
        self.engine
            .start_workflow(WS, ADMIN, start_input(workflow_id, metadata))
            .await
            .expect("workflow should start")
    }

    async fn approvals(&self, instance_id: DbId) -> Vec<Approval> {
        self.engine
            .get_instance(WS, instance_id)
            .await
            .expect("instance should exist")
            .approvals
    }

    async fn approval_for(&self, instance_id: DbId, approver: DbId) -> Approval {
        self.approvals(instance_id)
            .await
            .into_iter()
            .find(|a| a.approver_id == approver && a.status == ApprovalStatus::Pending)
            .expect("pending approval for approver")
    }

    async fn decide(
        &self,
        approval_id: DbId,
        user: DbId,
        action: ApprovalDecision,
    ) -> Result<WorkflowInstance, EngineError> {
        self.engine
            .approve(WS, approval_id, user, decision(action))
            .await
            .map(|outcome| outcome.instance)
    }

    fn audit_actions(&self, instance_id: DbId) -> Vec<String> {
        self.store
            .audit_trail(instance_id)
            .into_iter()
            .map(|e| e.action)
            .collect()
    }
}

fn start_input(workflow_id: DbId, metadata: Value) -> StartWorkflow {
    StartWorkflow {
        workflow_id,
        entity_type: "post".into(),
        entity_id: "post-1".into(),
        metadata: Some(metadata),
    }
}

fn decision(action: ApprovalDecision) -> ApprovalInput {
    ApprovalInput {
        action,
        comments: None,
        metadata: None,
    }
}

fn approval_step(order: i32, policy: &str, approvers: &[DbId]) -> Value {
    json!({
        "name": format!("Approval {order}"),
        "type": "APPROVAL",
        "order": order,
        "config": {"approvers": approvers, "approvalType": policy},
    })
}

fn notification_step(order: i32) -> Value {
    json!({
        "name": format!("Notify {order}"),
        "type": "NOTIFICATION",
        "order": order,
        "config": {"recipients": [ALICE]},
    })
}

fn action_step(order: i32) -> Value {
    json!({
        "name": format!("Publish {order}"),
        "type": "ACTION",
        "order": order,
        "config": {"actionType": "publish", "actionConfig": {"channel": "blog"}},
    })
}

fn assert_core(err: &EngineError) -> &CoreError {
    err.as_core().expect("expected a domain error")
}

// ---------------------------------------------------------------------------
// Forward drive
// ---------------------------------------------------------------------------

#[tokio::test]
async fn non_approval_workflow_completes_in_one_call() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Automation",
            "type": "AUTOMATION",
            "steps": [
                {"name": "Gate", "type": "CONDITION", "order": 0},
                notification_step(1),
                action_step(2),
            ]
        }))
        .await;

    let instance = h.start(wf.id, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert_eq!(instance.current_step_id, None);
    assert!(instance.completed_at.is_some());
    assert_eq!(h.notifier.sent().len(), 1);
    assert_eq!(h.actions.executed()[0].0.action_type, "publish");
    assert_eq!(
        h.audit_actions(instance.id),
        vec![
            "WORKFLOW_STARTED",
            "NOTIFICATIONS_SENT",
            "ACTION_EXECUTED",
            "WORKFLOW_COMPLETED"
        ]
    );
}

#[tokio::test]
async fn steps_run_in_order_regardless_of_submission_order() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Out of order",
            "steps": [action_step(5), notification_step(1)]
        }))
        .await;
    assert_eq!(wf.steps[0].order, 1);

    let instance = h.start(wf.id, json!({})).await;
    let trail = h.audit_actions(instance.id);
    let notified = trail.iter().position(|a| a == "NOTIFICATIONS_SENT").unwrap();
    let acted = trail.iter().position(|a| a == "ACTION_EXECUTED").unwrap();
    assert!(notified < acted);
}

#[tokio::test]
async fn start_rejects_inactive_mismatched_and_empty_workflows() {
    let h = harness();

    let inactive = h
        .create(json!({"name": "Off", "isActive": false, "steps": [notification_step(0)]}))
        .await;
    let err = h
        .engine
        .start_workflow(WS, ADMIN, start_input(inactive.id, json!({})))
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(msg) if msg.contains("not active"));

    let campaigns_only = h
        .create(json!({
            "name": "Campaigns",
            "config": {"entityTypes": ["campaign"]},
            "steps": [notification_step(0)]
        }))
        .await;
    let err = h
        .engine
        .start_workflow(WS, ADMIN, start_input(campaigns_only.id, json!({})))
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(msg) if msg.contains("entity type"));

    let empty = h.create(json!({"name": "Empty", "steps": []})).await;
    let err = h
        .engine
        .start_workflow(WS, ADMIN, start_input(empty.id, json!({})))
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(msg) if msg.contains("no steps"));

    let err = h
        .engine
        .start_workflow(WS, ADMIN, start_input(9999, json!({})))
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { entity: "Workflow", .. });
}

// ---------------------------------------------------------------------------
// Aggregation policies
// ---------------------------------------------------------------------------

#[tokio::test]
async fn all_policy_waits_for_every_approver() {
    let h = harness();
    let wf = h
        .create(json!({"name": "All", "steps": [approval_step(0, "ALL", &[ALICE, BOB, CAROL])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    assert_eq!(instance.status, InstanceStatus::InProgress);

    for approver in [ALICE, BOB] {
        let approval = h.approval_for(instance.id, approver).await;
        let state = h.decide(approval.id, approver, ApprovalDecision::Approve).await.unwrap();
        assert_eq!(state.status, InstanceStatus::InProgress);
    }

    let last = h.approval_for(instance.id, CAROL).await;
    let state = h.decide(last.id, CAROL, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn all_policy_single_rejection_rejects_instance() {
    let h = harness();
    let wf = h
        .create(json!({"name": "All", "steps": [approval_step(0, "ALL", &[ALICE, BOB, CAROL]), notification_step(1)]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let approval = h.approval_for(instance.id, BOB).await;
    let state = h.decide(approval.id, BOB, ApprovalDecision::Reject).await.unwrap();

    assert_eq!(state.status, InstanceStatus::Rejected);
    assert_eq!(state.current_step_id, None);
    assert!(state.completed_at.is_some());
    assert!(h.notifier.sent().is_empty());

    // The other approvers' slots are closed, not left pending.
    let approvals = h.approvals(instance.id).await;
    assert!(approvals.iter().all(|a| a.status != ApprovalStatus::Pending));
    let trail = h.audit_actions(instance.id);
    assert!(trail.contains(&"APPROVALS_CLOSED".to_string()));
    assert_eq!(trail.last().map(String::as_str), Some("WORKFLOW_REJECTED"));
}

#[tokio::test]
async fn majority_of_three_is_satisfied_by_two_approvals() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Majority", "steps": [approval_step(0, "MAJORITY", &[ALICE, BOB, CAROL])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let first = h.approval_for(instance.id, ALICE).await;
    let state = h.decide(first.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);

    let second = h.approval_for(instance.id, CAROL).await;
    let state = h.decide(second.id, CAROL, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);

    let third = h
        .approvals(instance.id)
        .await
        .into_iter()
        .find(|a| a.approver_id == BOB)
        .unwrap();
    assert_eq!(third.status, ApprovalStatus::Skipped);
}

#[tokio::test]
async fn any_policy_rejection_waits_for_outstanding_approvals() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Any", "steps": [approval_step(0, "ANY", &[ALICE, BOB])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let a = h.approval_for(instance.id, ALICE).await;
    let state = h.decide(a.id, ALICE, ApprovalDecision::Reject).await.unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);

    let b = h.approval_for(instance.id, BOB).await;
    let state = h.decide(b.id, BOB, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn skipped_approval_keeps_majority_pending() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Majority", "steps": [approval_step(0, "MAJORITY", &[ALICE, BOB, CAROL])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let a = h.approval_for(instance.id, ALICE).await;
    h.decide(a.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    let b = h.approval_for(instance.id, BOB).await;
    let state = h.decide(b.id, BOB, ApprovalDecision::Skip).await.unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);

    let c = h.approval_for(instance.id, CAROL).await;
    let state = h.decide(c.id, CAROL, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);
}

#[tokio::test]
async fn all_policy_with_a_skip_ends_undecided_and_rejects() {
    let h = harness();
    let wf = h
        .create(json!({"name": "All", "steps": [approval_step(0, "ALL", &[ALICE, BOB]), notification_step(1)]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let a = h.approval_for(instance.id, ALICE).await;
    let state = h.decide(a.id, ALICE, ApprovalDecision::Skip).await.unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);

    let b = h.approval_for(instance.id, BOB).await;
    let state = h.decide(b.id, BOB, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Rejected);
    assert_eq!(state.current_step_id, None);
    assert!(h.notifier.sent().is_empty());

    let trail = h.store.audit_trail(instance.id);
    let n = trail.len();
    assert_eq!(trail[n - 2].action, "STEP_UNDECIDED");
    assert_eq!(trail[n - 1].action, "WORKFLOW_REJECTED");
    assert_eq!(trail[n - 1].details["reason"], "no_decision");
}

// ---------------------------------------------------------------------------
// Delegation
// ---------------------------------------------------------------------------

fn window(start_days: i64, end_days: i64) -> NewDelegation {
    let now = Utc::now();
    NewDelegation {
        to_user_id: VICTOR,
        start_date: now + ChronoDuration::days(start_days),
        end_date: now + ChronoDuration::days(end_days),
        reason: Some("Vacation".into()),
    }
}

#[tokio::test]
async fn overlapping_delegations_are_rejected_and_disjoint_ones_accepted() {
    let h = harness();
    let first = h.delegations.create(WS, ALICE, window(1, 5)).await.unwrap();

    let err = h.delegations.create(WS, ALICE, window(3, 8)).await.unwrap_err();
    assert_matches!(
        assert_core(&err),
        CoreError::BadRequest(msg) if msg.contains("overlaps") && msg.contains(&first.id.to_string())
    );

    let err = h.delegations.create(WS, ALICE, window(0, 10)).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(_));

    let next = h.delegations.create(WS, ALICE, window(6, 9)).await.unwrap();
    assert!(next.is_active);

    // Another delegator is unaffected.
    h.delegations.create(WS, BOB, window(1, 5)).await.unwrap();
}

#[tokio::test]
async fn delegation_validation_rules() {
    let h = harness();

    let err = h.delegations.create(WS, ALICE, window(5, 1)).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(msg) if msg.contains("End date"));

    let mut to_self = window(1, 2);
    to_self.to_user_id = ALICE;
    let err = h.delegations.create(WS, ALICE, to_self).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(_));

    let mut outsider = window(1, 2);
    outsider.to_user_id = 999;
    let err = h.delegations.create(WS, ALICE, outsider).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { entity: "User", id: 999 });
}

#[tokio::test]
async fn only_the_delegator_may_update_or_cancel() {
    let h = harness();
    let delegation = h.delegations.create(WS, ALICE, window(1, 5)).await.unwrap();

    let err = h.delegations.cancel(WS, delegation.id, VICTOR).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Forbidden(_));
    let err = h
        .delegations
        .update(WS, delegation.id, BOB, DelegationPatch::default())
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Forbidden(_));

    let cancelled = h.delegations.cancel(WS, delegation.id, ALICE).await.unwrap();
    assert!(!cancelled.is_active);

    // A cancelled window no longer blocks a new one.
    h.delegations.create(WS, ALICE, window(2, 4)).await.unwrap();
}

#[tokio::test]
async fn update_validates_merged_window_and_rechecks_overlap() {
    let h = harness();
    let early = h.delegations.create(WS, ALICE, window(1, 3)).await.unwrap();
    h.delegations.create(WS, ALICE, window(5, 8)).await.unwrap();

    // Only the end date supplied, but it lands before the stored start.
    let err = h
        .delegations
        .update(
            WS,
            early.id,
            ALICE,
            DelegationPatch {
                end_date: Some(early.start_date - ChronoDuration::hours(1)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(_));

    let err = h
        .delegations
        .update(
            WS,
            early.id,
            ALICE,
            DelegationPatch {
                end_date: Some(Utc::now() + ChronoDuration::days(6)),
                ..Default::default()
            },
        )
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::BadRequest(msg) if msg.contains("overlaps"));

    let updated = h
        .delegations
        .update(
            WS,
            early.id,
            ALICE,
            DelegationPatch {
                reason: Some("Conference".into()),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert_eq!(updated.reason.as_deref(), Some("Conference"));
}

#[tokio::test]
async fn delegate_may_approve_but_third_party_may_not() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Single", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let approval = h.approval_for(instance.id, ALICE).await;

    // The delegation starts after the approval was created.
    h.delegations.create(WS, ALICE, window(-1, 2)).await.unwrap();

    let err = h
        .decide(approval.id, WALTER, ApprovalDecision::Approve)
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Forbidden(_));

    let state = h.decide(approval.id, VICTOR, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);

    let recorded = h.approvals(instance.id).await.remove(0);
    assert_eq!(recorded.responded_by, Some(VICTOR));
    assert_eq!(recorded.approver_id, ALICE);
}

#[tokio::test]
async fn approvals_are_assigned_to_active_delegates_at_creation() {
    let h = harness();
    h.delegations.create(WS, ALICE, window(-1, 2)).await.unwrap();
    let wf = h
        .create(json!({"name": "Delegated", "steps": [approval_step(0, "ALL", &[ALICE, BOB])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let approvals = h.approvals(instance.id).await;
    let delegated = approvals.iter().find(|a| a.approver_id == VICTOR).unwrap();
    assert_eq!(delegated.delegated_from, Some(ALICE));
    assert!(approvals.iter().all(|a| a.approver_id != ALICE));

    let inbox = h
        .engine
        .list_pending_approvals(WS, VICTOR, &ApprovalQuery::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(inbox.items[0].workflow_name, "Delegated");
}

#[tokio::test]
async fn pending_list_includes_approvals_of_users_delegating_to_me() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Inbox", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    h.start(wf.id, json!({})).await;
    h.delegations.create(WS, ALICE, window(-1, 2)).await.unwrap();

    let inbox = h
        .engine
        .list_pending_approvals(WS, VICTOR, &ApprovalQuery::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(inbox.items[0].approval.approver_id, ALICE);

    let walter = h
        .engine
        .list_pending_approvals(WS, WALTER, &ApprovalQuery::default())
        .await
        .unwrap();
    assert_eq!(walter.total, 0);
}

#[tokio::test]
async fn duplicate_effective_approvers_are_collapsed() {
    let h = harness();
    h.delegations.create(WS, ALICE, window(-1, 2)).await.unwrap();
    let wf = h
        .create(json!({"name": "Dupes", "steps": [approval_step(0, "ALL", &[ALICE, VICTOR])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    assert_eq!(h.approvals(instance.id).await.len(), 1);
}

// ---------------------------------------------------------------------------
// Conditions
// ---------------------------------------------------------------------------

#[tokio::test]
async fn failed_conditions_skip_optional_step() {
    let h = harness();
    h.entities
        .insert("post", "post-1", json!({"content": {"status": "published"}}));
    let wf = h
        .create(json!({
            "name": "Drafts only",
            "steps": [{
                "name": "Review draft",
                "type": "APPROVAL",
                "order": 0,
                "isRequired": false,
                "config": {"approvers": [ALICE]},
                "conditions": [{"field": "content.status", "operator": "EQUALS", "value": "draft"}]
            }]
        }))
        .await;

    let instance = h.start(wf.id, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    assert!(h.approvals(instance.id).await.is_empty());
    assert!(h.audit_actions(instance.id).contains(&"STEP_SKIPPED".to_string()));
}

#[tokio::test]
async fn required_step_blocks_under_block_policy() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Strict gate",
            "config": {"requiredStepPolicy": "BLOCK"},
            "steps": [{
                "name": "Big spend",
                "type": "CONDITION",
                "order": 0,
                "conditions": [{"field": "amount", "operator": "GREATER_THAN", "value": 1000}]
            }, notification_step(1)]
        }))
        .await;

    let instance = h.start(wf.id, json!({"amount": 10})).await;

    assert_eq!(instance.status, InstanceStatus::Rejected);
    assert!(h.notifier.sent().is_empty());
    let trail = h.audit_actions(instance.id);
    assert_eq!(&trail[trail.len() - 2..], ["STEP_BLOCKED", "WORKFLOW_REJECTED"]);
}

#[tokio::test]
async fn required_step_is_skipped_under_default_policy() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Lenient gate",
            "steps": [{
                "name": "Big spend",
                "type": "APPROVAL",
                "order": 0,
                "config": {"approvers": [ALICE]},
                "conditions": [{"field": "amount", "operator": "GREATER_THAN", "value": 1000}]
            }]
        }))
        .await;
    let instance = h.start(wf.id, json!({"amount": 10})).await;
    assert_eq!(instance.status, InstanceStatus::Completed);
}

struct SlowAccessor;

#[async_trait]
impl EntityAccessor for SlowAccessor {
    async fn fetch(&self, _: DbId, _: &str, _: &str) -> Result<Value, CollaboratorError> {
        tokio::time::sleep(Duration::from_secs(60)).await;
        Ok(json!({"status": "draft"}))
    }
}

#[tokio::test(start_paused = true)]
async fn entity_fetch_timeout_falls_back_to_metadata() {
    let h = harness();
    let engine = h
        .engine
        .clone()
        .with_entity_accessor(Arc::new(SlowAccessor))
        .with_config(EngineConfig {
            entity_fetch_timeout: Duration::from_millis(50),
            ..EngineConfig::default()
        });
    let wf = h
        .create(json!({
            "name": "Timeout",
            "steps": [{
                "name": "Needs draft",
                "type": "APPROVAL",
                "order": 0,
                "config": {"approvers": [ALICE]},
                "conditions": [{"field": "status", "operator": "EQUALS", "value": "draft"}]
            }]
        }))
        .await;

    // Entity never arrives; metadata supplies the field instead.
    let instance = engine
        .start_workflow(WS, ADMIN, start_input(wf.id, json!({"status": "draft"})))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(h.approvals(instance.id).await.len(), 1);
}

// ---------------------------------------------------------------------------
// Side effects
// ---------------------------------------------------------------------------

#[tokio::test]
async fn best_effort_side_effect_failures_still_advance() {
    let h = harness_with(RecordingNotifier::failing(), RecordingActionExecutor::failing());
    let wf = h
        .create(json!({"name": "Flaky", "steps": [notification_step(0), action_step(1)]}))
        .await;

    let instance = h.start(wf.id, json!({})).await;

    assert_eq!(instance.status, InstanceStatus::Completed);
    let trail = h.store.audit_trail(instance.id);
    let sent = trail.iter().find(|e| e.action == "NOTIFICATIONS_SENT").unwrap();
    assert_eq!(sent.details["delivered"], json!(false));
    let acted = trail.iter().find(|e| e.action == "ACTION_EXECUTED").unwrap();
    assert_eq!(acted.details["succeeded"], json!(false));
}

#[tokio::test]
async fn strict_side_effect_failure_rejects_instance() {
    let h = harness_with(RecordingNotifier::failing(), RecordingActionExecutor::new());
    let wf = h
        .create(json!({
            "name": "Strict",
            "config": {"sideEffectPolicy": "STRICT"},
            "steps": [notification_step(0), action_step(1)]
        }))
        .await;

    let err = h
        .engine
        .start_workflow(WS, ADMIN, start_input(wf.id, json!({})))
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::SideEffect { .. });
    assert!(h.actions.executed().is_empty());

    let page = h
        .engine
        .list_instances(WS, &Default::default())
        .await
        .unwrap();
    let failed = &page.items[0];
    assert_eq!(failed.status, InstanceStatus::Rejected);
    assert_eq!(failed.current_step_id, None);
    assert!(failed.completed_at.is_some());
    let trail = h.audit_actions(failed.id);
    assert_eq!(&trail[trail.len() - 2..], ["STEP_FAILED", "WORKFLOW_REJECTED"]);

    // Nothing is left running, so the definition can change again.
    let replace: WorkflowPatch =
        serde_json::from_value(json!({"steps": [notification_step(0)]})).unwrap();
    h.engine.update_workflow(WS, wf.id, replace).await.unwrap();
    h.engine.delete_workflow(WS, wf.id).await.unwrap();
}

#[tokio::test]
async fn strict_failure_after_approval_rejects_instance() {
    let h = harness_with(RecordingNotifier::new(), RecordingActionExecutor::failing());
    let wf = h
        .create(json!({
            "name": "Strict after review",
            "config": {"sideEffectPolicy": "STRICT"},
            "steps": [approval_step(0, "ANY", &[ALICE]), action_step(1)]
        }))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let approval = h.approval_for(instance.id, ALICE).await;

    let err = h
        .decide(approval.id, ALICE, ApprovalDecision::Approve)
        .await
        .unwrap_err();
    assert_matches!(err, EngineError::SideEffect { .. });

    let detail = h.engine.get_instance(WS, instance.id).await.unwrap();
    assert_eq!(detail.instance.status, InstanceStatus::Rejected);
    assert_eq!(detail.approvals[0].status, ApprovalStatus::Approved);
}

// ---------------------------------------------------------------------------
// Double submission and concurrency
// ---------------------------------------------------------------------------

#[tokio::test]
async fn replaying_a_resolved_approval_is_a_conflict() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Once", "steps": [approval_step(0, "ANY", &[ALICE])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let approval = h.approval_for(instance.id, ALICE).await;

    let done = h.decide(approval.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    let trail_before = h.audit_actions(instance.id);

    let err = h
        .decide(approval.id, ALICE, ApprovalDecision::Approve)
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Conflict(_));

    let detail = h.engine.get_instance(WS, instance.id).await.unwrap();
    assert_eq!(detail.instance.completed_at, done.completed_at);
    assert_eq!(h.audit_actions(instance.id), trail_before);
}

#[tokio::test]
async fn closed_approvals_cannot_be_answered_after_step_resolves() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Any", "steps": [approval_step(0, "ANY", &[ALICE, BOB])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let bob = h.approval_for(instance.id, BOB).await;
    let alice = h.approval_for(instance.id, ALICE).await;

    h.decide(alice.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    let err = h.decide(bob.id, BOB, ApprovalDecision::Reject).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Conflict(_));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_final_approvals_advance_exactly_once() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Race",
            "steps": [approval_step(0, "ANY", &[ALICE, BOB, CAROL]), notification_step(1)]
        }))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let approvals = h.approvals(instance.id).await;

    let tasks: Vec<_> = approvals
        .into_iter()
        .map(|approval| {
            let engine = h.engine.clone();
            tokio::spawn(async move {
                engine
                    .approve(WS, approval.id, approval.approver_id, decision(ApprovalDecision::Approve))
                    .await
            })
        })
        .collect();

    let mut succeeded = 0;
    for task in tasks {
        if task.await.unwrap().is_ok() {
            succeeded += 1;
        }
    }

    assert_eq!(succeeded, 1);
    assert_eq!(h.notifier.sent().len(), 1);
    let trail = h.audit_actions(instance.id);
    assert_eq!(trail.iter().filter(|a| *a == "WORKFLOW_COMPLETED").count(), 1);
}

// ---------------------------------------------------------------------------
// Bulk, definitions, analytics
// ---------------------------------------------------------------------------

#[tokio::test]
async fn bulk_approve_isolates_failures() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Bulk", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    let first = h.start(wf.id, json!({})).await;
    let second = h.start(wf.id, json!({})).await;
    let a1 = h.approval_for(first.id, ALICE).await;
    let a2 = h.approval_for(second.id, ALICE).await;

    let result = h
        .engine
        .bulk_approve(
            WS,
            ALICE,
            BulkApproveInput {
                approval_ids: vec![a1.id, 424242, a2.id],
                action: ApprovalDecision::Approve,
                comments: Some("Looks good".into()),
            },
        )
        .await
        .unwrap();

    assert_eq!(result.successful, 2);
    assert_eq!(result.failed, 1);
    assert_eq!(result.total, 3);
    assert_eq!(result.failures[0].approval_id, 424242);
}

#[tokio::test]
async fn steps_cannot_be_replaced_or_deleted_while_instances_run() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Live", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;

    let replace: WorkflowPatch =
        serde_json::from_value(json!({"steps": [notification_step(0)]})).unwrap();
    let err = h
        .engine
        .update_workflow(WS, wf.id, replace.clone())
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Conflict(_));
    let err = h.engine.delete_workflow(WS, wf.id).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::Conflict(_));

    // Scalar patches are always allowed.
    let renamed: WorkflowPatch = serde_json::from_value(json!({"name": "Renamed"})).unwrap();
    let updated = h.engine.update_workflow(WS, wf.id, renamed).await.unwrap();
    assert_eq!(updated.name, "Renamed");
    assert_eq!(updated.steps.len(), 1);

    let approval = h.approval_for(instance.id, ALICE).await;
    h.decide(approval.id, ALICE, ApprovalDecision::Approve).await.unwrap();

    let replaced = h.engine.update_workflow(WS, wf.id, replace).await.unwrap();
    assert_eq!(replaced.steps.len(), 1);
    assert_ne!(replaced.steps[0].id, wf.steps[0].id);

    h.engine.delete_workflow(WS, wf.id).await.unwrap();
    let err = h.engine.get_workflow(WS, wf.id).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { .. });

    // History survives the delete.
    let detail = h.engine.get_instance(WS, instance.id).await.unwrap();
    assert_eq!(detail.workflow.id, wf.id);
}

#[tokio::test]
async fn other_workspaces_cannot_see_records() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Private", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    let instance = h.start(wf.id, json!({})).await;
    let approval = h.approval_for(instance.id, ALICE).await;

    let err = h.engine.get_workflow(2, wf.id).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { .. });
    let err = h.engine.get_instance(2, instance.id).await.unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { .. });
    let err = h
        .engine
        .approve(2, approval.id, ALICE, decision(ApprovalDecision::Approve))
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { entity: "Approval", .. });
}

#[tokio::test]
async fn analytics_count_outcomes_per_workflow() {
    let h = harness();
    let wf = h
        .create(json!({"name": "Stats", "steps": [approval_step(0, "ALL", &[ALICE])]}))
        .await;
    let auto = h
        .create(json!({"name": "Auto", "steps": [notification_step(0)]}))
        .await;

    let approved = h.start(wf.id, json!({})).await;
    let rejected = h.start(wf.id, json!({})).await;
    h.start(wf.id, json!({})).await;
    h.start(wf.id, json!({})).await;
    h.start(auto.id, json!({})).await;

    let a = h.approval_for(approved.id, ALICE).await;
    h.decide(a.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    let r = h.approval_for(rejected.id, ALICE).await;
    h.decide(r.id, ALICE, ApprovalDecision::Reject).await.unwrap();

    let scoped = h
        .engine
        .analytics(WS, AnalyticsScope { workflow_id: Some(wf.id) })
        .await
        .unwrap();
    assert_eq!(scoped.total_instances, 4);
    assert_eq!(scoped.completed_instances, 1);
    assert_eq!(scoped.rejected_instances, 1);
    assert_eq!(scoped.in_progress_instances, 2);
    assert_eq!(scoped.completion_rate, 25.0);
    assert_eq!(scoped.rejection_rate, 25.0);

    let workspace = h.engine.analytics(WS, AnalyticsScope::default()).await.unwrap();
    assert_eq!(workspace.total_instances, 5);
    assert_eq!(workspace.completed_instances, 2);

    let err = h
        .engine
        .analytics(WS, AnalyticsScope { workflow_id: Some(9999) })
        .await
        .unwrap_err();
    assert_matches!(assert_core(&err), CoreError::NotFound { .. });
}

// ---------------------------------------------------------------------------
// End to end
// ---------------------------------------------------------------------------

#[tokio::test]
async fn amount_gate_then_dual_approval_then_notification() {
    let h = harness();
    let wf = h
        .create(json!({
            "name": "Spend approval",
            "steps": [
                {
                    "name": "Large amounts only",
                    "type": "CONDITION",
                    "order": 0,
                    "conditions": [{"field": "amount", "operator": "GREATER_THAN", "value": 100}]
                },
                approval_step(1, "ALL", &[ALICE, BOB]),
                notification_step(2),
            ]
        }))
        .await;

    let instance = h.start(wf.id, json!({"amount": 150})).await;
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(instance.current_step_id, Some(wf.steps[1].id));

    let approvals = h.approvals(instance.id).await;
    assert_eq!(approvals.len(), 2);
    assert!(approvals.iter().all(|a| a.status == ApprovalStatus::Pending));

    let a = h.approval_for(instance.id, ALICE).await;
    let state = h.decide(a.id, ALICE, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::InProgress);
    assert!(h.notifier.sent().is_empty());

    let b = h.approval_for(instance.id, BOB).await;
    let state = h.decide(b.id, BOB, ApprovalDecision::Approve).await.unwrap();
    assert_eq!(state.status, InstanceStatus::Completed);
    assert_eq!(h.notifier.sent().len(), 1);

    let detail = h.engine.get_instance(WS, instance.id).await.unwrap();
    assert_eq!(detail.audit_log[0].action, "WORKFLOW_COMPLETED");
    assert_eq!(
        h.audit_actions(instance.id),
        vec![
            "WORKFLOW_STARTED",
            "APPROVALS_CREATED",
            "APPROVAL_APPROVED",
            "APPROVAL_APPROVED",
            "NOTIFICATIONS_SENT",
            "WORKFLOW_COMPLETED"
        ]
    );
}
