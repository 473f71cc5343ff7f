//! The workflow engine running on [`PgStore`].
//!
//! Exercises the paths where PostgreSQL does the enforcing: the delegation
//! exclusion constraint, soft-deleted steps surviving for history, the
//! version-guarded instance transition and the aggregate queries.

use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::{Duration, Utc};
use serde_json::{json, Value};
use sqlx::PgPool;

use cadence_core::aggregation::{ApprovalDecision, ApprovalStatus};
use cadence_core::analytics::AnalyticsScope;
use cadence_core::approval::{ApprovalInput, ApprovalQuery};
use cadence_core::delegation::NewDelegation;
use cadence_core::engine::{
    DelegationService, DelegationStore, EngineStore, EntityAccessor, WorkflowEngine,
    WorkflowStore,
};
use cadence_core::error::CoreError;
use cadence_core::instance::{InstanceStatus, InstanceTransition, StartWorkflow};
use cadence_core::pagination::PageRequest;
use cadence_core::types::DbId;
use cadence_core::workflow::{NewWorkflow, WorkflowFilter, WorkflowPatch};
use cadence_db::repositories::{UserRepo, WorkspaceRepo};
use cadence_db::{PgEntityAccessor, PgStore};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

struct Fixture {
    pool: PgPool,
    store: Arc<PgStore>,
    engine: WorkflowEngine,
    delegations: DelegationService,
    workspace: DbId,
    admin: DbId,
    alice: DbId,
    bob: DbId,
}

async fn fixture(pool: PgPool) -> Fixture {
    let workspace = WorkspaceRepo::create(&pool, "Acme").await.unwrap().id;
    let mut ids = Vec::new();
    for (email, name, role) in [
        ("admin@acme.test", "Admin", "admin"),
        ("alice@acme.test", "Alice", "member"),
        ("bob@acme.test", "Bob", "member"),
    ] {
        ids.push(
            UserRepo::create(&pool, workspace, email, name, role)
                .await
                .unwrap()
                .id,
        );
    }

    let store = Arc::new(PgStore::new(pool.clone()));
    let dyn_store: Arc<dyn EngineStore> = store.clone();
    Fixture {
        engine: WorkflowEngine::new(dyn_store.clone()),
        delegations: DelegationService::new(dyn_store),
        pool,
        store,
        workspace,
        admin: ids[0],
        alice: ids[1],
        bob: ids[2],
    }
}

fn definition(body: Value) -> NewWorkflow {
    serde_json::from_value(body).unwrap()
}

fn two_step_review(approvers: &[DbId]) -> NewWorkflow {
    definition(json!({
        "name": "Post review",
        "description": "Editorial sign-off",
        "config": {"entityTypes": ["post"], "deadlineHours": 48},
        "steps": [
            {
                "name": "Editors",
                "type": "APPROVAL",
                "order": 0,
                "config": {"approvers": approvers, "approvalType": "ALL"},
                "conditions": [
                    {"field": "amount", "operator": "GREATER_THAN", "value": 100}
                ]
            },
            {
                "name": "Announce",
                "type": "NOTIFICATION",
                "order": 1,
                "config": {"recipients": approvers}
            }
        ]
    }))
}

fn start(workflow_id: DbId, metadata: Value) -> StartWorkflow {
    StartWorkflow {
        workflow_id,
        entity_type: "post".into(),
        entity_id: "42".into(),
        metadata: Some(metadata),
    }
}

fn approve() -> ApprovalInput {
    ApprovalInput {
        action: ApprovalDecision::Approve,
        comments: Some("ok".into()),
        metadata: None,
    }
}

fn delegation(to: DbId, start_days: i64, end_days: i64) -> NewDelegation {
    let now = Utc::now();
    NewDelegation {
        to_user_id: to,
        start_date: now + Duration::days(start_days),
        end_date: now + Duration::days(end_days),
        reason: Some("leave".into()),
    }
}

// ---------------------------------------------------------------------------
// Definitions
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_workflow_round_trips_with_steps_and_conditions(pool: PgPool) {
    let f = fixture(pool).await;
    let created = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice, f.bob]))
        .await
        .unwrap();

    let loaded = f.engine.get_workflow(f.workspace, created.id).await.unwrap();
    assert_eq!(loaded, created);
    assert_eq!(loaded.steps.len(), 2);
    assert_eq!(loaded.steps[0].conditions.len(), 1);
    assert_eq!(loaded.config.extra.get("deadlineHours"), Some(&json!(48)));
    assert_eq!(loaded.created_by, f.admin);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_workflow_list_filters_and_paginates(pool: PgPool) {
    let f = fixture(pool).await;
    for name in ["Alpha review", "Beta review", "Gamma publish"] {
        let mut input = two_step_review(&[f.alice]);
        input.name = name.into();
        f.engine
            .create_workflow(f.workspace, f.admin, input)
            .await
            .unwrap();
    }

    let filter = WorkflowFilter {
        search: Some("REVIEW".into()),
        ..Default::default()
    };
    let page = f
        .engine
        .list_workflows(f.workspace, &filter, PageRequest::new(Some(1), Some(0)))
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items.len(), 1);
    assert_eq!(page.limit, 1);
    assert_eq!(page.items[0].steps.len(), 2);

    let wildcard = WorkflowFilter {
        search: Some("%".into()),
        ..Default::default()
    };
    let none = f
        .engine
        .list_workflows(f.workspace, &wildcard, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(none.total, 0);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_replaced_steps_stay_readable_for_history(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();
    let old_step = wf.steps[0].id;

    let patch: WorkflowPatch = serde_json::from_value(json!({
        "steps": [{"name": "Only", "type": "NOTIFICATION", "order": 0, "config": {"recipients": []}}]
    }))
    .unwrap();
    let updated = f
        .engine
        .update_workflow(f.workspace, wf.id, patch)
        .await
        .unwrap();
    assert_eq!(updated.steps.len(), 1);
    assert_ne!(updated.steps[0].id, old_step);

    let (retired,): (bool,) = sqlx::query_as(
        "SELECT deleted_at IS NOT NULL FROM workflow_steps WHERE id = $1",
    )
    .bind(old_step)
    .fetch_one(&f.pool)
    .await
    .unwrap();
    assert!(retired);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_deleted_workflow_is_hidden_but_kept(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();

    f.engine.delete_workflow(f.workspace, wf.id).await.unwrap();

    let err = f.engine.get_workflow(f.workspace, wf.id).await.unwrap_err();
    assert_matches!(err.as_core(), Some(CoreError::NotFound { .. }));
    let kept = f.store.find_workflow(f.workspace, wf.id, true).await.unwrap();
    assert!(kept.is_some());
}

// ---------------------------------------------------------------------------
// Instances and approvals
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_all_policy_completes_after_every_approver(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice, f.bob]))
        .await
        .unwrap();

    let instance = f
        .engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 150})))
        .await
        .unwrap();
    assert_eq!(instance.status, InstanceStatus::InProgress);
    assert_eq!(instance.current_step_id, Some(wf.steps[0].id));

    let inbox = f
        .engine
        .list_pending_approvals(f.workspace, f.alice, &ApprovalQuery::default())
        .await
        .unwrap();
    assert_eq!(inbox.total, 1);
    assert_eq!(inbox.items[0].workflow_name, "Post review");
    assert_eq!(inbox.items[0].step_name, "Editors");

    let detail = f.engine.get_instance(f.workspace, instance.id).await.unwrap();
    for approval in &detail.approvals {
        f.engine
            .approve(f.workspace, approval.id, approval.approver_id, approve())
            .await
            .unwrap();
    }

    let detail = f.engine.get_instance(f.workspace, instance.id).await.unwrap();
    assert_eq!(detail.instance.status, InstanceStatus::Completed);
    assert!(detail
        .approvals
        .iter()
        .all(|a| a.status == ApprovalStatus::Approved));
    assert_eq!(
        detail.audit_log.first().map(|e| e.action.as_str()),
        Some("WORKFLOW_COMPLETED")
    );
    assert_eq!(
        detail.audit_log.last().map(|e| e.action.as_str()),
        Some("WORKFLOW_STARTED")
    );
}

#[sqlx::test(migrations = "./migrations")]
async fn test_condition_skip_completes_without_approvals(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();

    let instance = f
        .engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 10})))
        .await
        .unwrap();

    assert_eq!(instance.status, InstanceStatus::Completed);
    let detail = f.engine.get_instance(f.workspace, instance.id).await.unwrap();
    assert!(detail.approvals.is_empty());
}

#[sqlx::test(migrations = "./migrations")]
async fn test_second_decision_on_same_approval_conflicts(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice, f.bob]))
        .await
        .unwrap();
    let instance = f
        .engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 500})))
        .await
        .unwrap();
    let detail = f.engine.get_instance(f.workspace, instance.id).await.unwrap();
    let alice_approval = detail
        .approvals
        .iter()
        .find(|a| a.approver_id == f.alice)
        .unwrap();

    f.engine
        .approve(f.workspace, alice_approval.id, f.alice, approve())
        .await
        .unwrap();
    let err = f
        .engine
        .approve(f.workspace, alice_approval.id, f.alice, approve())
        .await
        .unwrap_err();
    assert_matches!(err.as_core(), Some(CoreError::Conflict(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_transition_requires_current_version(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();
    let instance = f
        .engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 500})))
        .await
        .unwrap();

    let stale = instance.version - 1;
    let missed = f
        .store
        .transition_instance(instance.id, stale, InstanceTransition::Complete { at: Utc::now() })
        .await
        .unwrap();
    assert!(missed.is_none());

    let applied = f
        .store
        .transition_instance(
            instance.id,
            instance.version,
            InstanceTransition::Reject { at: Utc::now() },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(applied.status, InstanceStatus::Rejected);
    assert_eq!(applied.version, instance.version + 1);
    assert_eq!(applied.current_step_id, None);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_analytics_counts_by_status(pool: PgPool) {
    let f = fixture(pool).await;
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();
    f.engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 1})))
        .await
        .unwrap();
    f.engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 1000})))
        .await
        .unwrap();

    let stats = f
        .engine
        .analytics(
            f.workspace,
            AnalyticsScope {
                workflow_id: Some(wf.id),
            },
        )
        .await
        .unwrap();
    assert_eq!(stats.total_instances, 2);
    assert_eq!(stats.completed_instances, 1);
    assert_eq!(stats.in_progress_instances, 1);
    assert_eq!(stats.completion_rate, 50.0);
}

// ---------------------------------------------------------------------------
// Delegations
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_delegate_receives_new_approvals(pool: PgPool) {
    let f = fixture(pool).await;
    f.delegations
        .create(f.workspace, f.alice, delegation(f.bob, -1, 5))
        .await
        .unwrap();
    let wf = f
        .engine
        .create_workflow(f.workspace, f.admin, two_step_review(&[f.alice]))
        .await
        .unwrap();

    let instance = f
        .engine
        .start_workflow(f.workspace, f.admin, start(wf.id, json!({"amount": 500})))
        .await
        .unwrap();

    let detail = f.engine.get_instance(f.workspace, instance.id).await.unwrap();
    assert_eq!(detail.approvals.len(), 1);
    assert_eq!(detail.approvals[0].approver_id, f.bob);
    assert_eq!(detail.approvals[0].delegated_from, Some(f.alice));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_overlapping_delegation_is_rejected_by_constraint(pool: PgPool) {
    let f = fixture(pool).await;
    f.delegations
        .create(f.workspace, f.alice, delegation(f.bob, 1, 10))
        .await
        .unwrap();

    // Bypass the service check so the exclusion constraint decides.
    let now = Utc::now();
    let err = f
        .store
        .insert_delegation(
            f.workspace,
            f.alice,
            f.admin,
            now + Duration::days(9),
            now + Duration::days(12),
            None,
        )
        .await
        .unwrap_err();
    assert_matches!(err.as_core(), Some(CoreError::BadRequest(msg)) if msg.contains("overlaps"));

    let err = f
        .delegations
        .create(f.workspace, f.alice, delegation(f.admin, 5, 15))
        .await
        .unwrap_err();
    assert_matches!(err.as_core(), Some(CoreError::BadRequest(_)));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_cancelled_delegation_frees_the_window(pool: PgPool) {
    let f = fixture(pool).await;
    let first = f
        .delegations
        .create(f.workspace, f.alice, delegation(f.bob, 1, 10))
        .await
        .unwrap();
    f.delegations
        .cancel(f.workspace, first.id, f.alice)
        .await
        .unwrap();

    let second = f
        .delegations
        .create(f.workspace, f.alice, delegation(f.admin, 2, 8))
        .await
        .unwrap();
    assert!(second.is_active);

    let page = f
        .delegations
        .list(f.workspace, f.alice, PageRequest::default())
        .await
        .unwrap();
    assert_eq!(page.total, 2);
    assert_eq!(page.items[0].id, second.id);
}

#[sqlx::test(migrations = "./migrations")]
async fn test_delegation_range_check_maps_to_bad_request(pool: PgPool) {
    let f = fixture(pool).await;
    let now = Utc::now();
    let err = f
        .store
        .insert_delegation(f.workspace, f.alice, f.bob, now, now, None)
        .await
        .unwrap_err();
    assert_matches!(err.as_core(), Some(CoreError::BadRequest(msg)) if msg.contains("End date"));
}

// ---------------------------------------------------------------------------
// Entity snapshots
// ---------------------------------------------------------------------------

#[sqlx::test(migrations = "./migrations")]
async fn test_entity_accessor_reads_registered_tables(pool: PgPool) {
    let f = fixture(pool).await;
    sqlx::query(
        "CREATE TABLE posts (id BIGINT PRIMARY KEY, workspace_id BIGINT NOT NULL, status TEXT NOT NULL)",
    )
    .execute(&f.pool)
    .await
    .unwrap();
    sqlx::query("INSERT INTO posts (id, workspace_id, status) VALUES (42, $1, 'draft')")
        .bind(f.workspace)
        .execute(&f.pool)
        .await
        .unwrap();

    let accessor = PgEntityAccessor::from_spec(f.pool.clone(), "post:posts").unwrap();

    let snapshot = accessor.fetch(f.workspace, "post", "42").await.unwrap();
    assert_eq!(snapshot["status"], "draft");

    let other_tenant = accessor.fetch(f.workspace + 1, "post", "42").await.unwrap();
    assert_eq!(other_tenant, json!({}));

    let unknown = accessor.fetch(f.workspace, "campaign", "42").await.unwrap();
    assert_eq!(unknown, json!({}));
}

#[sqlx::test(migrations = "./migrations")]
async fn test_membership_is_scoped_to_workspace(pool: PgPool) {
    let f = fixture(pool).await;
    let other = WorkspaceRepo::create(&f.pool, "Other").await.unwrap().id;
    assert!(f.store.user_in_workspace(f.workspace, f.alice).await.unwrap());
    assert!(!f.store.user_in_workspace(other, f.alice).await.unwrap());
}
