//! Route definitions for workflows, instances, approvals and delegations.
//!
//! Static segments (`instances`, `approvals`, `delegations`, `analytics`)
//! take precedence over the `{id}` capture.

use axum::routing::{get, post, put};
use axum::Router;

use crate::handlers::{approval, delegation, instance, workflow};
use crate::state::AppState;

/// Routes mounted at `/workflows`.
pub fn router() -> Router<AppState> {
    Router::new()
        .route(
            "/",
            get(workflow::list_workflows).post(workflow::create_workflow),
        )
        .route("/analytics", get(workflow::workspace_analytics))
        .route(
            "/{id}",
            get(workflow::get_workflow)
                .put(workflow::update_workflow)
                .delete(workflow::delete_workflow),
        )
        .route("/{id}/analytics", get(workflow::workflow_analytics))
        .merge(instance_router())
        .merge(approval_router())
        .merge(delegation_router())
}

/// ```text
/// GET    /instances          list_instances
/// POST   /instances          start_workflow
/// GET    /instances/{id}     get_instance
/// ```
fn instance_router() -> Router<AppState> {
    Router::new()
        .route(
            "/instances",
            get(instance::list_instances).post(instance::start_workflow),
        )
        .route("/instances/{id}", get(instance::get_instance))
}

/// ```text
/// GET    /approvals/pending  list_pending
/// POST   /approvals/bulk     bulk_respond
/// PUT    /approvals/{id}     respond
/// ```
fn approval_router() -> Router<AppState> {
    Router::new()
        .route("/approvals/pending", get(approval::list_pending))
        .route("/approvals/bulk", post(approval::bulk_respond))
        .route("/approvals/{id}", put(approval::respond))
}

/// ```text
/// GET    /delegations          list_delegations
/// POST   /delegations          create_delegation
/// GET    /delegations/active   list_active_delegations
/// GET    /delegations/{id}     get_delegation
/// PUT    /delegations/{id}     update_delegation
/// DELETE /delegations/{id}     cancel_delegation
/// ```
fn delegation_router() -> Router<AppState> {
    Router::new()
        .route(
            "/delegations",
            get(delegation::list_delegations).post(delegation::create_delegation),
        )
        .route("/delegations/active", get(delegation::list_active_delegations))
        .route(
            "/delegations/{id}",
            get(delegation::get_delegation)
                .put(delegation::update_delegation)
                .delete(delegation::cancel_delegation),
        )
}
