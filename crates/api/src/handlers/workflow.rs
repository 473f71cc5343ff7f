//! Handlers for workflow definitions and analytics.
//!
//! Creating, updating and deleting definitions requires the `admin` role;
//! reads are open to every workspace member.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use cadence_core::analytics::AnalyticsScope;
use cadence_core::types::DbId;
use cadence_core::workflow::{NewWorkflow, WorkflowPatch};

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::middleware::rbac::RequireAdmin;
use crate::query::WorkflowListParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/workflows
pub async fn create_workflow(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Json(input): Json<NewWorkflow>,
) -> AppResult<impl IntoResponse> {
    let workflow = state
        .engine
        .create_workflow(admin.workspace_id, admin.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: workflow })))
}

/// GET /api/v1/workflows
///
/// Filters by `type`, `is_active` and a case-insensitive `search` over
/// name and description.
pub async fn list_workflows(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<WorkflowListParams>,
) -> AppResult<impl IntoResponse> {
    let (filter, page) = params.into_parts();
    let workflows = state
        .engine
        .list_workflows(auth.workspace_id, &filter, page)
        .await?;
    Ok(Json(DataResponse { data: workflows }))
}

/// GET /api/v1/workflows/{id}
pub async fn get_workflow(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let workflow = state.engine.get_workflow(auth.workspace_id, id).await?;
    Ok(Json(DataResponse { data: workflow }))
}

/// PUT /api/v1/workflows/{id}
///
/// A `steps` list replaces every step and is refused while instances of
/// the workflow are in progress.
pub async fn update_workflow(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(patch): Json<WorkflowPatch>,
) -> AppResult<impl IntoResponse> {
    let workflow = state
        .engine
        .update_workflow(admin.workspace_id, id, patch)
        .await?;
    Ok(Json(DataResponse { data: workflow }))
}

/// DELETE /api/v1/workflows/{id}
pub async fn delete_workflow(
    RequireAdmin(admin): RequireAdmin,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<StatusCode> {
    state.engine.delete_workflow(admin.workspace_id, id).await?;
    tracing::info!(workflow_id = id, user_id = admin.user_id, "Workflow deleted via API");
    Ok(StatusCode::NO_CONTENT)
}

/// GET /api/v1/workflows/analytics
pub async fn workspace_analytics(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(scope): Query<AnalyticsScope>,
) -> AppResult<impl IntoResponse> {
    let analytics = state.engine.analytics(auth.workspace_id, scope).await?;
    Ok(Json(DataResponse { data: analytics }))
}

/// GET /api/v1/workflows/{id}/analytics
pub async fn workflow_analytics(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let scope = AnalyticsScope {
        workflow_id: Some(id),
    };
    let analytics = state.engine.analytics(auth.workspace_id, scope).await?;
    Ok(Json(DataResponse { data: analytics }))
}
