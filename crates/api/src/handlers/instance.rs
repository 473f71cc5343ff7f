//! Handlers for starting and inspecting workflow instances.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use cadence_core::instance::{InstanceQuery, StartWorkflow};
use cadence_core::types::DbId;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::query::InstanceListParams;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/workflows/instances
///
/// Starts an instance and drives it until it waits on approvals or
/// finishes. The returned instance reflects that state.
pub async fn start_workflow(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<StartWorkflow>,
) -> AppResult<impl IntoResponse> {
    let instance = state
        .engine
        .start_workflow(auth.workspace_id, auth.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: instance })))
}

/// GET /api/v1/workflows/instances
pub async fn list_instances(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(params): Query<InstanceListParams>,
) -> AppResult<impl IntoResponse> {
    let query = InstanceQuery::from(params);
    let instances = state.engine.list_instances(auth.workspace_id, &query).await?;
    Ok(Json(DataResponse { data: instances }))
}

/// GET /api/v1/workflows/instances/{id}
///
/// The instance with its workflow, approvals and audit trail (newest first).
pub async fn get_instance(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let detail = state.engine.get_instance(auth.workspace_id, id).await?;
    Ok(Json(DataResponse { data: detail }))
}
