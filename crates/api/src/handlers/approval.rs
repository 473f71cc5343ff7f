//! Handlers for answering approvals.

use axum::extract::{Path, Query, State};
use axum::response::IntoResponse;
use axum::Json;

use cadence_core::approval::{ApprovalInput, ApprovalQuery, BulkApproveInput};
use cadence_core::types::DbId;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// GET /api/v1/workflows/approvals/pending
///
/// Approvals assigned to the caller or to anyone currently delegating to
/// them. `status` defaults to `PENDING`.
pub async fn list_pending(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(query): Query<ApprovalQuery>,
) -> AppResult<impl IntoResponse> {
    let approvals = state
        .engine
        .list_pending_approvals(auth.workspace_id, auth.user_id, &query)
        .await?;
    Ok(Json(DataResponse { data: approvals }))
}

/// PUT /api/v1/workflows/approvals/{id}
pub async fn respond(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(input): Json<ApprovalInput>,
) -> AppResult<impl IntoResponse> {
    let action = input.action;
    let outcome = state
        .engine
        .approve(auth.workspace_id, id, auth.user_id, input)
        .await?;

    tracing::info!(
        approval_id = id,
        user_id = auth.user_id,
        action = ?action,
        instance_status = ?outcome.instance.status,
        "Approval answered"
    );

    Ok(Json(DataResponse { data: outcome }))
}

/// POST /api/v1/workflows/approvals/bulk
///
/// Each approval succeeds or fails independently; the summary lists every
/// failure.
pub async fn bulk_respond(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<BulkApproveInput>,
) -> AppResult<impl IntoResponse> {
    let result = state
        .engine
        .bulk_approve(auth.workspace_id, auth.user_id, input)
        .await?;
    Ok(Json(DataResponse { data: result }))
}
