//! Handlers for approval delegations.
//!
//! The caller is always the delegator: they create delegations from
//! themselves and only they may update or cancel them.

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::Json;

use cadence_core::delegation::{DelegationPatch, NewDelegation};
use cadence_core::pagination::PageRequest;
use cadence_core::types::DbId;

use crate::error::AppResult;
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// POST /api/v1/workflows/delegations
pub async fn create_delegation(
    auth: AuthUser,
    State(state): State<AppState>,
    Json(input): Json<NewDelegation>,
) -> AppResult<impl IntoResponse> {
    let delegation = state
        .delegations
        .create(auth.workspace_id, auth.user_id, input)
        .await?;
    Ok((StatusCode::CREATED, Json(DataResponse { data: delegation })))
}

/// GET /api/v1/workflows/delegations
///
/// Delegations the caller gave or received, newest first.
pub async fn list_delegations(
    auth: AuthUser,
    State(state): State<AppState>,
    Query(page): Query<PageRequest>,
) -> AppResult<impl IntoResponse> {
    let delegations = state
        .delegations
        .list(auth.workspace_id, auth.user_id, page)
        .await?;
    Ok(Json(DataResponse { data: delegations }))
}

/// GET /api/v1/workflows/delegations/active
pub async fn list_active_delegations(
    auth: AuthUser,
    State(state): State<AppState>,
) -> AppResult<impl IntoResponse> {
    let delegations = state
        .delegations
        .list_active(auth.workspace_id, auth.user_id)
        .await?;
    Ok(Json(DataResponse { data: delegations }))
}

/// GET /api/v1/workflows/delegations/{id}
pub async fn get_delegation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let delegation = state.delegations.get(auth.workspace_id, id).await?;
    Ok(Json(DataResponse { data: delegation }))
}

/// PUT /api/v1/workflows/delegations/{id}
pub async fn update_delegation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
    Json(patch): Json<DelegationPatch>,
) -> AppResult<impl IntoResponse> {
    let delegation = state
        .delegations
        .update(auth.workspace_id, id, auth.user_id, patch)
        .await?;
    Ok(Json(DataResponse { data: delegation }))
}

/// DELETE /api/v1/workflows/delegations/{id}
///
/// Deactivates the delegation and returns it.
pub async fn cancel_delegation(
    auth: AuthUser,
    State(state): State<AppState>,
    Path(id): Path<DbId>,
) -> AppResult<impl IntoResponse> {
    let delegation = state
        .delegations
        .cancel(auth.workspace_id, id, auth.user_id)
        .await?;
    Ok(Json(DataResponse { data: delegation }))
}
