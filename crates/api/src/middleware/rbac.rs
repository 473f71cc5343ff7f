//! Role gate for workflow administration.

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use cadence_core::error::CoreError;

use super::auth::AuthUser;
use crate::error::AppError;
use crate::state::AppState;

/// An [`AuthUser`] holding the workspace `admin` role. Anyone else gets 403.
///
/// Creating, editing and deleting workflow definitions require it; starting
/// instances, answering approvals and managing one's own delegations do not.
pub struct RequireAdmin(pub AuthUser);

impl FromRequestParts<AppState> for RequireAdmin {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let user = AuthUser::from_request_parts(parts, state).await?;
        if !user.is_admin() {
            tracing::info!(
                user_id = user.user_id,
                workspace_id = user.workspace_id,
                role = %user.role,
                path = %parts.uri.path(),
                "Refused admin-only request"
            );
            return Err(AppError::Core(CoreError::Forbidden(
                "Admin role required".into(),
            )));
        }
        Ok(RequireAdmin(user))
    }
}
