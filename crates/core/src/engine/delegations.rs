use std::sync::Arc;

use chrono::Utc;
use tracing::info;
use validator::Validate;

use super::store::EngineStore;
use super::EngineResult;
use crate::delegation::{validate_date_range, Delegation, DelegationPatch, NewDelegation};
use crate::error::CoreError;
use crate::pagination::{Page, PageRequest};
use crate::types::{DbId, Timestamp};

/// Delegation lifecycle: create, read, update and cancel.
///
/// Only the delegating user may change a delegation. Active delegations
/// from one user never overlap.
#[derive(Clone)]
pub struct DelegationService {
    store: Arc<dyn EngineStore>,
}

impl DelegationService {
    pub fn new(store: Arc<dyn EngineStore>) -> Self {
        Self { store }
    }

    pub async fn create(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        input: NewDelegation,
    ) -> EngineResult<Delegation> {
        input.validate().map_err(CoreError::from)?;
        validate_date_range(input.start_date, input.end_date)?;
        if input.to_user_id == from_user_id {
            return Err(CoreError::BadRequest("Cannot delegate to yourself".into()).into());
        }
        if !self.store.user_in_workspace(workspace_id, from_user_id).await? {
            return Err(CoreError::not_found("User", from_user_id).into());
        }
        if !self.store.user_in_workspace(workspace_id, input.to_user_id).await? {
            return Err(CoreError::not_found("User", input.to_user_id).into());
        }

        self.ensure_no_overlap(workspace_id, from_user_id, input.start_date, input.end_date, None)
            .await?;

        let delegation = self
            .store
            .insert_delegation(
                workspace_id,
                from_user_id,
                input.to_user_id,
                input.start_date,
                input.end_date,
                input.reason.as_deref(),
            )
            .await?;

        info!(
            delegation_id = delegation.id,
            workspace_id,
            from_user_id,
            to_user_id = delegation.to_user_id,
            "Delegation created"
        );
        Ok(delegation)
    }

    pub async fn get(&self, workspace_id: DbId, id: DbId) -> EngineResult<Delegation> {
        self.store
            .find_delegation(workspace_id, id)
            .await?
            .ok_or_else(|| CoreError::not_found("Delegation", id).into())
    }

    /// Delegations the user gave or received, newest first.
    pub async fn list(
        &self,
        workspace_id: DbId,
        user_id: DbId,
        page: PageRequest,
    ) -> EngineResult<Page<Delegation>> {
        self.store.list_delegations(workspace_id, user_id, page).await
    }

    /// Delegations involving the user that are in force right now.
    pub async fn list_active(&self, workspace_id: DbId, user_id: DbId) -> EngineResult<Vec<Delegation>> {
        self.store
            .active_delegations_for_user(workspace_id, user_id, Utc::now())
            .await
    }

    pub async fn cancel(
        &self,
        workspace_id: DbId,
        id: DbId,
        user_id: DbId,
    ) -> EngineResult<Delegation> {
        let delegation = self.get(workspace_id, id).await?;
        ensure_delegator(&delegation, user_id, "cancel")?;

        let cancelled = self
            .store
            .deactivate_delegation(id)
            .await?
            .ok_or_else(|| CoreError::not_found("Delegation", id))?;

        info!(delegation_id = id, workspace_id, user_id, "Delegation cancelled");
        Ok(cancelled)
    }

    /// Update the window or reason. The merged window must still be valid
    /// and, for an active delegation, must not overlap any other.
    pub async fn update(
        &self,
        workspace_id: DbId,
        id: DbId,
        user_id: DbId,
        patch: DelegationPatch,
    ) -> EngineResult<Delegation> {
        patch.validate().map_err(CoreError::from)?;
        let delegation = self.get(workspace_id, id).await?;
        ensure_delegator(&delegation, user_id, "update")?;

        let start = patch.start_date.unwrap_or(delegation.start_date);
        let end = patch.end_date.unwrap_or(delegation.end_date);
        validate_date_range(start, end)?;

        let window_changed = start != delegation.start_date || end != delegation.end_date;
        if delegation.is_active && window_changed {
            self.ensure_no_overlap(workspace_id, delegation.from_user_id, start, end, Some(id))
                .await?;
        }

        let reason = match &patch.reason {
            Some(reason) => Some(reason.as_str()),
            None => delegation.reason.as_deref(),
        };
        let updated = self
            .store
            .update_delegation(id, start, end, reason)
            .await?
            .ok_or_else(|| CoreError::not_found("Delegation", id))?;

        info!(delegation_id = id, workspace_id, user_id, "Delegation updated");
        Ok(updated)
    }

    async fn ensure_no_overlap(
        &self,
        workspace_id: DbId,
        from_user_id: DbId,
        start: Timestamp,
        end: Timestamp,
        exclude_id: Option<DbId>,
    ) -> EngineResult<()> {
        if let Some(existing) = self
            .store
            .find_overlapping_delegation(workspace_id, from_user_id, start, end, exclude_id)
            .await?
        {
            return Err(CoreError::BadRequest(format!(
                "Delegation period overlaps with existing delegation {} ({} to {})",
                existing.id,
                existing.start_date.to_rfc3339(),
                existing.end_date.to_rfc3339()
            ))
            .into());
        }
        Ok(())
    }
}

fn ensure_delegator(delegation: &Delegation, user_id: DbId, verb: &str) -> Result<(), CoreError> {
    if delegation.from_user_id != user_id {
        return Err(CoreError::Forbidden(format!(
            "Only the delegator can {verb} the delegation"
        )));
    }
    Ok(())
}
