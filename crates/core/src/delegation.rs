//! Time-bounded approver delegation.
//!
//! A delegation lets `to_user_id` act for `from_user_id` between
//! `start_date` and `end_date` (both inclusive). Active delegations from the
//! same user never overlap, so at most one can cover any instant.

use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

/// A stored delegation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delegation {
    pub id: DbId,
    pub workspace_id: DbId,
    pub from_user_id: DbId,
    pub to_user_id: DbId,
    pub start_date: Timestamp,
    pub end_date: Timestamp,
    pub reason: Option<String>,
    pub is_active: bool,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Delegation {
    /// Whether this delegation is in force at `at`.
    pub fn covers(&self, at: Timestamp) -> bool {
        self.is_active && self.start_date <= at && at <= self.end_date
    }

    /// Whether this delegation's window intersects `[start, end]`.
    pub fn overlaps(&self, start: Timestamp, end: Timestamp) -> bool {
        intervals_overlap(start, end, self.start_date, self.end_date)
    }
}

/// Input for creating a delegation. The delegator is the acting user.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewDelegation {
    #[serde(alias = "toUserId")]
    pub to_user_id: DbId,
    #[serde(alias = "startDate")]
    pub start_date: Timestamp,
    #[serde(alias = "endDate")]
    pub end_date: Timestamp,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// Partial update of a delegation window or reason.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct DelegationPatch {
    #[serde(alias = "startDate")]
    pub start_date: Option<Timestamp>,
    #[serde(alias = "endDate")]
    pub end_date: Option<Timestamp>,
    #[validate(length(max = 1000))]
    pub reason: Option<String>,
}

/// A nominal approver and whoever actually receives the approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ResolvedApprover {
    pub nominal: DbId,
    pub effective: DbId,
}

impl ResolvedApprover {
    pub fn delegated_from(&self) -> Option<DbId> {
        (self.nominal != self.effective).then_some(self.nominal)
    }
}

/// `start` must be strictly before `end`.
pub fn validate_date_range(start: Timestamp, end: Timestamp) -> Result<(), CoreError> {
    if start >= end {
        return Err(CoreError::BadRequest(
            "End date must be after start date".into(),
        ));
    }
    Ok(())
}

/// Closed-interval overlap: the new window starts inside the existing one,
/// ends inside it, or strictly contains it.
pub fn intervals_overlap(
    new_start: Timestamp,
    new_end: Timestamp,
    existing_start: Timestamp,
    existing_end: Timestamp,
) -> bool {
    let starts_inside = existing_start <= new_start && new_start <= existing_end;
    let ends_inside = existing_start <= new_end && new_end <= existing_end;
    let contains = new_start <= existing_start && existing_end <= new_end;
    starts_inside || ends_inside || contains
}

/// Find the delegation from `from_user_id` in force at `at`, if any.
pub fn active_delegation_from(
    delegations: &[Delegation],
    from_user_id: DbId,
    at: Timestamp,
) -> Option<&Delegation> {
    delegations
        .iter()
        .find(|d| d.from_user_id == from_user_id && d.covers(at))
}

/// Substitute each nominal approver with their active delegate.
///
/// Order is preserved and duplicate effective approvers are collapsed, so a
/// user who is both a nominal approver and a delegate gets one approval.
pub fn resolve_approvers(
    nominal: &[DbId],
    delegations: &[Delegation],
    as_of: Timestamp,
) -> Vec<ResolvedApprover> {
    let mut resolved: Vec<ResolvedApprover> = Vec::with_capacity(nominal.len());
    for &approver in nominal {
        let effective = active_delegation_from(delegations, approver, as_of)
            .map(|d| d.to_user_id)
            .unwrap_or(approver);
        if resolved.iter().any(|r| r.effective == effective) {
            continue;
        }
        resolved.push(ResolvedApprover {
            nominal: approver,
            effective,
        });
    }
    resolved
}

/// Whether `acting_user` may respond to an approval assigned to `approver`.
pub fn may_act_for(
    delegations: &[Delegation],
    approver: DbId,
    acting_user: DbId,
    at: Timestamp,
) -> bool {
    approver == acting_user
        || delegations.iter().any(|d| {
            d.from_user_id == approver && d.to_user_id == acting_user && d.covers(at)
        })
}
