//! Status helper enums mapping to the SMALLINT lookup tables.
//!
//! Each variant's discriminant matches the seed order (1-based) of the
//! corresponding `workflow_*_statuses` table.

use cadence_core::aggregation::ApprovalStatus;
use cadence_core::instance::InstanceStatus;

use super::RowError;

/// Status ID type matching SMALLINT/SMALLSERIAL in the database.
pub type StatusId = i16;

macro_rules! define_status_enum {
    (
        $(#[$meta:meta])*
        $name:ident {
            $( $(#[$vmeta:meta])* $variant:ident = $val:literal ),+ $(,)?
        }
    ) => {
        $(#[$meta])*
        #[repr(i16)]
        #[derive(Debug, Clone, Copy, PartialEq, Eq)]
        pub enum $name {
            $( $(#[$vmeta])* $variant = $val ),+
        }

        impl $name {
            /// Return the database status ID.
            pub fn id(self) -> StatusId {
                self as StatusId
            }

            /// Look up the variant for a stored status ID.
            pub fn from_id(id: StatusId) -> Option<Self> {
                match id {
                    $( $val => Some(Self::$variant), )+
                    _ => None,
                }
            }
        }

        impl From<$name> for StatusId {
            fn from(value: $name) -> Self {
                value as StatusId
            }
        }
    };
}

define_status_enum! {
    /// Workflow instance lifecycle status.
    InstanceStatusId {
        InProgress = 1,
        Completed = 2,
        Rejected = 3,
    }
}

define_status_enum! {
    /// Per-approver decision status.
    ApprovalStatusId {
        Pending = 1,
        Approved = 2,
        Rejected = 3,
        Skipped = 4,
    }
}

impl From<InstanceStatus> for InstanceStatusId {
    fn from(status: InstanceStatus) -> Self {
        match status {
            InstanceStatus::InProgress => Self::InProgress,
            InstanceStatus::Completed => Self::Completed,
            InstanceStatus::Rejected => Self::Rejected,
        }
    }
}

impl From<InstanceStatusId> for InstanceStatus {
    fn from(status: InstanceStatusId) -> Self {
        match status {
            InstanceStatusId::InProgress => Self::InProgress,
            InstanceStatusId::Completed => Self::Completed,
            InstanceStatusId::Rejected => Self::Rejected,
        }
    }
}

impl From<ApprovalStatus> for ApprovalStatusId {
    fn from(status: ApprovalStatus) -> Self {
        match status {
            ApprovalStatus::Pending => Self::Pending,
            ApprovalStatus::Approved => Self::Approved,
            ApprovalStatus::Rejected => Self::Rejected,
            ApprovalStatus::Skipped => Self::Skipped,
        }
    }
}

impl From<ApprovalStatusId> for ApprovalStatus {
    fn from(status: ApprovalStatusId) -> Self {
        match status {
            ApprovalStatusId::Pending => Self::Pending,
            ApprovalStatusId::Approved => Self::Approved,
            ApprovalStatusId::Rejected => Self::Rejected,
            ApprovalStatusId::Skipped => Self::Skipped,
        }
    }
}

/// Decode a stored instance status.
pub fn instance_status(id: StatusId) -> Result<InstanceStatus, RowError> {
    InstanceStatusId::from_id(id)
        .map(InstanceStatus::from)
        .ok_or_else(|| RowError::UnknownValue {
            kind: "instance status",
            column: "workflow_instances.status_id",
            value: id.to_string(),
        })
}

/// Decode a stored approval status.
pub fn approval_status(id: StatusId) -> Result<ApprovalStatus, RowError> {
    ApprovalStatusId::from_id(id)
        .map(ApprovalStatus::from)
        .ok_or_else(|| RowError::UnknownValue {
            kind: "approval status",
            column: "workflow_approvals.status_id",
            value: id.to_string(),
        })
}
