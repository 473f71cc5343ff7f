//! Workflow instances: one execution of a workflow against one entity.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::approval::Approval;
use crate::audit::AuditEntry;
use crate::pagination::PageRequest;
use crate::types::{DbId, Timestamp};
use crate::workflow::WorkflowDefinition;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstanceStatus {
    InProgress,
    Completed,
    Rejected,
}

impl InstanceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::InProgress => "IN_PROGRESS",
            Self::Completed => "COMPLETED",
            Self::Rejected => "REJECTED",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "IN_PROGRESS" => Some(Self::InProgress),
            "COMPLETED" => Some(Self::Completed),
            "REJECTED" => Some(Self::Rejected),
            _ => None,
        }
    }

    pub fn is_terminal(self) -> bool {
        self != Self::InProgress
    }
}

/// A stored instance.
///
/// `current_step_id` is `None` exactly when the status is terminal.
/// `version` increments on every transition.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowInstance {
    pub id: DbId,
    pub workflow_id: DbId,
    pub workspace_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub status: InstanceStatus,
    pub current_step_id: Option<DbId>,
    pub metadata: Value,
    pub started_by: Option<DbId>,
    pub version: i32,
    pub started_at: Timestamp,
    pub completed_at: Option<Timestamp>,
    pub updated_at: Timestamp,
}

/// Row to insert when an instance starts.
#[derive(Debug, Clone)]
pub struct NewInstance {
    pub workflow_id: DbId,
    pub workspace_id: DbId,
    pub entity_type: String,
    pub entity_id: String,
    pub current_step_id: DbId,
    pub metadata: Value,
    pub started_by: Option<DbId>,
}

/// A state change applied to an instance, guarded by its version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceTransition {
    /// Move to another step, staying `IN_PROGRESS`.
    Advance { step_id: DbId },
    /// Terminal success.
    Complete { at: Timestamp },
    /// Terminal failure.
    Reject { at: Timestamp },
}

impl InstanceTransition {
    /// Apply this transition to an in-memory copy.
    pub fn apply(self, instance: &mut WorkflowInstance, now: Timestamp) {
        match self {
            InstanceTransition::Advance { step_id } => {
                instance.current_step_id = Some(step_id);
            }
            InstanceTransition::Complete { at } => {
                instance.status = InstanceStatus::Completed;
                instance.current_step_id = None;
                instance.completed_at = Some(at);
            }
            InstanceTransition::Reject { at } => {
                instance.status = InstanceStatus::Rejected;
                instance.current_step_id = None;
                instance.completed_at = Some(at);
            }
        }
        instance.version += 1;
        instance.updated_at = now;
    }
}

/// Input for starting an instance.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct StartWorkflow {
    #[serde(alias = "workflowId")]
    pub workflow_id: DbId,
    #[serde(alias = "entityType")]
    #[validate(length(min = 1, max = 100))]
    pub entity_type: String,
    #[serde(alias = "entityId")]
    #[validate(length(min = 1, max = 255))]
    pub entity_id: String,
    #[serde(default)]
    pub metadata: Option<Value>,
}

/// Filter for listing instances.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct InstanceFilter {
    #[serde(alias = "workflowId")]
    pub workflow_id: Option<DbId>,
    #[serde(alias = "entityType")]
    pub entity_type: Option<String>,
    #[serde(alias = "entityId")]
    pub entity_id: Option<String>,
    pub status: Option<InstanceStatus>,
}

impl InstanceFilter {
    pub fn matches(&self, instance: &WorkflowInstance) -> bool {
        self.workflow_id.is_none_or(|id| id == instance.workflow_id)
            && self
                .entity_type
                .as_deref()
                .is_none_or(|t| t == instance.entity_type)
            && self
                .entity_id
                .as_deref()
                .is_none_or(|e| e == instance.entity_id)
            && self.status.is_none_or(|s| s == instance.status)
    }
}

/// Query for listing instances: filter plus page window.
#[derive(Debug, Clone, Default)]
pub struct InstanceQuery {
    pub filter: InstanceFilter,
    pub page: PageRequest,
}

/// An instance with everything a reviewer needs to see.
#[derive(Debug, Clone, Serialize)]
pub struct InstanceDetail {
    #[serde(flatten)]
    pub instance: WorkflowInstance,
    pub workflow: WorkflowDefinition,
    pub approvals: Vec<Approval>,
    /// Newest first.
    pub audit_log: Vec<AuditEntry>,
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn instance() -> WorkflowInstance {
        let now = Utc::now();
        WorkflowInstance {
            id: 1,
            workflow_id: 2,
            workspace_id: 3,
            entity_type: "post".into(),
            entity_id: "p-1".into(),
            status: InstanceStatus::InProgress,
            current_step_id: Some(10),
            metadata: json!({}),
            started_by: Some(4),
            version: 0,
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn terminal_transitions_clear_current_step() {
        let now = Utc::now();
        let mut completed = instance();
        InstanceTransition::Complete { at: now }.apply(&mut completed, now);
        assert_eq!(completed.status, InstanceStatus::Completed);
        assert_eq!(completed.current_step_id, None);
        assert_eq!(completed.completed_at, Some(now));
        assert_eq!(completed.version, 1);

        let mut rejected = instance();
        InstanceTransition::Reject { at: now }.apply(&mut rejected, now);
        assert_eq!(rejected.status, InstanceStatus::Rejected);
        assert_eq!(rejected.current_step_id, None);
    }

    #[test]
    fn advance_keeps_instance_running() {
        let now = Utc::now();
        let mut inst = instance();
        InstanceTransition::Advance { step_id: 11 }.apply(&mut inst, now);
        assert_eq!(inst.status, InstanceStatus::InProgress);
        assert_eq!(inst.current_step_id, Some(11));
        assert!(!inst.status.is_terminal());
    }

    #[test]
    fn filter_matches_on_every_supplied_field() {
        let inst = instance();
        assert!(InstanceFilter::default().matches(&inst));
        let filter = InstanceFilter {
            entity_type: Some("post".into()),
            status: Some(InstanceStatus::InProgress),
            ..Default::default()
        };
        assert!(filter.matches(&inst));
        let other = InstanceFilter {
            entity_id: Some("p-2".into()),
            ..Default::default()
        };
        assert!(!other.matches(&inst));
    }

    #[test]
    fn status_round_trips_through_str() {
        for status in [
            InstanceStatus::InProgress,
            InstanceStatus::Completed,
            InstanceStatus::Rejected,
        ] {
            assert_eq!(InstanceStatus::parse(status.as_str()), Some(status));
        }
    }
}
