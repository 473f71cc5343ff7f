//! Query-string parameter types for API handlers.
//!
//! `serde(flatten)` does not mix with numeric query parameters, so list
//! endpoints take flat structs here and split them into filter and page.

use cadence_core::instance::{InstanceFilter, InstanceQuery, InstanceStatus};
use cadence_core::pagination::PageRequest;
use cadence_core::types::DbId;
use cadence_core::workflow::{WorkflowFilter, WorkflowType};
use serde::Deserialize;

/// `GET /workflows` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct WorkflowListParams {
    #[serde(rename = "type")]
    pub workflow_type: Option<WorkflowType>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    pub search: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl WorkflowListParams {
    pub fn into_parts(self) -> (WorkflowFilter, PageRequest) {
        (
            WorkflowFilter {
                workflow_type: self.workflow_type,
                is_active: self.is_active,
                search: self.search.filter(|s| !s.trim().is_empty()),
            },
            PageRequest::new(self.limit, self.offset),
        )
    }
}

/// `GET /workflows/instances` parameters.
#[derive(Debug, Default, Deserialize)]
pub struct InstanceListParams {
    #[serde(alias = "workflowId")]
    pub workflow_id: Option<DbId>,
    #[serde(alias = "entityType")]
    pub entity_type: Option<String>,
    #[serde(alias = "entityId")]
    pub entity_id: Option<String>,
    pub status: Option<InstanceStatus>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

impl From<InstanceListParams> for InstanceQuery {
    fn from(params: InstanceListParams) -> Self {
        InstanceQuery {
            filter: InstanceFilter {
                workflow_id: params.workflow_id,
                entity_type: params.entity_type,
                entity_id: params.entity_id,
                status: params.status,
            },
            page: PageRequest::new(params.limit, params.offset),
        }
    }
}
