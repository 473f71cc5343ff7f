//! Rows of `workflows`, `workflow_steps` and `workflow_conditions`.

use std::collections::HashMap;

use cadence_core::condition::{Condition, ConditionOperator, LogicalOperator};
use cadence_core::types::{DbId, Timestamp};
use cadence_core::workflow::{
    StepDefinition, StepKind, StepType, WorkflowConfig, WorkflowDefinition, WorkflowType,
};
use serde_json::Value;
use sqlx::FromRow;

use super::RowError;

/// A row from the `workflows` table.
#[derive(Debug, Clone, FromRow)]
pub struct WorkflowRow {
    pub id: DbId,
    pub workspace_id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub workflow_type: String,
    pub config: Value,
    pub is_active: bool,
    pub created_by: DbId,
    pub deleted_at: Option<Timestamp>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

/// A row from the `workflow_steps` table.
#[derive(Debug, Clone, FromRow)]
pub struct StepRow {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub step_type: String,
    pub step_order: i32,
    pub config: Value,
    pub is_required: bool,
}

/// A row from the `workflow_conditions` table.
#[derive(Debug, Clone, FromRow)]
pub struct ConditionRow {
    pub id: DbId,
    pub step_id: DbId,
    pub field: String,
    pub operator: String,
    pub value: Value,
    pub logical_operator: String,
    pub condition_order: i32,
}

impl ConditionRow {
    pub fn into_condition(self) -> Result<Condition, RowError> {
        let operator =
            ConditionOperator::parse(&self.operator).ok_or_else(|| RowError::UnknownValue {
                kind: "condition operator",
                column: "workflow_conditions.operator",
                value: self.operator.clone(),
            })?;
        Ok(Condition {
            field: self.field,
            operator,
            value: self.value,
            logical_operator: LogicalOperator::parse(&self.logical_operator).unwrap_or_default(),
            order: self.condition_order,
        })
    }
}

impl StepRow {
    pub fn into_step(self, conditions: Vec<Condition>) -> Result<StepDefinition, RowError> {
        let step_type = StepType::parse(&self.step_type).ok_or_else(|| RowError::UnknownValue {
            kind: "step type",
            column: "workflow_steps.step_type",
            value: self.step_type.clone(),
        })?;
        let kind = StepKind::from_parts(step_type, &self.config).map_err(|e| {
            RowError::InvalidJson {
                column: "workflow_steps.config",
                message: e.to_string(),
            }
        })?;
        Ok(StepDefinition {
            id: self.id,
            workflow_id: self.workflow_id,
            name: self.name,
            description: self.description,
            order: self.step_order,
            is_required: self.is_required,
            kind,
            conditions,
        })
    }
}

impl WorkflowRow {
    pub fn into_definition(self, steps: Vec<StepDefinition>) -> Result<WorkflowDefinition, RowError> {
        let workflow_type =
            WorkflowType::parse(&self.workflow_type).ok_or_else(|| RowError::UnknownValue {
                kind: "workflow type",
                column: "workflows.workflow_type",
                value: self.workflow_type.clone(),
            })?;
        let config = WorkflowConfig::from_json(&self.config).map_err(|e| RowError::InvalidJson {
            column: "workflows.config",
            message: e.to_string(),
        })?;
        let mut definition = WorkflowDefinition {
            id: self.id,
            workspace_id: self.workspace_id,
            name: self.name,
            description: self.description,
            workflow_type,
            config,
            is_active: self.is_active,
            created_by: self.created_by,
            created_at: self.created_at,
            updated_at: self.updated_at,
            steps,
        };
        definition.normalize();
        Ok(definition)
    }
}

/// Stitch workflow rows together with their steps and conditions.
///
/// Steps are matched by `workflow_id` and conditions by `step_id`; rows are
/// returned in the order of `workflows`.
pub fn assemble(
    workflows: Vec<WorkflowRow>,
    steps: Vec<StepRow>,
    conditions: Vec<ConditionRow>,
) -> Result<Vec<WorkflowDefinition>, RowError> {
    let mut conditions_by_step: HashMap<DbId, Vec<Condition>> = HashMap::new();
    for row in conditions {
        let step_id = row.step_id;
        conditions_by_step
            .entry(step_id)
            .or_default()
            .push(row.into_condition()?);
    }

    let mut steps_by_workflow: HashMap<DbId, Vec<StepDefinition>> = HashMap::new();
    for row in steps {
        let workflow_id = row.workflow_id;
        let conditions = conditions_by_step.remove(&row.id).unwrap_or_default();
        steps_by_workflow
            .entry(workflow_id)
            .or_default()
            .push(row.into_step(conditions)?);
    }

    workflows
        .into_iter()
        .map(|row| {
            let steps = steps_by_workflow.remove(&row.id).unwrap_or_default();
            row.into_definition(steps)
        })
        .collect()
}
