//! Workflow and step definitions.
//!
//! A workflow is an ordered list of steps for one workspace. Steps are
//! persisted as `(type, config JSON)` pairs and decoded into the closed
//! [`StepKind`] sum type, so every consumer matches exhaustively over the
//! step types.

use std::collections::HashSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use validator::Validate;

use crate::aggregation::ApprovalPolicy;
use crate::condition::Condition;
use crate::error::CoreError;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Enumerations
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum WorkflowType {
    #[default]
    Approval,
    Automation,
}

impl WorkflowType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "APPROVAL",
            Self::Automation => "AUTOMATION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "APPROVAL" => Some(Self::Approval),
            "AUTOMATION" => Some(Self::Automation),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepType {
    Approval,
    Notification,
    Action,
    Condition,
}

impl StepType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Approval => "APPROVAL",
            Self::Notification => "NOTIFICATION",
            Self::Action => "ACTION",
            Self::Condition => "CONDITION",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "APPROVAL" => Some(Self::Approval),
            "NOTIFICATION" => Some(Self::Notification),
            "ACTION" => Some(Self::Action),
            "CONDITION" => Some(Self::Condition),
            _ => None,
        }
    }
}

/// What happens when a required step's conditions fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RequiredStepPolicy {
    /// Advance past the step, same as for optional steps.
    #[default]
    Skip,
    /// Stop the instance and reject it.
    Block,
}

/// Whether notification/action failures stop the instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SideEffectPolicy {
    /// Log the failure and advance anyway.
    #[default]
    BestEffort,
    /// Propagate the failure to the caller; the instance stays on the step.
    Strict,
}

// ---------------------------------------------------------------------------
// Step configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalConfig {
    #[serde(default)]
    pub approvers: Vec<DbId>,
    #[serde(default, alias = "approvalType")]
    pub approval_type: ApprovalPolicy,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default, alias = "notificationRecipients")]
    pub recipients: Vec<DbId>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionConfig {
    #[serde(alias = "actionType")]
    pub action_type: String,
    #[serde(default, alias = "actionConfig")]
    pub action_config: Value,
}

/// Type-specific behaviour of a step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", content = "config", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepKind {
    Approval(ApprovalConfig),
    Notification(NotificationConfig),
    Action(ActionConfig),
    Condition,
}

impl StepKind {
    /// Decode a stored `(type, config)` pair.
    pub fn from_parts(step_type: StepType, config: &Value) -> Result<Self, CoreError> {
        let invalid = |e: serde_json::Error| {
            CoreError::Validation(format!(
                "Invalid {} step config: {e}",
                step_type.as_str()
            ))
        };
        let config = if config.is_null() {
            Value::Object(Default::default())
        } else {
            config.clone()
        };
        Ok(match step_type {
            StepType::Approval => StepKind::Approval(serde_json::from_value(config).map_err(invalid)?),
            StepType::Notification => {
                StepKind::Notification(serde_json::from_value(config).map_err(invalid)?)
            }
            StepType::Action => StepKind::Action(serde_json::from_value(config).map_err(invalid)?),
            StepType::Condition => StepKind::Condition,
        })
    }

    pub fn step_type(&self) -> StepType {
        match self {
            StepKind::Approval(_) => StepType::Approval,
            StepKind::Notification(_) => StepType::Notification,
            StepKind::Action(_) => StepType::Action,
            StepKind::Condition => StepType::Condition,
        }
    }

    /// The JSON config blob to persist for this kind.
    pub fn config_json(&self) -> Value {
        let encoded = match self {
            StepKind::Approval(c) => serde_json::to_value(c),
            StepKind::Notification(c) => serde_json::to_value(c),
            StepKind::Action(c) => serde_json::to_value(c),
            StepKind::Condition => Ok(Value::Object(Default::default())),
        };
        encoded.unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

// ---------------------------------------------------------------------------
// Workflow configuration
// ---------------------------------------------------------------------------

/// Workflow-level configuration.
///
/// Unknown keys (trigger type, deadlines, escalation settings, ...) are kept
/// verbatim in `extra`.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct WorkflowConfig {
    /// Entity types this workflow may run against. `None` accepts any.
    #[serde(default, alias = "entityTypes", skip_serializing_if = "Option::is_none")]
    pub entity_types: Option<Vec<String>>,
    #[serde(default, alias = "requiredStepPolicy")]
    pub required_step_policy: RequiredStepPolicy,
    #[serde(default, alias = "sideEffectPolicy")]
    pub side_effect_policy: SideEffectPolicy,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl WorkflowConfig {
    pub fn applies_to(&self, entity_type: &str) -> bool {
        match &self.entity_types {
            Some(types) => types.iter().any(|t| t == entity_type),
            None => true,
        }
    }

    pub fn from_json(value: &Value) -> Result<Self, CoreError> {
        if value.is_null() {
            return Ok(Self::default());
        }
        serde_json::from_value(value.clone())
            .map_err(|e| CoreError::Validation(format!("Invalid workflow config: {e}")))
    }

    pub fn to_json(&self) -> Value {
        serde_json::to_value(self).unwrap_or_else(|_| Value::Object(Default::default()))
    }
}

// ---------------------------------------------------------------------------
// Stored definitions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepDefinition {
    pub id: DbId,
    pub workflow_id: DbId,
    pub name: String,
    pub description: Option<String>,
    pub order: i32,
    pub is_required: bool,
    #[serde(flatten)]
    pub kind: StepKind,
    pub conditions: Vec<Condition>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkflowDefinition {
    pub id: DbId,
    pub workspace_id: DbId,
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub workflow_type: WorkflowType,
    pub config: WorkflowConfig,
    pub is_active: bool,
    pub created_by: DbId,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
    /// Always sorted by ascending `order`.
    pub steps: Vec<StepDefinition>,
}

impl WorkflowDefinition {
    pub fn step_index(&self, step_id: DbId) -> Option<usize> {
        self.steps.iter().position(|s| s.id == step_id)
    }

    pub fn step(&self, step_id: DbId) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.id == step_id)
    }

    /// Sort steps (and each step's conditions) into evaluation order.
    pub fn normalize(&mut self) {
        self.steps.sort_by_key(|s| s.order);
        for step in &mut self.steps {
            step.conditions.sort_by_key(|c| c.order);
        }
    }
}

/// What to do with a step once its conditions have been evaluated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepGate {
    Proceed,
    Skip,
    Block,
}

impl StepDefinition {
    /// Decide the gate for this step given its condition result.
    pub fn gate(&self, conditions_passed: bool, policy: RequiredStepPolicy) -> StepGate {
        if conditions_passed {
            StepGate::Proceed
        } else if self.is_required && policy == RequiredStepPolicy::Block {
            StepGate::Block
        } else {
            StepGate::Skip
        }
    }
}

// ---------------------------------------------------------------------------
// Input DTOs
// ---------------------------------------------------------------------------

/// A step as submitted by a workflow administrator.
#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewStep {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub step_type: StepType,
    #[validate(range(min = 0))]
    pub order: i32,
    #[serde(default)]
    pub config: Value,
    #[serde(alias = "isRequired")]
    pub is_required: Option<bool>,
    #[serde(default)]
    #[validate(nested)]
    pub conditions: Vec<Condition>,
}

impl NewStep {
    pub fn kind(&self) -> Result<StepKind, CoreError> {
        StepKind::from_parts(self.step_type, &self.config)
    }

    /// Steps are required unless explicitly marked otherwise.
    pub fn required(&self) -> bool {
        self.is_required.unwrap_or(true)
    }
}

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct NewWorkflow {
    #[validate(length(min = 1, max = 255))]
    pub name: String,
    pub description: Option<String>,
    #[serde(rename = "type", default)]
    pub workflow_type: WorkflowType,
    #[serde(default)]
    pub config: WorkflowConfig,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    #[serde(default)]
    #[validate(nested)]
    pub steps: Vec<NewStep>,
}

impl NewWorkflow {
    pub fn check(&self) -> Result<Vec<StepKind>, CoreError> {
        self.validate()?;
        validate_steps(&self.steps)
    }
}

/// Patch for a workflow. A `steps` list replaces every existing step.
#[derive(Debug, Clone, Default, Deserialize, Validate)]
pub struct WorkflowPatch {
    #[validate(length(min = 1, max = 255))]
    pub name: Option<String>,
    pub description: Option<String>,
    #[serde(rename = "type")]
    pub workflow_type: Option<WorkflowType>,
    pub config: Option<WorkflowConfig>,
    #[serde(alias = "isActive")]
    pub is_active: Option<bool>,
    #[validate(nested)]
    pub steps: Option<Vec<NewStep>>,
}

impl WorkflowPatch {
    pub fn check(&self) -> Result<Option<Vec<StepKind>>, CoreError> {
        self.validate()?;
        self.steps.as_deref().map(validate_steps).transpose()
    }
}

/// Filter for listing workflows.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct WorkflowFilter {
    #[serde(rename = "type")]
    pub workflow_type: Option<WorkflowType>,
    pub is_active: Option<bool>,
    /// Case-insensitive match against name and description.
    pub search: Option<String>,
}

impl WorkflowFilter {
    pub fn matches(&self, workflow: &WorkflowDefinition) -> bool {
        if self.workflow_type.is_some_and(|t| t != workflow.workflow_type) {
            return false;
        }
        if self.is_active.is_some_and(|a| a != workflow.is_active) {
            return false;
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            Some(term) => {
                let term = term.to_lowercase();
                workflow.name.to_lowercase().contains(&term)
                    || workflow
                        .description
                        .as_deref()
                        .is_some_and(|d| d.to_lowercase().contains(&term))
            }
            None => true,
        }
    }
}

/// Validate a submitted step list and decode each step's kind.
///
/// Orders must be unique, and approval steps need at least one approver.
pub fn validate_steps(steps: &[NewStep]) -> Result<Vec<StepKind>, CoreError> {
    let mut seen = HashSet::with_capacity(steps.len());
    let mut kinds = Vec::with_capacity(steps.len());
    for step in steps {
        step.validate()?;
        if !seen.insert(step.order) {
            return Err(CoreError::Validation(format!(
                "Duplicate step order {}",
                step.order
            )));
        }
        let kind = step.kind()?;
        match &kind {
            StepKind::Approval(cfg) if cfg.approvers.is_empty() => {
                return Err(CoreError::Validation(format!(
                    "Approval step '{}' has no approvers",
                    step.name
                )));
            }
            StepKind::Action(cfg) if cfg.action_type.trim().is_empty() => {
                return Err(CoreError::Validation(format!(
                    "Action step '{}' has no action type",
                    step.name
                )));
            }
            _ => {}
        }
        kinds.push(kind);
    }
    Ok(kinds)
}
