//! External capabilities consumed by the engine.

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use crate::types::DbId;
use crate::workflow::ActionConfig;

/// Error type returned by collaborator implementations.
pub type CollaboratorError = Box<dyn std::error::Error + Send + Sync>;

/// What a notifier or action executor knows about the step being run.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StepContext {
    pub workspace_id: DbId,
    pub workflow_id: DbId,
    pub workflow_name: String,
    pub instance_id: DbId,
    pub step_id: DbId,
    pub step_name: String,
    pub entity_type: String,
    pub entity_id: String,
    pub metadata: Value,
}

/// Read-only access to the entity an instance runs against.
///
/// The engine applies its own timeout around [`EntityAccessor::fetch`].
#[async_trait]
pub trait EntityAccessor: Send + Sync {
    async fn fetch(
        &self,
        workspace_id: DbId,
        entity_type: &str,
        entity_id: &str,
    ) -> Result<Value, CollaboratorError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, recipients: &[DbId], ctx: &StepContext) -> Result<(), CollaboratorError>;
}

#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(&self, action: &ActionConfig, ctx: &StepContext)
        -> Result<(), CollaboratorError>;
}

/// Entity accessor that knows no entities.
#[derive(Debug, Default, Clone, Copy)]
pub struct EmptyEntityAccessor;

#[async_trait]
impl EntityAccessor for EmptyEntityAccessor {
    async fn fetch(&self, _: DbId, _: &str, _: &str) -> Result<Value, CollaboratorError> {
        Ok(Value::Object(Default::default()))
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopNotifier;

#[async_trait]
impl Notifier for NoopNotifier {
    async fn notify(&self, _: &[DbId], _: &StepContext) -> Result<(), CollaboratorError> {
        Ok(())
    }
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopActionExecutor;

#[async_trait]
impl ActionExecutor for NoopActionExecutor {
    async fn execute(&self, _: &ActionConfig, _: &StepContext) -> Result<(), CollaboratorError> {
        Ok(())
    }
}
