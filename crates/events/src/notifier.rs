//! [`Notifier`] that fans notification steps out over the [`EventBus`].

use std::sync::Arc;

use async_trait::async_trait;
use cadence_core::engine::{CollaboratorError, Notifier, StepContext};
use cadence_core::types::DbId;
use serde_json::json;

use crate::bus::{EventBus, PlatformEvent};

/// Event type published for every notification step.
pub const NOTIFICATION_EVENT: &str = "workflow.notification";

/// Publishes one [`NOTIFICATION_EVENT`] per notification step.
///
/// Delivery to people (email, in-app, ...) is left to bus subscribers. A
/// publish that reaches no subscriber is reported as [`NoSubscribers`].
#[derive(Debug, Clone)]
pub struct BusNotifier {
    bus: Arc<EventBus>,
}

impl BusNotifier {
    pub fn new(bus: Arc<EventBus>) -> Self {
        Self { bus }
    }
}

/// A notification was published while nothing listened on the bus.
#[derive(Debug, thiserror::Error)]
#[error("No subscriber received the notification for step {step_id}")]
pub struct NoSubscribers {
    pub step_id: DbId,
}

/// Build the event announcing a notification step.
pub fn notification_event(recipients: &[DbId], ctx: &StepContext) -> PlatformEvent {
    PlatformEvent::new(NOTIFICATION_EVENT)
        .with_workspace(ctx.workspace_id)
        .with_source(ctx.entity_type.clone(), ctx.entity_id.clone())
        .with_payload(json!({
            "recipients": recipients,
            "workflowId": ctx.workflow_id,
            "workflowName": ctx.workflow_name,
            "instanceId": ctx.instance_id,
            "stepId": ctx.step_id,
            "stepName": ctx.step_name,
            "metadata": ctx.metadata,
        }))
}

#[async_trait]
impl Notifier for BusNotifier {
    async fn notify(&self, recipients: &[DbId], ctx: &StepContext) -> Result<(), CollaboratorError> {
        let delivered = self.bus.publish(notification_event(recipients, ctx));
        tracing::debug!(
            instance_id = ctx.instance_id,
            step_id = ctx.step_id,
            recipients = recipients.len(),
            subscribers = delivered,
            "Notification published"
        );
        if delivered == 0 {
            return Err(NoSubscribers { step_id: ctx.step_id }.into());
        }
        Ok(())
    }
}
