//! Webhook delivery with exponential-backoff retry, and the action executor
//! built on it.
//!
//! [`WebhookDelivery`] POSTs a JSON body to an external URL. Failed attempts
//! are retried after each delay in its schedule (1 s, 2 s, 4 s by default)
//! before giving up.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use cadence_core::engine::{ActionExecutor, CollaboratorError, StepContext};
use cadence_core::workflow::ActionConfig;
use serde_json::{json, Value};

use crate::bus::{EventBus, PlatformEvent};

/// Retry delays in seconds (exponential backoff: 1s, 2s, 4s).
const RETRY_DELAYS_SECS: [u64; 3] = [1, 2, 4];

/// HTTP request timeout for a single delivery attempt.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(10);

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    /// The underlying HTTP request failed (network, DNS, timeout, etc.).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The remote server returned a non-2xx status code.
    #[error("Webhook returned HTTP {0}")]
    HttpStatus(u16),
}

/// Why an action step could not be carried out.
#[derive(Debug, thiserror::Error)]
pub enum ActionError {
    #[error("Unknown action type '{0}'")]
    UnknownAction(String),

    #[error("Action '{action}' requires actionConfig.{field}")]
    MissingField {
        action: &'static str,
        field: &'static str,
    },

    #[error(transparent)]
    Webhook(#[from] WebhookError),
}

// ---------------------------------------------------------------------------
// WebhookDelivery
// ---------------------------------------------------------------------------

/// Delivers JSON payloads to external webhook endpoints.
#[derive(Debug, Clone)]
pub struct WebhookDelivery {
    client: reqwest::Client,
    retry_delays: Vec<Duration>,
}

impl WebhookDelivery {
    /// Create a delivery service with a pre-configured HTTP client.
    pub fn new() -> Result<Self, WebhookError> {
        let client = reqwest::Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self::with_client(client))
    }

    pub fn with_client(client: reqwest::Client) -> Self {
        Self {
            client,
            retry_delays: RETRY_DELAYS_SECS
                .iter()
                .map(|s| Duration::from_secs(*s))
                .collect(),
        }
    }

    /// Replace the backoff schedule. One retry is made per entry.
    pub fn with_retry_delays(mut self, delays: Vec<Duration>) -> Self {
        self.retry_delays = delays;
        self
    }

    /// POST `payload` to `url`, retrying on failure.
    ///
    /// Returns `Ok(())` on the first successful attempt, otherwise the error
    /// from the first failed attempt.
    pub async fn deliver(&self, url: &str, payload: &Value) -> Result<(), WebhookError> {
        let mut first_err: Option<WebhookError> = None;

        for (attempt, delay) in self.retry_delays.iter().enumerate() {
            match self.try_send(url, payload).await {
                Ok(()) => return Ok(()),
                Err(e) => {
                    tracing::warn!(
                        attempt = attempt + 1,
                        url,
                        error = %e,
                        "Webhook delivery attempt failed, retrying"
                    );
                    first_err.get_or_insert(e);
                    tokio::time::sleep(*delay).await;
                }
            }
        }

        // Final attempt after the last backoff.
        match self.try_send(url, payload).await {
            Ok(()) => Ok(()),
            Err(e) => {
                tracing::error!(url, error = %e, "Webhook delivery failed after all retries");
                Err(first_err.unwrap_or(e))
            }
        }
    }

    /// Deliver a [`PlatformEvent`] using the platform envelope.
    pub async fn deliver_event(&self, url: &str, event: &PlatformEvent) -> Result<(), WebhookError> {
        let payload = json!({
            "event_type": event.event_type,
            "workspace_id": event.workspace_id,
            "payload": event.payload,
            "timestamp": event.timestamp,
            "source_entity_type": event.source_entity_type,
            "source_entity_id": event.source_entity_id,
        });
        self.deliver(url, &payload).await
    }

    /// Execute a single POST request and check the response status.
    async fn try_send(&self, url: &str, payload: &Value) -> Result<(), WebhookError> {
        let response = self.client.post(url).json(payload).send().await?;
        if !response.status().is_success() {
            return Err(WebhookError::HttpStatus(response.status().as_u16()));
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// WebhookActionExecutor
// ---------------------------------------------------------------------------

/// Runs action steps.
///
/// - `webhook`: POSTs the step context to `actionConfig.url`.
/// - `emit_event`: publishes `actionConfig.eventType` on the bus, with
///   `actionConfig.payload` and the step context as payload.
///
/// Any other action type fails with [`ActionError::UnknownAction`].
#[derive(Debug, Clone)]
pub struct WebhookActionExecutor {
    delivery: WebhookDelivery,
    bus: Arc<EventBus>,
}

impl WebhookActionExecutor {
    pub fn new(delivery: WebhookDelivery, bus: Arc<EventBus>) -> Self {
        Self { delivery, bus }
    }

    async fn run(&self, action: &ActionConfig, ctx: &StepContext) -> Result<(), ActionError> {
        match action.action_type.as_str() {
            "webhook" => {
                let url = string_field(&action.action_config, "url").ok_or(
                    ActionError::MissingField {
                        action: "webhook",
                        field: "url",
                    },
                )?;
                let body = json!({
                    "actionType": action.action_type,
                    "context": ctx,
                    "payload": action.action_config.get("payload").cloned().unwrap_or(Value::Null),
                });
                self.delivery.deliver(url, &body).await?;
                tracing::info!(instance_id = ctx.instance_id, step_id = ctx.step_id, url, "Webhook action delivered");
                Ok(())
            }
            "emit_event" => {
                let event_type = string_field(&action.action_config, "eventType").ok_or(
                    ActionError::MissingField {
                        action: "emit_event",
                        field: "eventType",
                    },
                )?;
                let event = PlatformEvent::new(event_type)
                    .with_workspace(ctx.workspace_id)
                    .with_source(ctx.entity_type.clone(), ctx.entity_id.clone())
                    .with_payload(json!({
                        "context": ctx,
                        "payload": action.action_config.get("payload").cloned().unwrap_or(Value::Null),
                    }));
                self.bus.publish(event);
                Ok(())
            }
            other => Err(ActionError::UnknownAction(other.to_string())),
        }
    }
}

fn string_field<'a>(config: &'a Value, field: &str) -> Option<&'a str> {
    config.get(field).and_then(Value::as_str).filter(|s| !s.is_empty())
}

#[async_trait]
impl ActionExecutor for WebhookActionExecutor {
    async fn execute(&self, action: &ActionConfig, ctx: &StepContext) -> Result<(), CollaboratorError> {
        self.run(action, ctx).await.map_err(|e| {
            tracing::warn!(
                instance_id = ctx.instance_id,
                step_id = ctx.step_id,
                action_type = %action.action_type,
                error = %e,
                "Action failed"
            );
            Box::new(e) as CollaboratorError
        })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
