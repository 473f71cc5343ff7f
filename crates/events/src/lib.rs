//! Event bus and side-effect delivery for the cadence workflow engine.
//!
//! - [`EventBus`]: in-process publish/subscribe hub backed by
//!   `tokio::sync::broadcast`.
//! - [`PlatformEvent`]: the event envelope.
//! - [`BusNotifier`]: the engine's notifier, publishing on the bus.
//! - [`delivery`]: outbound webhooks and the action executor built on them.

pub mod bus;
pub mod delivery;
pub mod notifier;

pub use bus::{EventBus, PlatformEvent};
pub use delivery::webhook::{ActionError, WebhookActionExecutor, WebhookDelivery, WebhookError};
pub use notifier::{BusNotifier, NoSubscribers, NOTIFICATION_EVENT};
