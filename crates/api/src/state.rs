use std::sync::Arc;

use cadence_core::engine::{DelegationService, WorkflowEngine};
use cadence_events::EventBus;

use crate::auth::jwt::TokenKeys;
use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable; everything is behind `Arc` or is a pool handle.
#[derive(Clone)]
pub struct AppState {
    /// Database pool, when running on PostgreSQL. `None` for the in-memory store.
    pub pool: Option<cadence_db::DbPool>,
    pub config: Arc<ServerConfig>,
    /// Keys for verifying Bearer tokens, derived from `config.jwt`.
    pub tokens: Arc<TokenKeys>,
    pub engine: Arc<WorkflowEngine>,
    pub delegations: Arc<DelegationService>,
    /// Bus the notifier and action executor publish on.
    pub event_bus: Arc<EventBus>,
}
