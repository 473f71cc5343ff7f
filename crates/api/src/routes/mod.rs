pub mod health;
pub mod workflow;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// ```text
/// /workflows                              list, create
/// /workflows/analytics                    workspace analytics
/// /workflows/{id}                         get, update, delete
/// /workflows/{id}/analytics               per-workflow analytics
///
/// /workflows/instances                    list, start
/// /workflows/instances/{id}               detail
///
/// /workflows/approvals/pending            caller's inbox
/// /workflows/approvals/bulk               bulk decision (POST)
/// /workflows/approvals/{id}               decision (PUT)
///
/// /workflows/delegations                  list, create
/// /workflows/delegations/active           in force now
/// /workflows/delegations/{id}             get, update, cancel
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new().nest("/workflows", workflow::router())
}
