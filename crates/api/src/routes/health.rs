use axum::extract::State;
use axum::http::StatusCode;
use axum::{routing::get, Json, Router};
use serde::Serialize;

use crate::state::AppState;

/// Health check response payload.
#[derive(Serialize)]
pub struct HealthResponse {
    /// Overall service status.
    pub status: &'static str,
    /// Crate version from Cargo.toml.
    pub version: &'static str,
    /// Whether the database is reachable; `null` without a database.
    pub db_healthy: Option<bool>,
}

/// GET /health
///
/// 200 when the service can serve requests, 503 when its database is
/// unreachable so load balancers take the instance out of rotation.
async fn health_check(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let db_healthy = match &state.pool {
        Some(pool) => Some(cadence_db::health_check(pool).await.is_ok()),
        None => None,
    };

    let (code, status) = match db_healthy {
        Some(false) => {
            tracing::warn!("Health check failed: database unreachable");
            (StatusCode::SERVICE_UNAVAILABLE, "degraded")
        }
        _ => (StatusCode::OK, "ok"),
    };

    (
        code,
        Json(HealthResponse {
            status,
            version: env!("CARGO_PKG_VERSION"),
            db_healthy,
        }),
    )
}

/// Mount health check routes (root level, not under `/api/v1`).
pub fn router() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
