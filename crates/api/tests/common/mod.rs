#![allow(dead_code)]

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Method, Request, Response};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::Value;
use tower::ServiceExt;

use cadence_api::auth::jwt::{JwtConfig, TokenKeys};
use cadence_api::config::{LogFormat, ServerConfig, DEFAULT_ENTITY_TABLES};
use cadence_api::router::build_app_router;
use cadence_api::state::AppState;
use cadence_core::engine::{
    DelegationService, EngineStore, InMemoryStore, StaticEntityAccessor, WorkflowEngine,
};
use cadence_core::roles::{ROLE_ADMIN, ROLE_MEMBER};
use cadence_core::types::DbId;
use cadence_events::{BusNotifier, EventBus, WebhookActionExecutor, WebhookDelivery};

pub const WS: DbId = 1;
pub const OTHER_WS: DbId = 2;
pub const ADMIN: DbId = 10;
pub const ALICE: DbId = 11;
pub const BOB: DbId = 12;
pub const CAROL: DbId = 13;
pub const OUTSIDER: DbId = 20;

const SECRET: &str = "test-secret-that-is-long-enough-for-hmac";

/// Build a test `ServerConfig` with safe defaults.
pub fn test_config() -> ServerConfig {
    ServerConfig {
        host: "127.0.0.1".to_string(),
        port: 0,
        cors_origins: vec!["http://localhost:5173".to_string()],
        request_timeout_secs: 30,
        shutdown_timeout_secs: 30,
        database_url: "postgres://unused".to_string(),
        jwt: JwtConfig {
            secret: SECRET.to_string(),
            access_token_expiry_mins: 15,
        },
        entity_fetch_timeout_secs: 5,
        conflict_retries: 3,
        entity_tables: DEFAULT_ENTITY_TABLES.to_string(),
        log_format: LogFormat::Pretty,
    }
}

/// The application plus handles on its in-memory collaborators.
pub struct TestApp {
    pub router: Router,
    pub store: Arc<InMemoryStore>,
    pub entities: Arc<StaticEntityAccessor>,
    pub bus: Arc<EventBus>,
}

/// Build the full application router on the in-memory store, with the same
/// middleware stack production uses.
pub fn build_test_app() -> TestApp {
    let config = test_config();
    let store = Arc::new(InMemoryStore::new());
    store.add_members(WS, &[ADMIN, ALICE, BOB, CAROL]);
    store.add_members(OTHER_WS, &[OUTSIDER]);
    let dyn_store: Arc<dyn EngineStore> = store.clone();

    let bus = Arc::new(EventBus::default());
    let entities = Arc::new(StaticEntityAccessor::new());
    let actions = WebhookActionExecutor::new(
        WebhookDelivery::with_client(reqwest::Client::new()).with_retry_delays(Vec::new()),
        Arc::clone(&bus),
    );
    let engine = WorkflowEngine::new(Arc::clone(&dyn_store))
        .with_config(config.engine_config())
        .with_entity_accessor(entities.clone())
        .with_notifier(Arc::new(BusNotifier::new(Arc::clone(&bus))))
        .with_action_executor(Arc::new(actions));

    let state = AppState {
        pool: None,
        config: Arc::new(config.clone()),
        tokens: Arc::new(TokenKeys::new(&config.jwt)),
        engine: Arc::new(engine),
        delegations: Arc::new(DelegationService::new(dyn_store)),
        event_bus: Arc::clone(&bus),
    };

    TestApp {
        router: build_app_router(state, &config),
        store,
        entities,
        bus,
    }
}

/// Bearer token for a user of `workspace_id`.
pub fn token_for(user_id: DbId, workspace_id: DbId, role: &str) -> String {
    TokenKeys::new(&test_config().jwt)
        .issue(user_id, workspace_id, role)
        .expect("token generation should succeed")
}

pub fn admin_token() -> String {
    token_for(ADMIN, WS, ROLE_ADMIN)
}

pub fn member_token(user_id: DbId) -> String {
    token_for(user_id, WS, ROLE_MEMBER)
}

// ---------------------------------------------------------------------------
// Request helpers
// ---------------------------------------------------------------------------

pub async fn send(
    app: &Router,
    method: Method,
    uri: &str,
    token: Option<&str>,
    body: Option<Value>,
) -> Response<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("authorization", format!("Bearer {token}"));
    }
    let request = match body {
        Some(json) => builder
            .header("content-type", "application/json")
            .body(Body::from(json.to_string())),
        None => builder.body(Body::empty()),
    }
    .unwrap();
    app.clone().oneshot(request).await.unwrap()
}

pub async fn get(app: &Router, uri: &str) -> Response<Body> {
    send(app, Method::GET, uri, None, None).await
}

pub async fn get_auth(app: &Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::GET, uri, Some(token), None).await
}

pub async fn post_json_auth(app: &Router, uri: &str, body: Value, token: &str) -> Response<Body> {
    send(app, Method::POST, uri, Some(token), Some(body)).await
}

pub async fn put_json_auth(app: &Router, uri: &str, body: Value, token: &str) -> Response<Body> {
    send(app, Method::PUT, uri, Some(token), Some(body)).await
}

pub async fn delete_auth(app: &Router, uri: &str, token: &str) -> Response<Body> {
    send(app, Method::DELETE, uri, Some(token), None).await
}

/// Collect a response body and parse it as JSON.
pub async fn body_json(response: Response<Body>) -> Value {
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    serde_json::from_slice(&bytes).unwrap()
}
