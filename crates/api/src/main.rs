use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cadence_api::auth::jwt::TokenKeys;
use cadence_api::config::{LogFormat, ServerConfig};
use cadence_api::router::build_app_router;
use cadence_api::state::AppState;
use cadence_core::engine::{DelegationService, EngineStore, WorkflowEngine};
use cadence_db::{PgEntityAccessor, PgStore};
use cadence_events::{BusNotifier, EventBus, WebhookActionExecutor, WebhookDelivery};

type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = ServerConfig::from_env()?;

    // --- Tracing ---
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| "cadence_api=debug,cadence_core=debug,tower_http=debug".into());
    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init(),
        LogFormat::Pretty => tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init(),
    }
    tracing::info!(host = %config.host, port = %config.port, "Loaded server configuration");

    // --- Database ---
    let pool = cadence_db::create_pool(&config.database_url).await?;
    tracing::info!("Database connection pool created");

    cadence_db::health_check(&pool).await?;
    cadence_db::run_migrations(&pool).await?;
    tracing::info!("Database migrations applied");

    // --- Engine ---
    let event_bus = Arc::new(EventBus::default());
    let store: Arc<dyn EngineStore> = Arc::new(PgStore::new(pool.clone()));
    let entities = PgEntityAccessor::from_spec(pool.clone(), &config.entity_tables)?;
    let actions = WebhookActionExecutor::new(WebhookDelivery::new()?, Arc::clone(&event_bus));

    let engine = WorkflowEngine::new(Arc::clone(&store))
        .with_config(config.engine_config())
        .with_entity_accessor(Arc::new(entities))
        .with_notifier(Arc::new(BusNotifier::new(Arc::clone(&event_bus))))
        .with_action_executor(Arc::new(actions));
    tracing::info!(
        entity_tables = %config.entity_tables,
        conflict_retries = config.conflict_retries,
        "Workflow engine ready"
    );

    // --- App state ---
    let state = AppState {
        pool: Some(pool.clone()),
        config: Arc::new(config.clone()),
        tokens: Arc::new(TokenKeys::new(&config.jwt)),
        engine: Arc::new(engine),
        delegations: Arc::new(DelegationService::new(store)),
        event_bus,
    };
    let app = build_app_router(state, &config);

    // --- Start server ---
    let addr = SocketAddr::new(config.host.parse()?, config.port);
    tracing::info!(%addr, "Starting server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    let grace = Duration::from_secs(config.shutdown_timeout_secs);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    tracing::info!("Server stopped accepting connections, cleaning up");
    if tokio::time::timeout(grace, pool.close()).await.is_err() {
        tracing::warn!("Timed out closing the database pool");
    }
    tracing::info!("Graceful shutdown complete");
    Ok(())
}

/// Wait for SIGINT or (on Unix) SIGTERM.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl-C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    tracing::info!("Shutdown signal received, starting graceful shutdown");
}
