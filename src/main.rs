use std::sync::Arc;

use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};
use trades_entity_api::{
    app::build_router,
    application::entity_service::EntityService,
    config::{AppConfig, DatabaseBackend},
    infrastructure::{
        EntityRepository, in_memory_entity_repository::InMemoryEntityRepository,
        postgres_entity_repository::PgEntityRepository, retry::RetryingEntityRepository,
    },
    state::AppState,
};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    dotenvy::dotenv().ok();

    let config = AppConfig::from_env().context("failed to load configuration")?;

    let store: Arc<dyn EntityRepository> = match config.backend {
        DatabaseBackend::Postgres => {
            // Lazy so the first connection attempt goes through the retry policy.
            let pool = PgPoolOptions::new()
                .max_connections(config.db_max_connections)
                .acquire_timeout(config.db_acquire_timeout)
                .connect_lazy(&config.database_url)
                .context("DATABASE_URL is not a valid PostgreSQL connection string")?;
            Arc::new(PgEntityRepository::new(pool))
        }
        DatabaseBackend::Memory => Arc::new(InMemoryEntityRepository::new()),
    };

    let repository = Arc::new(RetryingEntityRepository::new(
        store,
        config.retry_policy(),
    ));
    repository
        .init()
        .await
        .context("failed to initialize entity store")?;

    let service = Arc::new(EntityService::new(repository));
    let state = AppState::new(service);

    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!(
        bind_addr = %config.bind_addr,
        backend = ?config.backend,
        max_retries = config.retry_max_retries,
        "trades entity API started"
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("trades_entity_api=debug,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            error!(error = %err, "unable to install ctrl+c handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{SignalKind, signal};

        match signal(SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => {
                error!(error = %err, "unable to install sigterm handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}
