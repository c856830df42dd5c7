use std::sync::Arc;

use anyhow::Context;
use diagram_sync_relay::{
    agent::EditAgent,
    auth::jwt::JwtAccessTokenService,
    build_router,
    config::{LogFormat, RelayConfig},
    db::{
        migrations::run_migrations,
        pool::{check_pool_health, create_pg_pool, PoolConfig},
    },
    group::GroupBus,
    store::DocumentStore,
    sync::SyncController,
    AppState,
};
use tokio::net::TcpListener;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = RelayConfig::from_env();
    init_tracing(&config);

    if config.is_dev_jwt_secret() {
        warn!("using the development JWT secret; set DIAGRAM_SYNC_JWT_SECRET in production");
    }

    let jwt = Arc::new(
        JwtAccessTokenService::new(&config.jwt_secret).context("invalid relay JWT secret")?,
    );
    let store = open_store(&config).await?;
    let agent = EditAgent::from_config(&config.agent).context("failed to build edit agent")?;

    let store_backend = store.backend_name();
    let controller =
        Arc::new(SyncController::new(store, Arc::new(GroupBus::new()), config.key_policy));

    info!(
        store = store_backend,
        agent = agent.kind(),
        key_policy = ?controller.policy(),
        "relay components ready"
    );

    let state = AppState {
        controller,
        agent: Arc::new(agent),
        jwt,
        ws_base_url: Arc::from(config.ws_base_url.as_str()),
    };
    let app = build_router(state, config.cors_origins.as_deref());

    let listener = TcpListener::bind(config.listen_addr)
        .await
        .with_context(|| format!("failed to bind relay listener on {}", config.listen_addr))?;

    info!(listen_addr = %config.listen_addr, "starting relay server");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("relay server exited unexpectedly")
}

fn init_tracing(config: &RelayConfig) {
    let builder = tracing_subscriber::fmt().with_env_filter(EnvFilter::new(&config.log_filter));
    match config.log_format {
        LogFormat::Json => builder.json().init(),
        LogFormat::Text => builder.init(),
    }
}

async fn open_store(config: &RelayConfig) -> anyhow::Result<DocumentStore> {
    let Some(database_url) = config.database_url.as_deref() else {
        warn!("DIAGRAM_SYNC_DATABASE_URL is not set; diagrams are kept in memory only");
        return Ok(DocumentStore::memory());
    };

    let pool = create_pg_pool(database_url, PoolConfig::from_env())
        .await
        .context("failed to connect to PostgreSQL")?;
    check_pool_health(&pool).await.context("PostgreSQL health check failed")?;
    run_migrations(&pool).await.context("failed to run relay migrations")?;

    Ok(DocumentStore::Postgres(pool))
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(error) = tokio::signal::ctrl_c().await {
            warn!(error = %error, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(error) => {
                warn!(error = %error, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }

    info!("shutdown signal received");
}
