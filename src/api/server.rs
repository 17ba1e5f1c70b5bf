use axum::{
    routing::{get, post},
    Router,
};
use sqlx::PgPool;
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::trace::TraceLayer;
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use crate::api::handlers::{
    award_xp_handler, get_progress_handler, get_xp_log_handler, health_handler,
};
use crate::db::connection::create_pool;
use crate::db::progress_ops::PgProgressStore;
use crate::engine::{AwardEngine, EngineConfig};

/// Shared state for all routes
#[derive(Clone)]
pub struct AppState {
    pub pool: PgPool,
    pub engine: Arc<AwardEngine<PgProgressStore>>,
}

pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .json()
                .with_target(false)
                .with_span_events(fmt::format::FmtSpan::CLOSE),
        )
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,sqlx=warn,hyper=warn,tower=warn")),
        )
        .init();
}

pub async fn create_connection_pool() -> Result<PgPool, Box<dyn std::error::Error>> {
    let mut database_url = env::var("DATABASE_URL")?;

    // RDS/pgbouncer deployments expect TLS; add sslmode if the URL does
    // not pin one
    if !database_url.contains("sslmode=") {
        let separator = if database_url.contains('?') { "&" } else { "?" };
        database_url = format!("{}{}sslmode=prefer", database_url, separator);
    }

    info!("Creating database connection pool");
    let pool = create_pool(&database_url).await?;

    Ok(pool)
}

/// Assemble the router around a connection pool
pub fn build_router(pool: PgPool) -> Router {
    let engine = AwardEngine::new(PgProgressStore::new(pool.clone()), EngineConfig::from_env());
    let state = AppState {
        pool,
        engine: Arc::new(engine),
    };

    Router::new()
        .route("/v2/users/{user_id}/xp/awards", post(award_xp_handler))
        .route("/v2/users/{user_id}/progress", get(get_progress_handler))
        .route("/v2/users/{user_id}/xp/log", get(get_xp_log_handler))
        .route("/health", get(health_handler))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
}

pub async fn create_app() -> Result<Router, Box<dyn std::error::Error>> {
    let pool = create_connection_pool().await?;
    Ok(build_router(pool))
}

pub async fn run_server() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting habit-scorer server");

    let shutdown = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install CTRL+C signal handler");
        info!("Shutting down gracefully...");
    };

    let app = create_app().await?;

    let port = env::var("PORT")
        .unwrap_or_else(|_| "3000".to_string())
        .parse::<u16>()?;

    let addr = SocketAddr::from(([0, 0, 0, 0], port));

    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
