//! dexec-daemon entry point.
//!
//! This file is intentionally thin: it sets up tracing, loads config, wires
//! the store/queue/registry/router into the worker pool and the HTTP state,
//! and runs the server until SIGINT/SIGTERM. All route handlers live in
//! `routes.rs`; shared state types live in `state.rs`.

use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::CorsLayer,
    trace::{DefaultMakeSpan, DefaultOnResponse, TraceLayer},
};
use tracing::{info, warn, Level};

use dexec_daemon::{config::Config, routes, state::AppState};
use dexec_queue::{JobQueue, QueueConfig};
use dexec_registry::ConnectionRegistry;
use dexec_router::{DexRouter, RouterConfig};
use dexec_store::{MemoryOrderStore, OrderStore, PgOrderStore};
use dexec_worker::{SystemClock, WorkerConfig, WorkerPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env if present (dev convenience). Silent if the file does not
    // exist; production injects env vars directly.
    let _ = dotenvy::dotenv();

    init_tracing();

    let cfg = Config::from_env().context("invalid configuration")?;

    // Store: Postgres when configured, in-memory otherwise.
    let mut pg_store: Option<Arc<PgOrderStore>> = None;
    let store: Arc<dyn OrderStore> = match cfg.database_url() {
        Some(url) => {
            let pg = Arc::new(
                PgOrderStore::connect(&url)
                    .await
                    .context("failed to connect to Postgres")?,
            );
            pg_store = Some(Arc::clone(&pg));
            pg
        }
        None => {
            warn!("POSTGRES_HOST not set; orders will be kept in memory only");
            Arc::new(MemoryOrderStore::new())
        }
    };

    info!(
        redis_host = %cfg.redis_host,
        redis_port = cfg.redis_port,
        "queue backend configured"
    );
    let queue = Arc::new(JobQueue::new(QueueConfig::default()));
    let registry = ConnectionRegistry::new();
    let router = Arc::new(DexRouter::new(RouterConfig::default()));

    let shutdown = CancellationToken::new();
    let pool = WorkerPool::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        router,
        registry.clone(),
        Arc::new(SystemClock),
        WorkerConfig::default(),
    );
    let workers = pool.spawn(shutdown.clone());

    let state = Arc::new(AppState::new(store, queue, registry));
    let app = routes::build_router(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                .on_response(DefaultOnResponse::new().level(Level::INFO)),
        )
        .layer(cors_layer());

    let addr = cfg.bind_addr()?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!("dexec-daemon listening on http://{addr}");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server crashed")?;

    // Intake has stopped; let in-flight workers drain, then close the store.
    info!("shutting down; waiting for in-flight orders");
    shutdown.cancel();
    for worker in workers {
        let _ = worker.await;
    }
    if let Some(pg) = pg_store {
        pg.close().await;
    }
    info!("shutdown complete");

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

/// CORS: browser clients poll the API and open stream sockets from app
/// origins on localhost.
fn cors_layer() -> CorsLayer {
    let allowed_origins = [
        "http://localhost",
        "http://127.0.0.1",
        "http://localhost:3000",
        "http://127.0.0.1:3000",
        "http://localhost:5173",
        "http://127.0.0.1:5173",
    ];

    let origins: Vec<HeaderValue> = allowed_origins
        .iter()
        .filter_map(|o| HeaderValue::from_str(o).ok())
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers(tower_http::cors::Any)
}
