use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use axum::{extract::State, routing::get, Router};
use common_observability::EngineMetrics;
use prometheus::{Encoder, TextEncoder};
use sqlx::PgPool;
use tokio::net::TcpListener;
use tracing::{error, info};

use inventory_engine::config::EngineConfig;
use inventory_engine::notifier::LogNotifier;
use inventory_engine::sweep::run_inventory_sweep;
use inventory_engine::AppState;

async fn health() -> &'static str {
    "ok"
}

async fn metrics_endpoint(State(state): State<AppState>) -> (axum::http::StatusCode, String) {
    let encoder = TextEncoder::new();
    let families = state.metrics.registry.gather();
    let mut buf = Vec::new();
    if let Err(e) = encoder.encode(&families, &mut buf) {
        return (
            axum::http::StatusCode::INTERNAL_SERVER_ERROR,
            format!("metrics encode error: {e}"),
        );
    }
    (
        axum::http::StatusCode::OK,
        String::from_utf8_lossy(&buf).to_string(),
    )
}

fn spawn_inventory_sweeper(state: AppState) {
    tokio::spawn(async move {
        let notifier = LogNotifier;
        let sweep_interval = state.config.sweep_interval;
        loop {
            tokio::time::sleep(sweep_interval).await;
            let start = std::time::Instant::now();
            match run_inventory_sweep(
                &state.db,
                &notifier,
                &state.metrics,
                state.config.expiry_warning_window_minutes,
            )
            .await
            {
                Ok(summary) => {
                    info!(
                        stores = summary.stores,
                        low_stock = summary.low_stock_alerts,
                        expiring = summary.expiring_alerts,
                        expired = summary.expired_alerts,
                        "inventory sweep finished"
                    );
                }
                Err(err) => error!(?err, "inventory sweep error"),
            }
            let elapsed = start.elapsed().as_secs_f64();
            state.metrics.sweeper_duration_seconds.observe(elapsed);
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt().with_env_filter("info").init();

    let database_url = env::var("DATABASE_URL").context("DATABASE_URL must be set")?;
    let db = PgPool::connect(&database_url).await?;
    sqlx::migrate!("./migrations").run(&db).await?;

    let config = EngineConfig::from_env();
    let metrics = Arc::new(EngineMetrics::new());
    let state = AppState { db, config: config.clone(), metrics };

    spawn_inventory_sweeper(state.clone());

    let app = Router::new()
        .route("/healthz", get(health))
        .route("/metrics", get(metrics_endpoint))
        .with_state(state);

    let ip: std::net::IpAddr = config.host.parse()?;
    let addr = SocketAddr::from((ip, config.port));
    info!(%addr, "starting inventory-engine");
    let listener = TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
