//! DSX Market Data Client
//!
//! Connects to the DSX market data server in subscription mode, subscribes
//! to real-time quotes for the configured symbols, and serves health and
//! metrics endpoints while the connection is supervised.

use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use tower_http::trace::TraceLayer;
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use dsx_market_data::{ClientMetrics, Config, Connection, Dataser, Mode};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting DSX Market Data Client");

    // Load configuration
    let config = Config::load()?;
    info!(server = %config.address(), symbols = ?config.symbols, "Configuration loaded");

    let metrics = ClientMetrics::new()?;
    metrics.register(prometheus::default_registry())?;

    let connection = Connection::with_metrics(config.clone(), Mode::Async, metrics);
    let dataser = Arc::new(Dataser::with_connection(connection));

    // Start health check server
    let health_state = dataser.clone();
    let health_port = config.health_port;
    tokio::spawn(async move {
        if let Err(e) = start_health_server(health_state, health_port).await {
            warn!(error = %e, "Health server error");
        }
    });

    dataser.connection().connect().await?;

    let subscription = dataser
        .sub_quotes(&config.symbols, |result| {
            info!(
                success = result.success,
                quotes = %result.data,
                "Quote update"
            );
        })
        .await;

    if subscription.is_none() {
        warn!("Quote subscription was not registered");
    }

    tokio::signal::ctrl_c().await?;
    info!("Shutting down");

    if let Some(subscription) = subscription {
        dataser.cancel(&subscription).await;
    }
    dataser.close().await;

    Ok(())
}

/// Start HTTP server for health checks and metrics
async fn start_health_server(dataser: Arc<Dataser>, port: u16) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics))
        .layer(TraceLayer::new_for_http())
        .with_state(dataser);

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check(State(dataser): State<Arc<Dataser>>) -> Json<serde_json::Value> {
    let connection = dataser.connection();
    Json(serde_json::json!({
        "status": if connection.is_connected() { "healthy" } else { "degraded" },
        "component": "dsx-market-data",
        "state": format!("{:?}", connection.state()),
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        warn!(error = %e, "Failed to encode metrics");
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
