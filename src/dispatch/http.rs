//! Health/metrics HTTP endpoint for each process.
//!
//! Loopback-only axum server exposing:
//!   GET /health   — JSON status + counter snapshot
//!   GET /metrics  — Prometheus text format

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use tracing::info;

use super::SharedCounters;

#[derive(Clone)]
struct HealthState {
    counters: SharedCounters,
    service: &'static str,
}

pub async fn start_health_server(
    counters: SharedCounters,
    service: &'static str,
    port: u16,
) -> Result<()> {
    let addr: SocketAddr = format!("127.0.0.1:{port}").parse()?;
    let state = Arc::new(HealthState { counters, service });

    let router = Router::new()
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .with_state(state);

    info!("health endpoint listening on http://{addr}");
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router).await?;
    Ok(())
}

async fn health(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    let snapshot = state.counters.snapshot();
    Json(serde_json::json!({
        "status": "healthy",
        "service": state.service,
        "uptime_secs": snapshot.uptime_secs,
        "events_processed": snapshot.processed,
        "events_failed": snapshot.failed,
    }))
}

async fn metrics(State(state): State<Arc<HealthState>>) -> impl IntoResponse {
    state.counters.render_prometheus(state.service)
}
