//! Read-only admin dashboard
//!
//! Small axum app exposing live stats of the scan loop, the cache, and the
//! monitor table. Strictly a viewer; nothing here mutates state.

use crate::cache::{CacheStats, CatalogCache};
use crate::engine::{EngineStats, ScanEngine};
use crate::error::Result;
use crate::storage::Database;
use crate::types::Monitor;
use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::info;

/// Shared state for dashboard handlers
pub struct DashboardState {
    pub db: Arc<Database>,
    pub cache: Arc<CatalogCache>,
    pub engine: Arc<ScanEngine>,
    pub started_at: DateTime<Utc>,
}

#[derive(Debug, Serialize)]
struct StatsResponse {
    uptime_secs: i64,
    engine: EngineStats,
    cache: CacheStats,
    monitors_by_status: Vec<StatusCount>,
    credentials: i64,
}

#[derive(Debug, Serialize)]
struct StatusCount {
    status: String,
    count: i64,
}

pub fn router(state: Arc<DashboardState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/monitors", get(monitors))
        .with_state(state)
}

/// Bind and serve the dashboard until the process exits.
pub async fn serve(state: Arc<DashboardState>, bind_addr: &str) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(bind_addr).await?;
    info!("Dashboard listening on {}", bind_addr);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health() -> &'static str {
    "ok"
}

async fn stats(
    State(state): State<Arc<DashboardState>>,
) -> std::result::Result<Json<StatsResponse>, StatusCode> {
    let monitors_by_status = state
        .db
        .count_monitors_by_status()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?
        .into_iter()
        .map(|(status, count)| StatusCount { status, count })
        .collect();

    let credentials = state
        .db
        .count_credentials()
        .await
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)?;

    Ok(Json(StatsResponse {
        uptime_secs: (Utc::now() - state.started_at).num_seconds(),
        engine: state.engine.stats(),
        cache: state.cache.stats().await,
        monitors_by_status,
        credentials,
    }))
}

async fn monitors(
    State(state): State<Arc<DashboardState>>,
) -> std::result::Result<Json<Vec<Monitor>>, StatusCode> {
    state
        .db
        .all_monitors()
        .await
        .map(Json)
        .map_err(|_| StatusCode::INTERNAL_SERVER_ERROR)
}
