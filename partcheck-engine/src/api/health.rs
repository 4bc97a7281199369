//! Health check endpoint

use axum::{extract::State, routing::get, Json, Router};
use chrono::Utc;
use serde::Serialize;

use crate::cache::SyncStatus;
use crate::AppState;

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    /// "ok", or "degraded" when the last sync failed
    pub status: String,
    pub module: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub sync_status: SyncStatus,
}

/// GET /health
pub async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = Utc::now().signed_duration_since(state.startup_time);
    let sync_status = state.service.cache().sync_status().await;

    let status = match sync_status {
        SyncStatus::Failed => "degraded",
        _ => "ok",
    };

    Json(HealthResponse {
        status: status.to_string(),
        module: crate::config::MODULE_NAME.to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        uptime_seconds: uptime.num_seconds().max(0) as u64,
        sync_status,
    })
}

pub fn health_routes() -> Router<AppState> {
    Router::new().route("/health", get(health_check))
}
