//! Cache administration endpoints

use axum::{
    extract::State,
    http::StatusCode,
    routing::{delete, get, post},
    Json, Router,
};
use serde::Deserialize;

use crate::cache::{CacheStats, InvalidationReport, SyncReport};
use crate::error::{ApiError, ApiResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct InvalidateRequest {
    /// Exact `"{part}_{color}"` key or glob (`3001_*`)
    pub pattern: String,
}

/// GET /cache/stats
pub async fn cache_stats(State(state): State<AppState>) -> ApiResult<Json<CacheStats>> {
    Ok(Json(state.service.get_cache_stats().await?))
}

/// POST /cache/invalidate
pub async fn invalidate(
    State(state): State<AppState>,
    Json(request): Json<InvalidateRequest>,
) -> ApiResult<Json<InvalidationReport>> {
    Ok(Json(state.service.invalidate(&request.pattern).await?))
}

/// POST /cache/sync
///
/// Only one sync runs at a time; a concurrent request gets 409.
pub async fn sync(State(state): State<AppState>) -> ApiResult<Json<SyncReport>> {
    let _guard = state
        .sync_lock
        .try_lock()
        .map_err(|_| ApiError::Conflict("sync already running".to_string()))?;

    let cancel = state.shutdown.child_token();
    Ok(Json(state.service.sync(&cancel).await?))
}

/// DELETE /cache
pub async fn clear(State(state): State<AppState>) -> ApiResult<StatusCode> {
    state.service.clear_cache().await?;
    Ok(StatusCode::NO_CONTENT)
}

pub fn cache_routes() -> Router<AppState> {
    Router::new()
        .route("/cache", delete(clear))
        .route("/cache/stats", get(cache_stats))
        .route("/cache/invalidate", post(invalidate))
        .route("/cache/sync", post(sync))
}
