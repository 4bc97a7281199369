//! partcheck-engine: closed-world part matching with a hybrid feature cache
//!
//! Given a kit's bill of materials and the objects a detector found, the
//! engine decides which expected parts are present, which are missing and
//! which need human review.

pub mod api;
pub mod cache;
pub mod catalog;
pub mod config;
pub mod confusion;
pub mod db;
pub mod error;
pub mod matcher;
pub mod orientation;
pub mod service;
pub mod similarity;
pub mod tiers;
pub mod types;
pub mod voting;

pub use crate::error::{ApiError, ApiResult};
pub use crate::service::{MatchingService, ServiceError};

use axum::Router;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tower_http::trace::TraceLayer;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub service: Arc<MatchingService>,
    /// Cancelled on shutdown; request work runs on child tokens
    pub shutdown: CancellationToken,
    /// Serializes cache syncs
    pub sync_lock: Arc<Mutex<()>>,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(service: Arc<MatchingService>) -> Self {
        Self {
            service,
            shutdown: CancellationToken::new(),
            sync_lock: Arc::new(Mutex::new(())),
            startup_time: Utc::now(),
        }
    }

    /// Run a cache sync once no other sync holds the lock
    ///
    /// Unlike the HTTP handler this waits for a running sync instead of
    /// refusing.
    pub async fn sync_exclusive(&self) -> Result<cache::SyncReport, ServiceError> {
        let _guard = self.sync_lock.lock().await;
        let cancel = self.shutdown.child_token();
        self.service.sync(&cancel).await
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .merge(api::health_routes())
        .merge(api::matching_routes())
        .merge(api::cache_routes())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
