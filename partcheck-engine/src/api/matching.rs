//! Matching endpoints

use axum::{
    body::Bytes,
    extract::{Path, State},
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use tracing::info;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::types::{BomLine, Detection, MatchResult};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct MatchRequest {
    pub bom: Vec<BomLine>,
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Deserialize)]
pub struct SetMatchRequest {
    #[serde(default)]
    pub detections: Vec<Detection>,
}

#[derive(Debug, Serialize)]
pub struct MatchSummary {
    pub total_slots: usize,
    pub matched: usize,
    pub missing: usize,
    pub hold: usize,
    pub unmatched_detections: usize,
}

#[derive(Debug, Serialize)]
pub struct MatchResponse {
    /// Correlates the response with server logs
    pub pass_id: Uuid,
    pub summary: MatchSummary,
    #[serde(flatten)]
    pub result: MatchResult,
}

impl MatchResponse {
    fn new(pass_id: Uuid, result: MatchResult) -> Self {
        let summary = MatchSummary {
            total_slots: result.total_slots(),
            matched: result.matches.len(),
            missing: result.missing.len(),
            hold: result.hold.len(),
            unmatched_detections: result.unmatched_detections.len(),
        };
        Self {
            pass_id,
            summary,
            result,
        }
    }
}

/// Detection ids must be present and unique within one pass
fn validate_detections(detections: &[Detection]) -> ApiResult<()> {
    let mut seen = HashSet::with_capacity(detections.len());
    for (index, detection) in detections.iter().enumerate() {
        if detection.id.trim().is_empty() {
            return Err(ApiError::BadRequest(format!("detection {} has an empty id", index)));
        }
        if !seen.insert(detection.id.as_str()) {
            return Err(ApiError::BadRequest(format!(
                "duplicate detection id '{}'",
                detection.id
            )));
        }
    }
    Ok(())
}

/// POST /match
///
/// Match detections against an inline BOM.
pub async fn match_bom(
    State(state): State<AppState>,
    Json(request): Json<MatchRequest>,
) -> ApiResult<Json<MatchResponse>> {
    validate_detections(&request.detections)?;

    let pass_id = Uuid::new_v4();
    info!(%pass_id, bom_lines = request.bom.len(), detections = request.detections.len(), "Match request");

    let cancel = state.shutdown.child_token();
    let result = state
        .service
        .run_matching_pass(&request.detections, &request.bom, &cancel)
        .await?;
    Ok(Json(MatchResponse::new(pass_id, result)))
}

/// POST /sets/:set_id/match
pub async fn match_set(
    State(state): State<AppState>,
    Path(set_id): Path<String>,
    Json(request): Json<SetMatchRequest>,
) -> ApiResult<Json<MatchResponse>> {
    validate_detections(&request.detections)?;

    let pass_id = Uuid::new_v4();
    info!(%pass_id, set_id = %set_id, detections = request.detections.len(), "Set match request");

    let cancel = state.shutdown.child_token();
    let result = state
        .service
        .match_set(&set_id, &request.detections, &cancel)
        .await?;
    Ok(Json(MatchResponse::new(pass_id, result)))
}

/// POST /sets/:set_id/recognize
///
/// Body is the raw image passed to the configured detector.
pub async fn recognize_set(
    State(state): State<AppState>,
    Path(set_id): Path<String>,
    image: Bytes,
) -> ApiResult<Json<MatchResponse>> {
    if image.is_empty() {
        return Err(ApiError::BadRequest("empty image body".to_string()));
    }

    let pass_id = Uuid::new_v4();
    info!(%pass_id, set_id = %set_id, image_bytes = image.len(), "Recognition request");

    let cancel = state.shutdown.child_token();
    let result = state.service.recognize(&set_id, &image, &cancel).await?;
    Ok(Json(MatchResponse::new(pass_id, result)))
}

pub fn matching_routes() -> Router<AppState> {
    Router::new()
        .route("/match", post(match_bom))
        .route("/sets/:set_id/match", post(match_set))
        .route("/sets/:set_id/recognize", post(recognize_set))
}
