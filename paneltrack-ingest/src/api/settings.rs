//! Settings API
//!
//! GET/PUT /settings/scoring. A PUT validates the new configuration,
//! persists it and swaps the process-wide handle; scoring passes already
//! running keep the snapshot they started with.

use axum::{extract::State, routing::get, Json, Router};
use tracing::info;

use crate::error::ApiResult;
use crate::models::ScoringConfig;
use crate::AppState;

/// GET /settings/scoring
pub async fn get_scoring(State(state): State<AppState>) -> Json<ScoringConfig> {
    let snapshot = state.service.scoring().snapshot().await;
    Json((*snapshot).clone())
}

/// PUT /settings/scoring
///
/// **Errors:** 400 when a weight is negative, a threshold is out of range
/// or a ceiling is not positive.
pub async fn put_scoring(
    State(state): State<AppState>,
    Json(config): Json<ScoringConfig>,
) -> ApiResult<Json<ScoringConfig>> {
    state
        .service
        .scoring()
        .update(&state.db, config.clone())
        .await?;
    info!("Scoring config replaced via API");
    Ok(Json(config))
}

pub fn settings_routes() -> Router<AppState> {
    Router::new().route("/settings/scoring", get(get_scoring).put(put_scoring))
}
