//! Candidate item API handlers

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use uuid::Uuid;

use crate::error::{ApiError, ApiResult};
use crate::models::{CandidateItem, ItemFilter, ItemStatus, MatchPresence};
use crate::services::{BulkAction, BulkResponse, IdentificationTrace, ItemPage};
use crate::AppState;

/// GET /batches/:id/items query
///
/// `status` and `match` take comma-separated values, e.g.
/// `?status=pending,queued&match=none&q=saga`.
#[derive(Debug, Default, Deserialize)]
pub struct ItemListQuery {
    pub status: Option<String>,
    #[serde(rename = "match")]
    pub match_presence: Option<String>,
    pub q: Option<String>,
}

impl ItemListQuery {
    pub fn into_filter(self) -> ApiResult<ItemFilter> {
        Ok(ItemFilter {
            statuses: parse_list(self.status.as_deref(), "status", ItemStatus::parse)?,
            matches: parse_list(self.match_presence.as_deref(), "match", MatchPresence::parse)?,
            search: self.q,
        })
    }
}

fn parse_list<T>(raw: Option<&str>, field: &str, parse: fn(&str) -> Option<T>) -> ApiResult<Vec<T>> {
    let Some(raw) = raw else {
        return Ok(Vec::new());
    };
    raw.split(',')
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(|value| {
            parse(value).ok_or_else(|| ApiError::BadRequest(format!("Unknown {}: {}", field, value)))
        })
        .collect()
}

/// POST /batches/:id/items/bulk request
#[derive(Debug, Deserialize)]
pub struct BulkUpdateRequest {
    pub item_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub action: BulkAction,
}

/// POST /items/:id/match request
#[derive(Debug, Deserialize)]
pub struct ManualMatchRequest {
    /// External catalog volume id
    pub volume_id: i64,
}

/// GET /batches/:id/items
pub async fn list_items(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Query(query): Query<ItemListQuery>,
) -> ApiResult<Json<ItemPage>> {
    let filter = query.into_filter()?;
    Ok(Json(state.service.list_items(batch_id, &filter).await?))
}

/// POST /batches/:id/items/bulk
///
/// Edits and small match sets answer 200 with `{attempted, succeeded, failed}`;
/// a match set above the async threshold answers 202 with a job report.
pub async fn bulk_update(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<BulkUpdateRequest>,
) -> ApiResult<(StatusCode, Json<BulkResponse>)> {
    let response = state
        .service
        .bulk_update(batch_id, request.item_ids, request.action)
        .await?;
    let status = match response {
        BulkResponse::Job(_) => StatusCode::ACCEPTED,
        BulkResponse::Completed(_) => StatusCode::OK,
    };
    Ok((status, Json(response)))
}

/// GET /items/:id/identify
///
/// Step-by-step trace explaining why the item did or did not match.
pub async fn identify_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
) -> ApiResult<Json<IdentificationTrace>> {
    Ok(Json(state.service.identify_item(item_id).await?))
}

/// POST /items/:id/match
pub async fn match_item(
    State(state): State<AppState>,
    Path(item_id): Path<Uuid>,
    Json(request): Json<ManualMatchRequest>,
) -> ApiResult<Json<CandidateItem>> {
    Ok(Json(state.service.match_item(item_id, request.volume_id).await?))
}

pub fn item_routes() -> Router<AppState> {
    Router::new()
        .route("/batches/:id/items", get(list_items))
        .route("/batches/:id/items/bulk", post(bulk_update))
        .route("/items/:id/identify", get(identify_item))
        .route("/items/:id/match", post(match_item))
}
