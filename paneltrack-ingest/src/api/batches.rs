//! Batch API handlers
//!
//! Batch lifecycle, job status/control and processing. Job-starting routes
//! answer 202 with the job's status report; the client polls
//! `GET /batches/:id/jobs/:kind` (or listens on `/events`) from there.

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use paneltrack_common::events::OperationKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::ApiResult;
use crate::models::{ImportBatch, JobStatusReport};
use crate::services::{CreateBatch, ProcessPreview};
use crate::AppState;

/// POST /batches/:id/match request
#[derive(Debug, Deserialize)]
pub struct StartMatchRequest {
    pub item_ids: Vec<Uuid>,
    pub kind: OperationKind,
}

/// GET /batches response
#[derive(Debug, Serialize, Deserialize)]
pub struct BatchListResponse {
    pub batches: Vec<ImportBatch>,
}

fn parse_kind(kind: &str) -> ApiResult<OperationKind> {
    Ok(kind.parse::<OperationKind>()?)
}

/// POST /batches
///
/// Creates the batch and submits its scan job.
pub async fn create_batch(
    State(state): State<AppState>,
    Json(request): Json<CreateBatch>,
) -> ApiResult<(StatusCode, Json<ImportBatch>)> {
    let batch = state.service.create_batch(request).await?;
    Ok((StatusCode::CREATED, Json(batch)))
}

/// GET /batches
pub async fn list_batches(State(state): State<AppState>) -> ApiResult<Json<BatchListResponse>> {
    let batches = state.service.list_batches().await?;
    Ok(Json(BatchListResponse { batches }))
}

/// GET /batches/:id
pub async fn get_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<ImportBatch>> {
    Ok(Json(state.service.get_batch(batch_id).await?))
}

/// DELETE /batches/:id
///
/// 409 while any job of the batch is queued, running or paused.
pub async fn delete_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<StatusCode> {
    state.service.delete_batch(batch_id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// GET /batches/:id/jobs/:kind
///
/// Stateless read of the job record; status `none` when there is no record.
pub async fn job_status(
    State(state): State<AppState>,
    Path((batch_id, kind)): Path<(Uuid, String)>,
) -> ApiResult<Json<JobStatusReport>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.service.batch_status(batch_id, kind).await?))
}

/// POST /batches/:id/jobs/:kind/pause
pub async fn pause_job(
    State(state): State<AppState>,
    Path((batch_id, kind)): Path<(Uuid, String)>,
) -> ApiResult<Json<JobStatusReport>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.service.pause(batch_id, kind).await?))
}

/// POST /batches/:id/jobs/:kind/resume
pub async fn resume_job(
    State(state): State<AppState>,
    Path((batch_id, kind)): Path<(Uuid, String)>,
) -> ApiResult<Json<JobStatusReport>> {
    let kind = parse_kind(&kind)?;
    Ok(Json(state.service.resume(batch_id, kind).await?))
}

/// POST /batches/:id/jobs/:kind/restart
///
/// Progress starts again from `(0, n)`.
pub async fn restart_job(
    State(state): State<AppState>,
    Path((batch_id, kind)): Path<(Uuid, String)>,
) -> ApiResult<(StatusCode, Json<JobStatusReport>)> {
    let kind = parse_kind(&kind)?;
    let report = state.service.restart(batch_id, kind).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// POST /batches/:id/scan
///
/// Rescans the batch scope; items already discovered are updated, not duplicated.
pub async fn rescan_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobStatusReport>)> {
    let report = state.service.rescan_batch(batch_id).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// POST /batches/:id/match
pub async fn start_match(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
    Json(request): Json<StartMatchRequest>,
) -> ApiResult<(StatusCode, Json<JobStatusReport>)> {
    let report = state
        .service
        .start_bulk_match(batch_id, request.item_ids, request.kind)
        .await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

/// GET /batches/:id/process/preview
///
/// Side-effect free; the UI shows it before the user confirms processing.
pub async fn preview_process(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<Json<ProcessPreview>> {
    Ok(Json(state.service.preview_process(batch_id).await?))
}

/// POST /batches/:id/process
///
/// 400 when the batch has nothing queued for import.
pub async fn process_batch(
    State(state): State<AppState>,
    Path(batch_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<JobStatusReport>)> {
    let report = state.service.process_batch(batch_id).await?;
    Ok((StatusCode::ACCEPTED, Json(report)))
}

pub fn batch_routes() -> Router<AppState> {
    Router::new()
        .route("/batches", post(create_batch).get(list_batches))
        .route("/batches/:id", get(get_batch).delete(delete_batch))
        .route("/batches/:id/jobs/:kind", get(job_status))
        .route("/batches/:id/jobs/:kind/pause", post(pause_job))
        .route("/batches/:id/jobs/:kind/resume", post(resume_job))
        .route("/batches/:id/jobs/:kind/restart", post(restart_job))
        .route("/batches/:id/scan", post(rescan_batch))
        .route("/batches/:id/match", post(start_match))
        .route("/batches/:id/process/preview", get(preview_process))
        .route("/batches/:id/process", post(process_batch))
}
