//! Server-Sent Events for job lifecycle and progress

use axum::{
    extract::{Query, State},
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use serde::Deserialize;
use std::convert::Infallible;
use uuid::Uuid;

use crate::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct EventStreamQuery {
    /// Only forward events of this batch
    pub batch_id: Option<Uuid>,
}

/// GET /events
///
/// Streams BatchCreated, JobStarted, JobProgress, JobPaused, JobResumed,
/// JobCompleted, JobFailed and BatchDeleted. Polling the job status stays
/// authoritative; this stream is a convenience for push clients.
pub async fn event_stream(
    State(state): State<AppState>,
    Query(query): Query<EventStreamQuery>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    paneltrack_common::sse::event_sse_stream(&state.event_bus, "paneltrack-ingest", query.batch_id)
}
