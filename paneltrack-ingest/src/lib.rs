//! paneltrack-ingest library interface
//!
//! Exposes the service wiring and router so integration tests can build the
//! same application `main` serves.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod models;
pub mod services;
pub mod utils;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use paneltrack_common::events::{EventBus, IngestEvent};
use sqlx::SqlitePool;
use std::sync::Arc;
use tokio::sync::RwLock;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::config::{IngestConfig, ScoringConfigHandle};
use crate::services::{
    ExternalCatalog, FileSystem, IdentificationPipeline, IngestService, JobContext,
    JobOrchestrator, SqliteLocalCatalog,
};

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    pub service: IngestService,
    /// Whether an external catalog API key was resolved
    pub external_catalog_enabled: bool,
    pub startup_time: DateTime<Utc>,
    /// Most recent job failure, reported by /health
    pub last_error: Arc<RwLock<Option<String>>>,
}

impl AppState {
    pub fn new(
        db: SqlitePool,
        event_bus: EventBus,
        service: IngestService,
        external_catalog_enabled: bool,
    ) -> Self {
        Self {
            db,
            event_bus,
            service,
            external_catalog_enabled,
            startup_time: Utc::now(),
            last_error: Arc::new(RwLock::new(None)),
        }
    }

    /// Record every `JobFailed` message as the last error
    pub fn track_job_failures(&self) -> tokio::task::JoinHandle<()> {
        let mut rx = self.event_bus.subscribe();
        let last_error = self.last_error.clone();
        tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(IngestEvent::JobFailed { batch_id, kind, error, .. }) => {
                        *last_error.write().await =
                            Some(format!("{} job for batch {}: {}", kind, batch_id, error));
                    }
                    Ok(_) => {}
                    Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }
}

/// Collaborators the service runs against
pub struct Collaborators {
    pub external: Arc<dyn ExternalCatalog>,
    pub fs: Arc<dyn FileSystem>,
}

/// Wire the job context, orchestrator and service over one pool
pub fn build_service(
    db: SqlitePool,
    event_bus: EventBus,
    config: IngestConfig,
    scoring: ScoringConfigHandle,
    collaborators: Collaborators,
) -> IngestService {
    let local = Arc::new(SqliteLocalCatalog::new(db.clone()));
    let pipeline = Arc::new(IdentificationPipeline::new(
        local.clone(),
        collaborators.external.clone(),
        scoring.clone(),
        config.external.search_cache_ttl_secs,
    ));
    let orchestrator = JobOrchestrator::new(
        db.clone(),
        event_bus.clone(),
        config.external.max_consecutive_throttle_failures,
    );
    let ctx = Arc::new(JobContext {
        db,
        fs: collaborators.fs,
        local,
        external: collaborators.external,
        pipeline,
        config,
    });

    IngestService::new(ctx, orchestrator, event_bus, scoring)
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::batch_routes())
        .merge(api::item_routes())
        .merge(api::settings_routes())
        .merge(api::health_routes())
        .route("/events", get(api::event_stream))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
