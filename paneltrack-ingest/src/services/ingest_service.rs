//! Logical operations of the ingest service
//!
//! `IngestService` is what the HTTP handlers call. Job-starting operations
//! return immediately with the job's status report; the work itself runs on
//! the orchestrator.

use chrono::Utc;
use paneltrack_common::events::{EventBus, IngestEvent, OperationKind};
use paneltrack_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::batch_processor::{self, ProcessPreview};
use super::bulk_executor::{BulkAction, BulkExecutor, BulkResponse};
use super::external_catalog::CatalogError;
use super::identification::{IdentificationTrace, MatchScope};
use super::job_context::JobContext;
use super::job_orchestrator::JobOrchestrator;
use super::scan_job::ScanJob;
use crate::config::ScoringConfigHandle;
use crate::db;
use crate::models::{
    BatchScope, CandidateItem, ImportBatch, ItemCounts, ItemFilter, ItemStatus, JobKey,
    JobStatusReport, MatchPolicy,
};

/// Request to create a batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateBatch {
    pub scope: BatchScope,
    #[serde(default)]
    pub match_policy: MatchPolicy,
}

/// Filtered items of a batch plus whole-batch counts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ItemPage {
    pub items: Vec<CandidateItem>,
    pub counts: ItemCounts,
}

#[derive(Clone)]
pub struct IngestService {
    ctx: Arc<JobContext>,
    orchestrator: JobOrchestrator,
    bulk: BulkExecutor,
    event_bus: EventBus,
    scoring: ScoringConfigHandle,
}

impl IngestService {
    pub fn new(
        ctx: Arc<JobContext>,
        orchestrator: JobOrchestrator,
        event_bus: EventBus,
        scoring: ScoringConfigHandle,
    ) -> Self {
        let bulk = BulkExecutor::new(ctx.clone(), orchestrator.clone());
        Self {
            ctx,
            orchestrator,
            bulk,
            event_bus,
            scoring,
        }
    }

    pub fn orchestrator(&self) -> &JobOrchestrator {
        &self.orchestrator
    }

    pub fn scoring(&self) -> &ScoringConfigHandle {
        &self.scoring
    }

    pub fn context(&self) -> &Arc<JobContext> {
        &self.ctx
    }

    /// Persist a new batch and submit its scan job
    pub async fn create_batch(&self, request: CreateBatch) -> Result<ImportBatch> {
        match &request.scope {
            BatchScope::RootFolders { paths } if paths.is_empty() => {
                return Err(Error::InvalidInput("At least one root folder is required".to_string()));
            }
            BatchScope::ExternalPath { path } if path.as_os_str().is_empty() => {
                return Err(Error::InvalidInput("External path is empty".to_string()));
            }
            _ => {}
        }

        let batch = ImportBatch::new(request.scope, request.match_policy);
        db::batches::insert_batch(&self.ctx.db, &batch).await?;
        tracing::info!(batch_id = %batch.id, scope = %batch.scope, "Batch created");

        self.event_bus.emit_lossy(IngestEvent::BatchCreated {
            batch_id: batch.id,
            scope: batch.scope.to_string(),
            timestamp: Utc::now(),
        });

        let task = Arc::new(ScanJob::new(self.ctx.clone(), batch.id));
        self.orchestrator
            .start(JobKey::new(batch.id, OperationKind::Scan), task)
            .await?;

        Ok(batch)
    }

    /// Run the scan job again; existing items are updated in place
    pub async fn rescan_batch(&self, batch_id: Uuid) -> Result<JobStatusReport> {
        self.get_batch(batch_id).await?;
        let task = Arc::new(ScanJob::new(self.ctx.clone(), batch_id));
        Ok(self
            .orchestrator
            .start(JobKey::new(batch_id, OperationKind::Scan), task)
            .await?)
    }

    pub async fn list_batches(&self) -> Result<Vec<ImportBatch>> {
        db::batches::list_batches(&self.ctx.db).await
    }

    pub async fn get_batch(&self, batch_id: Uuid) -> Result<ImportBatch> {
        db::batches::load_batch(&self.ctx.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))
    }

    /// Status of the job for `(batch_id, kind)`; `none` when no record exists
    pub async fn batch_status(&self, batch_id: Uuid, kind: OperationKind) -> Result<JobStatusReport> {
        self.get_batch(batch_id).await?;
        Ok(self.orchestrator.status(JobKey::new(batch_id, kind)).await)
    }

    pub async fn pause(&self, batch_id: Uuid, kind: OperationKind) -> Result<JobStatusReport> {
        Ok(self.orchestrator.pause(JobKey::new(batch_id, kind)).await?)
    }

    pub async fn resume(&self, batch_id: Uuid, kind: OperationKind) -> Result<JobStatusReport> {
        Ok(self.orchestrator.resume(JobKey::new(batch_id, kind)).await?)
    }

    pub async fn restart(&self, batch_id: Uuid, kind: OperationKind) -> Result<JobStatusReport> {
        Ok(self.orchestrator.restart(JobKey::new(batch_id, kind)).await?)
    }

    pub async fn list_items(&self, batch_id: Uuid, filter: &ItemFilter) -> Result<ItemPage> {
        self.get_batch(batch_id).await?;
        let items = db::items::list_items(&self.ctx.db, batch_id, filter).await?;
        let counts = db::items::item_counts(&self.ctx.db, batch_id).await?;
        Ok(ItemPage { items, counts })
    }

    /// Diagnostic run of the full pipeline
    ///
    /// Match results are not written back; only a freshly fetched search
    /// response is kept so the next pass can reuse it.
    pub async fn identify_item(&self, item_id: Uuid) -> Result<IdentificationTrace> {
        let item = self.load_item(item_id).await?;
        let batch = self.get_batch(item.batch_id).await?;

        let mut probe = item.clone();
        let identification = self
            .ctx
            .pipeline
            .identify(&mut probe, batch.match_policy, MatchScope::Full)
            .await;

        if probe.search_cache.is_some() && probe.search_cache != item.search_cache {
            let mut cached = item;
            cached.search_cache = probe.search_cache;
            db::items::save_item(&self.ctx.db, &cached).await?;
        }

        Ok(identification.trace)
    }

    /// Bind an operator-chosen external volume, bypassing scoring
    pub async fn match_item(&self, item_id: Uuid, volume_id: i64) -> Result<CandidateItem> {
        let mut item = self.load_item(item_id).await?;
        if item.status == ItemStatus::Processed {
            return Err(Error::InvalidInput(format!(
                "Item {} is already processed",
                item_id
            )));
        }
        self.ensure_not_processing(item.batch_id).await?;

        self.ctx
            .pipeline
            .bind_external(&mut item, volume_id)
            .await
            .map_err(|e| match e {
                CatalogError::NotConfigured => {
                    Error::Config("External catalog is not configured".to_string())
                }
                CatalogError::NotFound(what) => Error::NotFound(what),
                other => Error::Internal(other.to_string()),
            })?;

        if !db::items::save_item(&self.ctx.db, &item).await? {
            return Err(Error::NotFound(format!("Item not found: {}", item_id)));
        }
        db::batches::recompute_counters(&self.ctx.db, item.batch_id).await?;
        tracing::info!(%item_id, volume_id, "Manual external match bound");

        Ok(item)
    }

    pub async fn bulk_update(
        &self,
        batch_id: Uuid,
        item_ids: Vec<Uuid>,
        action: BulkAction,
    ) -> Result<BulkResponse> {
        self.bulk.bulk_update(batch_id, item_ids, action).await
    }

    pub async fn start_bulk_match(
        &self,
        batch_id: Uuid,
        item_ids: Vec<Uuid>,
        kind: OperationKind,
    ) -> Result<JobStatusReport> {
        self.get_batch(batch_id).await?;
        self.bulk.start_bulk_match(batch_id, item_ids, kind).await
    }

    pub async fn preview_process(&self, batch_id: Uuid) -> Result<ProcessPreview> {
        batch_processor::preview(&self.ctx, batch_id).await
    }

    pub async fn process_batch(&self, batch_id: Uuid) -> Result<JobStatusReport> {
        batch_processor::start_process(&self.ctx, &self.orchestrator, batch_id).await
    }

    /// Delete a batch and its items; refused while any of its jobs is active
    pub async fn delete_batch(&self, batch_id: Uuid) -> Result<()> {
        Ok(self.orchestrator.delete_batch(batch_id).await?)
    }

    async fn load_item(&self, item_id: Uuid) -> Result<CandidateItem> {
        db::items::load_item(&self.ctx.db, item_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Item not found: {}", item_id)))
    }

    async fn ensure_not_processing(&self, batch_id: Uuid) -> Result<()> {
        let key = JobKey::new(batch_id, OperationKind::Process);
        if self.orchestrator.status(key).await.status.is_active() {
            return Err(Error::Conflict(format!("Batch {} is being processed", batch_id)));
        }
        Ok(())
    }
}
