//! Collaborators shared by every job

use sqlx::SqlitePool;
use std::sync::Arc;
use uuid::Uuid;

use super::external_catalog::ExternalCatalog;
use super::filesystem::FileSystem;
use super::identification::IdentificationPipeline;
use super::job_orchestrator::{JobError, UnitOutcome};
use super::local_catalog::LocalCatalog;
use crate::config::IngestConfig;
use crate::db;

pub struct JobContext {
    pub db: SqlitePool,
    pub fs: Arc<dyn FileSystem>,
    pub local: Arc<dyn LocalCatalog>,
    pub external: Arc<dyn ExternalCatalog>,
    pub pipeline: Arc<IdentificationPipeline>,
    pub config: IngestConfig,
}

impl JobContext {
    /// Classify a failed item write: fatal when the batch is gone, a
    /// per-item error otherwise
    pub async fn write_failure(&self, batch_id: Uuid, err: paneltrack_common::Error) -> UnitOutcome {
        match db::batches::load_batch(&self.db, batch_id).await {
            Ok(None) => UnitOutcome::Fatal(JobError::BatchDeleted(batch_id)),
            Ok(Some(_)) => UnitOutcome::item_error(format!("could not save item: {}", err)),
            Err(e) => UnitOutcome::Fatal(JobError::from(e)),
        }
    }

    /// Fatal error when the batch no longer exists
    pub async fn require_batch(&self, batch_id: Uuid) -> Result<crate::models::ImportBatch, JobError> {
        db::batches::load_batch(&self.db, batch_id)
            .await?
            .ok_or(JobError::BatchDeleted(batch_id))
    }
}
