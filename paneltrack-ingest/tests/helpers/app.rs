//! In-memory application builder

use paneltrack_common::config::{ExternalConfig, JobsConfig};
use paneltrack_common::events::{EventBus, IngestEvent, OperationKind};
use paneltrack_ingest::config::{IngestConfig, ScoringConfigHandle};
use paneltrack_ingest::models::{
    BatchScope, BatchStatus, CandidateItem, ExtractedMetadata, ImportBatch, JobKey,
    JobStatusReport, MatchPolicy, ScoringConfig,
};
use paneltrack_ingest::services::IngestService;
use paneltrack_ingest::{build_router, build_service, AppState, Collaborators};
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use uuid::Uuid;

use super::catalog::FakeCatalog;
use super::filesystem::MemoryFileSystem;

pub const LIBRARY_ROOT: &str = "/library";

pub struct TestApp {
    pub pool: SqlitePool,
    pub event_bus: EventBus,
    pub service: IngestService,
    pub catalog: Arc<FakeCatalog>,
    pub fs: Arc<MemoryFileSystem>,
}

impl TestApp {
    pub async fn new(catalog: FakeCatalog, fs: MemoryFileSystem) -> Self {
        Self::with_scoring(catalog, fs, ScoringConfig::default()).await
    }

    pub async fn with_scoring(
        catalog: FakeCatalog,
        fs: MemoryFileSystem,
        scoring: ScoringConfig,
    ) -> Self {
        let pool = paneltrack_ingest::db::init_memory_pool().await.unwrap();
        let event_bus = EventBus::new(1024);
        let catalog = Arc::new(catalog);
        let fs = Arc::new(fs);

        let config = IngestConfig {
            library_root: PathBuf::from(LIBRARY_ROOT),
            external: ExternalConfig::default(),
            jobs: JobsConfig {
                async_bulk_threshold: 10,
            },
        };
        let service = build_service(
            pool.clone(),
            event_bus.clone(),
            config,
            ScoringConfigHandle::new(scoring),
            Collaborators {
                external: catalog.clone(),
                fs: fs.clone(),
            },
        );

        Self {
            pool,
            event_bus,
            service,
            catalog,
            fs,
        }
    }

    pub fn router(&self) -> axum::Router {
        let state = AppState::new(
            self.pool.clone(),
            self.event_bus.clone(),
            self.service.clone(),
            true,
        );
        build_router(state)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IngestEvent> {
        self.event_bus.subscribe()
    }

    /// Persist an idle batch without running its scan
    pub async fn insert_batch(&self, scope: BatchScope) -> ImportBatch {
        let mut batch = ImportBatch::new(scope, MatchPolicy::PreferLocal);
        batch.status = BatchStatus::Ready;
        paneltrack_ingest::db::batches::insert_batch(&self.pool, &batch)
            .await
            .unwrap();
        batch
    }

    pub async fn insert_item(
        &self,
        batch_id: Uuid,
        source: &str,
        series: &str,
        issue: Option<&str>,
        year: Option<i32>,
    ) -> CandidateItem {
        let mut item = CandidateItem::new(batch_id, source.to_string());
        item.extension = Some("cbz".to_string());
        item.metadata = ExtractedMetadata {
            series_name: Some(series.to_string()),
            issue_number: issue.map(str::to_string),
            year,
            ..Default::default()
        };
        self.save(&item).await;
        item
    }

    pub async fn save(&self, item: &CandidateItem) {
        let position = paneltrack_ingest::db::items::list_item_ids(&self.pool, item.batch_id)
            .await
            .unwrap()
            .len() as i64;
        paneltrack_ingest::db::items::upsert_item(&self.pool, item, position)
            .await
            .unwrap();
    }

    pub async fn item(&self, id: Uuid) -> CandidateItem {
        paneltrack_ingest::db::items::load_item(&self.pool, id)
            .await
            .unwrap()
            .unwrap()
    }

    pub async fn items(&self, batch_id: Uuid) -> Vec<CandidateItem> {
        paneltrack_ingest::db::items::list_items(&self.pool, batch_id, &Default::default())
            .await
            .unwrap()
    }

    pub async fn batch(&self, batch_id: Uuid) -> ImportBatch {
        self.service.get_batch(batch_id).await.unwrap()
    }

    pub async fn join(&self, batch_id: Uuid, kind: OperationKind) {
        let key = JobKey::new(batch_id, kind);
        tokio::time::timeout(Duration::from_secs(10), self.service.orchestrator().join(key))
            .await
            .expect("job did not finish in time");
    }

    /// Poll the job status until `predicate` holds
    pub async fn wait_for(
        &self,
        batch_id: Uuid,
        kind: OperationKind,
        predicate: impl Fn(&JobStatusReport) -> bool,
    ) -> JobStatusReport {
        let key = JobKey::new(batch_id, kind);
        let deadline = tokio::time::Instant::now() + Duration::from_secs(10);
        loop {
            let report = self.service.orchestrator().status(key).await;
            if predicate(&report) {
                return report;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "timed out waiting, last status {:?}",
                report
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

/// Every event already queued on `rx`
pub fn drain(rx: &mut broadcast::Receiver<IngestEvent>) -> Vec<IngestEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}
