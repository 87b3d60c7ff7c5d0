//! Service modules for the comic import workflow
//!
//! - Scan Collector (`scan_job`) over the `filesystem` collaborator
//! - Identification Pipeline over `local_catalog` and `external_catalog`
//! - Scoring Engine (`scoring_engine`)
//! - Job Orchestrator, Bulk Operation Executor, Batch Processor
//! - `ingest_service`: the logical operations wrapped by the HTTP layer

pub mod batch_processor;
pub mod bulk_executor;
pub mod external_catalog;
pub mod file_scanner;
pub mod filename_parser;
pub mod filesystem;
pub mod identification;
pub mod ingest_service;
pub mod job_context;
pub mod job_orchestrator;
pub mod local_catalog;
pub mod scan_job;
pub mod scoring_engine;

pub use batch_processor::{ProcessError, ProcessJob, ProcessPreview};
pub use bulk_executor::{BulkAction, BulkExecutor, BulkOutcome, BulkResponse, MatchJob};
pub use external_catalog::{
    CatalogError, ComicVineClient, DisabledCatalog, ExternalCatalog, RequestScheduler,
};
pub use file_scanner::{ArchiveFormat, FileProbe, FileScanner, ScanEntry, ScanError};
pub use filesystem::{FileSystem, LocalFileSystem};
pub use identification::{
    IdentificationPipeline, IdentificationStep, IdentificationTrace, MatchScope, StepResult,
};
pub use ingest_service::{CreateBatch, IngestService, ItemPage};
pub use job_context::JobContext;
pub use job_orchestrator::{
    JobError, JobOrchestrator, JobTask, OrchestratorError, PlanProgress, UnitOutcome,
};
pub use local_catalog::{LocalCatalog, SqliteLocalCatalog};
pub use scan_job::ScanJob;
