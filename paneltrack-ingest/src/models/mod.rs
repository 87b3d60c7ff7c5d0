//! Data models for paneltrack-ingest
//!
//! - `ImportBatch`: persisted job container with aggregate counters
//! - `CandidateItem`: one file or release awaiting identification
//! - `JobRecord`: runtime-only state of one background operation
//! - `ScoringConfig` / `MatchCandidate`: scoring inputs and outputs

pub mod candidate_item;
pub mod catalog;
pub mod import_batch;
pub mod job_record;
pub mod scoring;

pub use candidate_item::{
    CandidateItem, ExternalMatch, ExtractedMetadata, ItemCounts, ItemFilter, ItemStatus,
    LocalMatch, MatchPresence, SearchCache, RELEASE_SOURCE_PREFIX,
};
pub use catalog::{ExternalHit, ExternalQuery, ExternalRelease, LocalIssue, LocalSeries};
pub use import_batch::{BatchCounters, BatchScope, BatchStatus, ImportBatch, MatchPolicy, TransferMode};
pub use job_record::{JobKey, JobProgress, JobRecord, JobStatus, JobStatusReport};
pub use scoring::{
    Classification, CriterionScores, MatchCandidate, ScoringConfig, ScoringOutcome, SeriesMatch,
};
