//! Scan Collector job
//!
//! Plans the batch's discoveries (files under its folders, or the releases
//! of its week) and turns each into a candidate item. Rescans upsert on
//! `(batch_id, source)`, so running the job again never duplicates items.

use async_trait::async_trait;
use chrono::Duration;
use paneltrack_common::text::normalize_issue_number;
use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::external_catalog::CatalogError;
use super::file_scanner::{ScanEntry, ScanError};
use super::filename_parser::{extension_of, parse_filename};
use super::identification::EXTRACTION_FAILED_NOTE;
use super::job_context::JobContext;
use super::job_orchestrator::{JobError, JobTask, PlanProgress, UnitOutcome};
use crate::db;
use crate::models::{
    BatchScope, CandidateItem, ExternalMatch, ExternalRelease, ItemStatus, LocalMatch,
    RELEASE_SOURCE_PREFIX,
};

pub const ALREADY_IN_LIBRARY_NOTE: &str = "already in library";

/// One planned discovery
#[derive(Debug, Clone)]
enum ScanUnit {
    File(ScanEntry),
    Release(ExternalRelease),
}

pub struct ScanJob {
    ctx: Arc<JobContext>,
    batch_id: Uuid,
    units: Mutex<Vec<ScanUnit>>,
}

impl ScanJob {
    pub fn new(ctx: Arc<JobContext>, batch_id: Uuid) -> Self {
        Self {
            ctx,
            batch_id,
            units: Mutex::new(Vec::new()),
        }
    }

    async fn enumerate_roots(
        &self,
        roots: &[PathBuf],
        discovered: &PlanProgress,
    ) -> Result<Vec<ScanUnit>, JobError> {
        let mut seen = HashSet::new();
        let mut units = Vec::new();

        for root in roots {
            let entries = self.ctx.fs.enumerate(root).await.map_err(|e| match e {
                ScanError::PathNotFound(path) | ScanError::NotADirectory(path) => {
                    JobError::ScopeMissing(path.display().to_string())
                }
                ScanError::FileAccess(path, msg) => {
                    JobError::ScopeMissing(format!("{}: {}", path.display(), msg))
                }
            })?;

            units.extend(
                entries
                    .into_iter()
                    .filter(|entry| seen.insert(entry.path.clone()))
                    .map(ScanUnit::File),
            );
            discovered.discovered(units.len()).await;
        }

        Ok(units)
    }

    async fn list_releases(&self, week_start: chrono::NaiveDate) -> Result<Vec<ScanUnit>, JobError> {
        let week_end = week_start + Duration::days(6);
        let releases = self
            .ctx
            .external
            .releases(week_start, week_end)
            .await
            .map_err(|e| match e {
                CatalogError::NotConfigured => JobError::CatalogDisabled,
                CatalogError::Throttled { attempts } => JobError::PersistentThrottling(attempts),
                other => JobError::Catalog(other.to_string()),
            })?;

        Ok(releases.into_iter().map(ScanUnit::Release).collect())
    }

    async fn scan_file(&self, entry: &ScanEntry) -> (CandidateItem, Option<String>) {
        let source = entry.path.display().to_string();
        let mut item = CandidateItem::new(self.batch_id, source.clone());
        item.extension = extension_of(&entry.path);

        if let Some(walk_error) = &entry.error {
            return unreadable(item, walk_error);
        }

        let probe = match self.ctx.fs.probe(&entry.path).await {
            Ok(probe) => probe,
            Err(e) => return unreadable(item, &e.to_string()),
        };

        item.file_size = Some(probe.size as i64);
        match (probe.format, item.extension.as_deref()) {
            (Some(format), Some(ext)) if !format.matches_extension(ext) => {
                item.add_note(format!("content looks like {:?}, not .{}", format, ext));
            }
            (None, _) => item.add_note("unrecognized archive format"),
            _ => {}
        }

        item.metadata = parse_filename(&entry.path);
        if !item.metadata.is_extracted() {
            item.add_note(EXTRACTION_FAILED_NOTE);
        }

        match self.ctx.local.find_issue_by_path(&source).await {
            Ok(Some(issue)) => {
                item.status = ItemStatus::Skipped;
                item.add_note(ALREADY_IN_LIBRARY_NOTE);
                if let Ok(Some(series)) = self.ctx.local.series(issue.series_id).await {
                    item.local_match = Some(LocalMatch {
                        series_id: series.id,
                        series_name: series.name,
                        issue_id: Some(issue.id),
                        publisher: series.publisher,
                    });
                }
            }
            Ok(None) => {}
            Err(e) => {
                tracing::warn!(path = %source, error = %e, "Library check failed");
            }
        }

        (item, None)
    }

    async fn scan_release(&self, release: &ExternalRelease) -> CandidateItem {
        let mut item = CandidateItem::new(
            self.batch_id,
            format!("{}{}", RELEASE_SOURCE_PREFIX, release.issue_id),
        );
        item.metadata.series_name = Some(release.volume_name.clone());
        item.metadata.issue_number = release.issue_number.as_deref().and_then(normalize_issue_number);
        item.metadata.year = release.start_year;
        item.metadata.publisher = release.publisher.clone();
        item.external_match = Some(ExternalMatch {
            volume_id: release.volume_id,
            volume_name: release.volume_name.clone(),
            start_year: release.start_year,
            publisher: release.publisher.clone(),
            issue_id: Some(release.issue_id),
            issue_number: release.issue_number.clone(),
            confidence: 1.0,
            manual: false,
        });
        if let Some(date) = release.store_date {
            item.add_note(format!("on sale {}", date));
        }

        if let Ok(Some(series)) = self.ctx.local.series_by_external_id(release.volume_id).await {
            let issue = match item.metadata.issue_number.as_deref() {
                Some(number) => self.ctx.local.find_issue(series.id, number).await.ok().flatten(),
                None => None,
            };
            if issue.is_some() {
                item.status = ItemStatus::Skipped;
                item.add_note(ALREADY_IN_LIBRARY_NOTE);
            }
            item.local_match = Some(LocalMatch {
                series_id: series.id,
                series_name: series.name,
                issue_id: issue.map(|i| i.id),
                publisher: series.publisher,
            });
        }

        item
    }
}

fn unreadable(mut item: CandidateItem, reason: &str) -> (CandidateItem, Option<String>) {
    let message = format!("unreadable file: {}", reason);
    item.add_note(EXTRACTION_FAILED_NOTE);
    item.add_note(message.clone());
    item.set_error(message.clone());
    (item, Some(message))
}

#[async_trait]
impl JobTask for ScanJob {
    async fn plan(&self, discovered: &PlanProgress) -> Result<usize, JobError> {
        let batch = self.ctx.require_batch(self.batch_id).await?;

        let units = match &batch.scope {
            BatchScope::RootFolders { paths } => self.enumerate_roots(paths, discovered).await?,
            BatchScope::ExternalPath { path } => {
                self.enumerate_roots(std::slice::from_ref(path), discovered).await?
            }
            BatchScope::ReleaseWeek { week_start } => self.list_releases(*week_start).await?,
        };

        tracing::info!(batch_id = %self.batch_id, scope = %batch.scope, found = units.len(), "Scan planned");

        let total = units.len();
        *self.units.lock().await = units;
        Ok(total)
    }

    async fn run_unit(&self, index: usize) -> UnitOutcome {
        let Some(unit) = self.units.lock().await.get(index).cloned() else {
            return UnitOutcome::item_error(format!("scan unit {} out of range", index));
        };

        let (item, item_error) = match &unit {
            ScanUnit::File(entry) => self.scan_file(entry).await,
            ScanUnit::Release(release) => (self.scan_release(release).await, None),
        };

        if let Err(e) = db::items::upsert_item(&self.ctx.db, &item, index as i64).await {
            return self.ctx.write_failure(self.batch_id, e).await;
        }

        match item_error {
            Some(message) => UnitOutcome::item_error(format!("{}: {}", item.source, message)),
            None => UnitOutcome::Done,
        }
    }
}
