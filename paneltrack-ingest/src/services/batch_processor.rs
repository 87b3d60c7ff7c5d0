//! Batch processor
//!
//! Commits queued items into the local catalog: resolves (or creates) the
//! target series, moves or links the file into the series folder according
//! to the batch's transfer mode, and registers the issue. `preview` is the
//! same resolution without any write.

use async_trait::async_trait;
use paneltrack_common::events::OperationKind;
use paneltrack_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::job_context::JobContext;
use super::job_orchestrator::{JobError, JobOrchestrator, JobTask, PlanProgress, UnitOutcome};
use crate::db;
use crate::db::catalog::NewSeries;
use crate::models::{
    BatchStatus, CandidateItem, ImportBatch, ItemStatus, JobKey, JobStatusReport, LocalMatch,
    LocalSeries, TransferMode,
};

/// Per-item processing failures
#[derive(Debug, Error)]
pub enum ProcessError {
    #[error("item has no local or external match")]
    Unmatched,

    #[error("item has no issue number")]
    NoIssueNumber,

    #[error("matched series {0} no longer exists")]
    SeriesMissing(i64),

    #[error("issue {number} already in library at {path}")]
    DuplicateIssue { number: String, path: String },

    #[error("could not {action} {from} to {to}: {source}")]
    Transfer {
        action: &'static str,
        from: String,
        to: String,
        source: std::io::Error,
    },

    #[error(transparent)]
    Storage(#[from] paneltrack_common::Error),
}

/// What `process_batch` would do, computed without side effects
///
/// `volumes_to_create` and `existing_volumes` count queued items by whether
/// their series is new or already in the catalog, so together they equal
/// `total_files`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessPreview {
    pub total_files: usize,
    pub volumes_to_create: usize,
    pub existing_volumes: usize,
    pub files_to_move: usize,
    pub files_to_link: usize,
    /// Distinct names of the series that would be created
    pub new_volume_names: Vec<String>,
    /// Queued items that cannot be processed as they stand
    pub unmatched: usize,
}

/// Where an item's issue will be registered
enum SeriesTarget {
    Existing(LocalSeries),
    New(NewSeries),
}

/// Resolve the series for a matched item without writing anything
async fn resolve_target(
    ctx: &JobContext,
    item: &CandidateItem,
) -> std::result::Result<SeriesTarget, ProcessError> {
    if let Some(local) = &item.local_match {
        return ctx
            .local
            .series(local.series_id)
            .await?
            .map(SeriesTarget::Existing)
            .ok_or(ProcessError::SeriesMissing(local.series_id));
    }

    let external = item.external_match.as_ref().ok_or(ProcessError::Unmatched)?;
    if let Some(series) = ctx.local.series_by_external_id(external.volume_id).await? {
        return Ok(SeriesTarget::Existing(series));
    }

    let folder_path = item.is_file().then(|| {
        ctx.config
            .library_root
            .join(series_folder_name(&external.volume_name, external.start_year))
            .display()
            .to_string()
    });

    Ok(SeriesTarget::New(NewSeries {
        name: external.volume_name.clone(),
        start_year: external.start_year,
        volume_number: item.metadata.volume,
        publisher: external.publisher.clone().or_else(|| item.metadata.publisher.clone()),
        folder_path,
        external_id: Some(external.volume_id),
    }))
}

/// Folder name for a series: `Name (Year)` with path separators removed
pub fn series_folder_name(name: &str, start_year: Option<i32>) -> String {
    let cleaned: String = name
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => ' ',
            c if c.is_control() => ' ',
            c => c,
        })
        .collect();
    let cleaned = cleaned.split_whitespace().collect::<Vec<_>>().join(" ");
    let cleaned = cleaned.trim_matches('.').trim();
    let base = if cleaned.is_empty() { "Unknown" } else { cleaned };

    match start_year {
        Some(year) => format!("{} ({})", base, year),
        None => base.to_string(),
    }
}

fn series_folder(library_root: &Path, series: &LocalSeries) -> PathBuf {
    match &series.folder_path {
        Some(folder) => PathBuf::from(folder),
        None => library_root.join(series_folder_name(&series.name, series.start_year)),
    }
}

/// Project what processing the batch's queued items would do
pub async fn preview(ctx: &JobContext, batch_id: Uuid) -> Result<ProcessPreview> {
    let batch = db::batches::load_batch(&ctx.db, batch_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))?;
    let queued = db::items::items_with_status(&ctx.db, batch_id, ItemStatus::Queued).await?;

    let mut preview = ProcessPreview {
        total_files: queued.len(),
        ..Default::default()
    };
    let mut new_volumes = HashSet::new();

    for item in &queued {
        match resolve_target(ctx, item).await {
            Ok(SeriesTarget::Existing(_)) => preview.existing_volumes += 1,
            Ok(SeriesTarget::New(series)) => {
                preview.volumes_to_create += 1;
                if new_volumes.insert(series.external_id) {
                    preview.new_volume_names.push(series.name);
                }
            }
            Err(ProcessError::Storage(e)) => return Err(e),
            Err(_) => preview.unmatched += 1,
        }

        if item.is_file() {
            match batch.transfer_mode {
                TransferMode::Move => preview.files_to_move += 1,
                TransferMode::Link => preview.files_to_link += 1,
                TransferMode::None => {}
            }
        }
    }

    Ok(preview)
}

/// Start the process job; refused when nothing is queued
pub async fn start_process(
    ctx: &Arc<JobContext>,
    orchestrator: &JobOrchestrator,
    batch_id: Uuid,
) -> Result<JobStatusReport> {
    db::batches::load_batch(&ctx.db, batch_id)
        .await?
        .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))?;

    let queued = db::items::items_with_status(&ctx.db, batch_id, ItemStatus::Queued).await?;
    if queued.is_empty() {
        return Err(Error::InvalidInput(format!(
            "Batch {} has no items queued for import",
            batch_id
        )));
    }

    let task = Arc::new(ProcessJob::new(ctx.clone(), batch_id));
    let report = orchestrator
        .start(JobKey::new(batch_id, OperationKind::Process), task)
        .await?;
    Ok(report)
}

/// Process job over the items queued at plan time
pub struct ProcessJob {
    ctx: Arc<JobContext>,
    batch_id: Uuid,
    plan: Mutex<Option<(ImportBatch, Vec<Uuid>)>>,
}

impl ProcessJob {
    pub fn new(ctx: Arc<JobContext>, batch_id: Uuid) -> Self {
        Self {
            ctx,
            batch_id,
            plan: Mutex::new(None),
        }
    }

    async fn process_item(
        &self,
        batch: &ImportBatch,
        item: &mut CandidateItem,
    ) -> std::result::Result<(), ProcessError> {
        let number = item
            .metadata
            .issue_number
            .clone()
            .or_else(|| item.external_match.as_ref().and_then(|m| m.issue_number.clone()))
            .ok_or(ProcessError::NoIssueNumber)?;

        let series = match resolve_target(&self.ctx, item).await? {
            SeriesTarget::Existing(series) => series,
            SeriesTarget::New(new_series) => {
                let created = self.ctx.local.create_series(new_series).await?;
                tracing::info!(series_id = created.id, name = %created.name, "Created series");
                created
            }
        };
        let planned = item
            .is_file()
            .then(|| planned_transfer(&self.ctx.config.library_root, batch.transfer_mode, item, &series));

        if let Some(planned) = &planned {
            let registered_at = planned.destination.display().to_string();
            if let Some(existing) = self.ctx.local.find_issue(series.id, &number).await? {
                match existing.file_path {
                    Some(path) if path != registered_at => {
                        return Err(ProcessError::DuplicateIssue { number, path })
                    }
                    _ => {}
                }
            }
        }

        let file_path = match &planned {
            Some(planned) => Some(self.transfer(planned).await?),
            None => None,
        };

        let issue = self
            .ctx
            .local
            .register_issue(
                series.id,
                &number,
                item.external_match.as_ref().and_then(|m| m.issue_id),
                file_path.as_deref(),
            )
            .await?;

        item.local_match = Some(LocalMatch {
            series_id: series.id,
            series_name: series.name.clone(),
            issue_id: Some(issue.id),
            publisher: series.publisher.clone(),
        });
        if let Some(path) = file_path {
            if path != item.source {
                item.add_note(format!("imported to {}", path));
            }
        }
        item.status = ItemStatus::Processed;
        item.error = None;
        item.updated_at = chrono::Utc::now();
        Ok(())
    }

    /// Carry out a planned transfer; returns the path the issue is registered under
    ///
    /// A move whose source is gone and whose destination exists was completed
    /// by an earlier, interrupted run and counts as done.
    async fn transfer(&self, planned: &PlannedTransfer) -> std::result::Result<String, ProcessError> {
        let PlannedTransfer {
            mode,
            source,
            destination,
        } = planned;
        let registered_at = destination.display().to_string();
        if destination == source || *mode == TransferMode::None {
            return Ok(registered_at);
        }

        if *mode == TransferMode::Move
            && !self.ctx.fs.exists(source).await
            && self.ctx.fs.exists(destination).await
        {
            tracing::info!(
                from = %source.display(),
                to = %destination.display(),
                "File already moved by an earlier run"
            );
            return Ok(registered_at);
        }

        let transfer_error = |action: &'static str| {
            let from = source.display().to_string();
            let to = registered_at.clone();
            move |e: std::io::Error| ProcessError::Transfer {
                action,
                from,
                to,
                source: e,
            }
        };

        if let Some(folder) = destination.parent() {
            self.ctx
                .fs
                .create_dir_all(folder)
                .await
                .map_err(transfer_error("create folder for"))?;
        }

        match mode {
            TransferMode::Move => self
                .ctx
                .fs
                .move_file(source, destination)
                .await
                .map_err(transfer_error("move"))?,
            TransferMode::Link => self
                .ctx
                .fs
                .link_file(source, destination)
                .await
                .map_err(transfer_error("link"))?,
            TransferMode::None => {}
        }

        tracing::debug!(
            from = %source.display(),
            to = %destination.display(),
            ?mode,
            "Transferred file"
        );
        Ok(registered_at)
    }
}

/// Source and final location of one file
struct PlannedTransfer {
    mode: TransferMode,
    source: PathBuf,
    destination: PathBuf,
}

/// Where a file ends up; files without a name, or batches that do not
/// transfer, stay where they are
fn planned_transfer(
    library_root: &Path,
    mode: TransferMode,
    item: &CandidateItem,
    series: &LocalSeries,
) -> PlannedTransfer {
    let source = PathBuf::from(&item.source);
    let destination = match (mode, source.file_name()) {
        (TransferMode::None, _) | (_, None) => source.clone(),
        (_, Some(file_name)) => series_folder(library_root, series).join(file_name),
    };
    PlannedTransfer {
        mode,
        source,
        destination,
    }
}

#[async_trait]
impl JobTask for ProcessJob {
    async fn plan(&self, _discovered: &PlanProgress) -> std::result::Result<usize, JobError> {
        let batch = self.ctx.require_batch(self.batch_id).await?;
        let ids: Vec<Uuid> = db::items::items_with_status(&self.ctx.db, self.batch_id, ItemStatus::Queued)
            .await?
            .into_iter()
            .map(|item| item.id)
            .collect();
        let total = ids.len();
        *self.plan.lock().await = Some((batch, ids));
        Ok(total)
    }

    async fn run_unit(&self, index: usize) -> UnitOutcome {
        let Some((batch, item_id)) = self
            .plan
            .lock()
            .await
            .as_ref()
            .and_then(|(batch, ids)| ids.get(index).map(|id| (batch.clone(), *id)))
        else {
            return UnitOutcome::item_error(format!("process unit {} out of range", index));
        };

        let mut item = match db::items::load_item(&self.ctx.db, item_id).await {
            Ok(Some(item)) => item,
            Ok(None) => {
                return match self.ctx.require_batch(self.batch_id).await {
                    Ok(_) => UnitOutcome::item_error(format!("item {} not found", item_id)),
                    Err(e) => UnitOutcome::Fatal(e),
                }
            }
            Err(e) => return UnitOutcome::Fatal(JobError::from(e)),
        };

        // dequeued while the job was paused
        if item.status != ItemStatus::Queued {
            return UnitOutcome::Done;
        }

        let result = self.process_item(&batch, &mut item).await;
        let message = match &result {
            Ok(()) => None,
            Err(e) => {
                let message = e.to_string();
                item.set_error(message.clone());
                Some(message)
            }
        };

        match db::items::save_item(&self.ctx.db, &item).await {
            Ok(true) => {}
            Ok(false) => return UnitOutcome::Fatal(JobError::BatchDeleted(self.batch_id)),
            Err(e) => return self.ctx.write_failure(self.batch_id, e).await,
        }

        match message {
            Some(message) => UnitOutcome::item_error(format!("{}: {}", item.source, message)),
            None => UnitOutcome::Done,
        }
    }

    fn completed_status(&self, errors: usize) -> BatchStatus {
        if errors == 0 {
            BatchStatus::Completed
        } else {
            BatchStatus::Ready
        }
    }
}
