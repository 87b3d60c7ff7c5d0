//! Bulk Operation Executor
//!
//! Applies one action to an explicit set of items. Every item is handled on
//! its own: a failure is recorded against that item and the next one is
//! still attempted. Simple edits run inline; matching runs inline for small
//! sets and as an orchestrated job once the set exceeds
//! `jobs.async_bulk_threshold`.

use async_trait::async_trait;
use paneltrack_common::events::OperationKind;
use paneltrack_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::external_catalog::CatalogError;
use super::identification::MatchScope;
use super::job_context::JobContext;
use super::job_orchestrator::{JobError, JobOrchestrator, JobTask, PlanProgress, UnitOutcome};
use crate::db;
use crate::models::{CandidateItem, ItemStatus, JobKey, JobStatusReport, MatchPolicy};

/// Bulk action
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum BulkAction {
    /// Approve matched items for the next process job
    QueueForImport,
    Skip,
    /// Drop match state and cached search results; the item returns to pending
    ResetMatch,
    SetStatus { status: ItemStatus },
    MatchLocal,
    MatchExternal,
}

impl BulkAction {
    /// Orchestrator kind for matching actions
    pub fn match_kind(&self) -> Option<OperationKind> {
        match self {
            BulkAction::MatchLocal => Some(OperationKind::MatchLocal),
            BulkAction::MatchExternal => Some(OperationKind::MatchExternal),
            _ => None,
        }
    }
}

/// Aggregate result of an inline bulk run
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BulkOutcome {
    pub attempted: usize,
    pub succeeded: usize,
    pub failed: usize,
}

impl BulkOutcome {
    fn record(&mut self, ok: bool) {
        self.attempted += 1;
        if ok {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }
}

/// Either the inline result or the handle of the job doing the work
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum BulkResponse {
    Completed(BulkOutcome),
    Job(JobStatusReport),
}

fn scope_for(kind: OperationKind) -> MatchScope {
    match kind {
        OperationKind::MatchLocal => MatchScope::LocalOnly,
        _ => MatchScope::ExternalOnly,
    }
}

/// Identify one item and persist the result
pub async fn match_one(
    ctx: &JobContext,
    batch_id: Uuid,
    policy: MatchPolicy,
    scope: MatchScope,
    item_id: Uuid,
) -> UnitOutcome {
    let mut item = match db::items::load_item(&ctx.db, item_id).await {
        Ok(Some(item)) if item.batch_id == batch_id => item,
        Ok(Some(_)) => return UnitOutcome::item_error(format!("item {} is not in this batch", item_id)),
        Ok(None) => {
            return match ctx.require_batch(batch_id).await {
                Ok(_) => UnitOutcome::item_error(format!("item {} not found", item_id)),
                Err(e) => UnitOutcome::Fatal(e),
            }
        }
        Err(e) => return UnitOutcome::Fatal(JobError::from(e)),
    };

    if item.status == ItemStatus::Processed {
        return UnitOutcome::item_error(format!("item {} is already processed", item_id));
    }

    let identification = ctx.pipeline.identify(&mut item, policy, scope).await;

    match db::items::save_item(&ctx.db, &item).await {
        Ok(true) => {}
        Ok(false) => return UnitOutcome::Fatal(JobError::BatchDeleted(batch_id)),
        Err(e) => return ctx.write_failure(batch_id, e).await,
    }

    match (&identification.external_error, identification.item_error()) {
        (Some(CatalogError::Throttled { .. }), Some(message)) => UnitOutcome::ItemError {
            message,
            throttled: true,
        },
        (_, Some(message)) => UnitOutcome::item_error(message),
        (_, None) => UnitOutcome::Done,
    }
}

/// Background match over a fixed item set
pub struct MatchJob {
    ctx: Arc<JobContext>,
    batch_id: Uuid,
    scope: MatchScope,
    item_ids: Vec<Uuid>,
    policy: Mutex<MatchPolicy>,
}

impl MatchJob {
    pub fn new(ctx: Arc<JobContext>, batch_id: Uuid, kind: OperationKind, item_ids: Vec<Uuid>) -> Self {
        Self {
            ctx,
            batch_id,
            scope: scope_for(kind),
            item_ids,
            policy: Mutex::new(MatchPolicy::default()),
        }
    }
}

#[async_trait]
impl JobTask for MatchJob {
    async fn plan(&self, _discovered: &PlanProgress) -> std::result::Result<usize, JobError> {
        let batch = self.ctx.require_batch(self.batch_id).await?;
        *self.policy.lock().await = batch.match_policy;
        Ok(self.item_ids.len())
    }

    async fn run_unit(&self, index: usize) -> UnitOutcome {
        let Some(&item_id) = self.item_ids.get(index) else {
            return UnitOutcome::item_error(format!("match unit {} out of range", index));
        };
        let policy = *self.policy.lock().await;
        match_one(&self.ctx, self.batch_id, policy, self.scope, item_id).await
    }
}

/// Bulk executor
#[derive(Clone)]
pub struct BulkExecutor {
    ctx: Arc<JobContext>,
    orchestrator: JobOrchestrator,
}

impl BulkExecutor {
    pub fn new(ctx: Arc<JobContext>, orchestrator: JobOrchestrator) -> Self {
        Self { ctx, orchestrator }
    }

    /// Apply `action` to every item in `item_ids`
    pub async fn bulk_update(
        &self,
        batch_id: Uuid,
        item_ids: Vec<Uuid>,
        action: BulkAction,
    ) -> Result<BulkResponse> {
        if item_ids.is_empty() {
            return Err(Error::InvalidInput("No items selected".to_string()));
        }
        if matches!(action, BulkAction::SetStatus { status: ItemStatus::Processed }) {
            return Err(Error::InvalidInput(
                "Items become processed only through a process job".to_string(),
            ));
        }

        let batch = db::batches::load_batch(&self.ctx.db, batch_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Batch not found: {}", batch_id)))?;

        let process_key = JobKey::new(batch_id, OperationKind::Process);
        if self.orchestrator.status(process_key).await.status.is_active() {
            return Err(Error::Conflict(format!(
                "Batch {} is being processed",
                batch_id
            )));
        }

        if let Some(kind) = action.match_kind() {
            if item_ids.len() > self.ctx.config.jobs.async_bulk_threshold {
                let report = self.start_bulk_match(batch_id, item_ids, kind).await?;
                return Ok(BulkResponse::Job(report));
            }

            let key = JobKey::new(batch_id, kind);
            if self.orchestrator.status(key).await.status.is_active() {
                return Err(Error::Conflict(format!(
                    "A {} job is already active for batch {}",
                    kind, batch_id
                )));
            }

            let mut outcome = BulkOutcome::default();
            for item_id in item_ids {
                match match_one(&self.ctx, batch_id, batch.match_policy, scope_for(kind), item_id).await {
                    UnitOutcome::Done => outcome.record(true),
                    UnitOutcome::ItemError { message, .. } => {
                        tracing::warn!(%batch_id, %item_id, error = %message, "Bulk match item failed");
                        outcome.record(false);
                    }
                    UnitOutcome::Fatal(e) => return Err(Error::Internal(e.to_string())),
                }
            }
            self.finish_inline(batch_id, action, outcome).await?;
            return Ok(BulkResponse::Completed(outcome));
        }

        let mut outcome = BulkOutcome::default();
        for item_id in item_ids {
            match self.edit_one(batch_id, item_id, action).await {
                Ok(()) => outcome.record(true),
                Err(message) => {
                    tracing::warn!(%batch_id, %item_id, error = %message, "Bulk edit item failed");
                    outcome.record(false);
                }
            }
        }
        self.finish_inline(batch_id, action, outcome).await?;
        Ok(BulkResponse::Completed(outcome))
    }

    /// Start a background match job over `item_ids`
    pub async fn start_bulk_match(
        &self,
        batch_id: Uuid,
        item_ids: Vec<Uuid>,
        kind: OperationKind,
    ) -> Result<JobStatusReport> {
        if !matches!(kind, OperationKind::MatchLocal | OperationKind::MatchExternal) {
            return Err(Error::InvalidInput(format!("{} is not a match kind", kind)));
        }
        if item_ids.is_empty() {
            return Err(Error::InvalidInput("No items selected".to_string()));
        }

        let task = Arc::new(MatchJob::new(self.ctx.clone(), batch_id, kind, item_ids));
        let report = self
            .orchestrator
            .start(JobKey::new(batch_id, kind), task)
            .await?;
        Ok(report)
    }

    async fn finish_inline(&self, batch_id: Uuid, action: BulkAction, outcome: BulkOutcome) -> Result<()> {
        db::batches::recompute_counters(&self.ctx.db, batch_id).await?;
        tracing::info!(
            %batch_id,
            ?action,
            attempted = outcome.attempted,
            succeeded = outcome.succeeded,
            failed = outcome.failed,
            "Bulk update applied"
        );
        Ok(())
    }

    async fn edit_one(
        &self,
        batch_id: Uuid,
        item_id: Uuid,
        action: BulkAction,
    ) -> std::result::Result<(), String> {
        let mut item = match db::items::load_item(&self.ctx.db, item_id).await {
            Ok(Some(item)) if item.batch_id == batch_id => item,
            Ok(_) => return Err(format!("item {} not found in batch", item_id)),
            Err(e) => return Err(e.to_string()),
        };

        apply_edit(&mut item, action)?;

        match db::items::save_item(&self.ctx.db, &item).await {
            Ok(true) => Ok(()),
            Ok(false) => Err(format!("item {} disappeared", item_id)),
            Err(e) => Err(e.to_string()),
        }
    }
}

/// State transition of one item for a non-matching action
pub fn apply_edit(item: &mut CandidateItem, action: BulkAction) -> std::result::Result<(), String> {
    if item.status == ItemStatus::Processed {
        return Err("item is already processed".to_string());
    }

    let target = match action {
        BulkAction::QueueForImport => ItemStatus::Queued,
        BulkAction::Skip => ItemStatus::Skipped,
        BulkAction::SetStatus { status } => status,
        BulkAction::ResetMatch => {
            item.clear_matches();
            item.error = None;
            if item.status == ItemStatus::Queued {
                item.status = ItemStatus::Pending;
            }
            item.updated_at = chrono::Utc::now();
            return Ok(());
        }
        BulkAction::MatchLocal | BulkAction::MatchExternal => {
            return Err("matching actions are not edits".to_string());
        }
    };

    match target {
        ItemStatus::Processed => return Err("items become processed only through a process job".to_string()),
        ItemStatus::Queued if !item.is_matched() => {
            return Err("item has no match to import".to_string());
        }
        _ => {}
    }

    item.status = target;
    item.updated_at = chrono::Utc::now();
    Ok(())
}
