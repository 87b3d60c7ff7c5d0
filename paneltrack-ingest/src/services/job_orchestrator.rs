//! Job orchestrator
//!
//! Keyed registry of background jobs, one per `(batch_id, operation_kind)`.
//! Each job runs as its own tokio task over an ordered list of work units
//! planned by a `JobTask`:
//!
//! - **pause** sets a flag the worker checks between units
//! - **resume** clears it; the worker continues with the next unit
//! - **restart** swaps in a fresh record, cancels and awaits the old worker,
//!   then plans and runs everything again from unit 0
//! - **completion** writes the batch counters and final status while holding
//!   the registry lock, then drops the record
//!
//! The registry lock is also held by job start and batch deletion, so a batch
//! can never be deleted between a job's last counter write and its record
//! disappearing.

use async_trait::async_trait;
use chrono::Utc;
use paneltrack_common::events::{EventBus, IngestEvent};
use sqlx::SqlitePool;
use std::collections::HashMap;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::db;
use crate::models::{BatchStatus, JobKey, JobRecord, JobStatus, JobStatusReport};

/// Request-level orchestrator errors; none of these create a job record
#[derive(Debug, Error)]
pub enum OrchestratorError {
    #[error("No job for {0}")]
    JobNotFound(JobKey),

    #[error("A {} job is already active for batch {}", .0.kind, .0.batch_id)]
    JobActive(JobKey),

    #[error("Job {0} is not active")]
    JobNotActive(JobKey),

    #[error("Batch not found: {0}")]
    BatchNotFound(Uuid),

    #[error("Batch {0} has an active job")]
    BatchBusy(Uuid),

    #[error(transparent)]
    Storage(#[from] paneltrack_common::Error),
}

impl From<OrchestratorError> for paneltrack_common::Error {
    fn from(err: OrchestratorError) -> Self {
        use paneltrack_common::Error;
        match err {
            OrchestratorError::JobNotFound(_) | OrchestratorError::BatchNotFound(_) => {
                Error::NotFound(err.to_string())
            }
            OrchestratorError::JobActive(_)
            | OrchestratorError::JobNotActive(_)
            | OrchestratorError::BatchBusy(_) => Error::Conflict(err.to_string()),
            OrchestratorError::Storage(inner) => inner,
        }
    }
}

/// Job-level errors: the job stops and its record becomes FAILED
#[derive(Debug, Clone, Error, PartialEq)]
pub enum JobError {
    #[error("batch {0} no longer exists")]
    BatchDeleted(Uuid),

    #[error("scope no longer exists: {0}")]
    ScopeMissing(String),

    #[error("external catalog still throttling after {0} consecutive items")]
    PersistentThrottling(u32),

    #[error("external catalog is not configured")]
    CatalogDisabled,

    #[error("external catalog error: {0}")]
    Catalog(String),

    #[error("database error: {0}")]
    Database(String),
}

impl From<paneltrack_common::Error> for JobError {
    fn from(err: paneltrack_common::Error) -> Self {
        JobError::Database(err.to_string())
    }
}

/// Outcome of one work unit
#[derive(Debug, Clone, PartialEq)]
pub enum UnitOutcome {
    Done,
    /// Recorded and counted; the job continues
    ItemError { message: String, throttled: bool },
    /// The job cannot make progress
    Fatal(JobError),
}

impl UnitOutcome {
    pub fn item_error(message: impl Into<String>) -> Self {
        UnitOutcome::ItemError {
            message: message.into(),
            throttled: false,
        }
    }
}

/// Work performed by one job
#[async_trait]
pub trait JobTask: Send + Sync {
    /// Plan the work and return the number of units
    ///
    /// Called on every start and restart; an error fails the job. Long plans
    /// report the units found so far through `discovered`.
    async fn plan(&self, discovered: &PlanProgress) -> Result<usize, JobError>;

    /// Run unit `index` of the current plan
    async fn run_unit(&self, index: usize) -> UnitOutcome;

    /// Batch status written when the job completes
    fn completed_status(&self, _errors: usize) -> BatchStatus {
        BatchStatus::Ready
    }
}

/// Publishes the running total while a job is still planning
pub struct PlanProgress {
    handle: Arc<JobHandle>,
}

impl PlanProgress {
    /// Units found so far; the job reads as running from the first call
    pub async fn discovered(&self, total: usize) {
        let mut record = self.handle.record.lock().await;
        record.transition_to(JobStatus::Running);
        record.set_total(total);
    }
}

struct JobHandle {
    record: Mutex<JobRecord>,
    pause: watch::Sender<bool>,
    cancel: CancellationToken,
    /// Cancelled when the worker exits, however it exits
    done: CancellationToken,
    task: Arc<dyn JobTask>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl JobHandle {
    fn new(key: JobKey, task: Arc<dyn JobTask>) -> Arc<Self> {
        let (pause, _) = watch::channel(false);
        Arc::new(Self {
            record: Mutex::new(JobRecord::new(key)),
            pause,
            cancel: CancellationToken::new(),
            done: CancellationToken::new(),
            task,
            worker: Mutex::new(None),
        })
    }

    async fn report(&self) -> JobStatusReport {
        JobStatusReport::from(&*self.record.lock().await)
    }
}

/// Job orchestrator
#[derive(Clone)]
pub struct JobOrchestrator {
    jobs: Arc<Mutex<HashMap<JobKey, Arc<JobHandle>>>>,
    db: SqlitePool,
    event_bus: EventBus,
    max_consecutive_throttles: u32,
}

impl JobOrchestrator {
    pub fn new(db: SqlitePool, event_bus: EventBus, max_consecutive_throttles: u32) -> Self {
        Self {
            jobs: Arc::new(Mutex::new(HashMap::new())),
            db,
            event_bus,
            max_consecutive_throttles,
        }
    }

    /// Submit a job; the batch takes the matching running status
    ///
    /// Fails with `JobActive` (leaving the existing job untouched) when the
    /// key already has a queued, running or paused job.
    pub async fn start(
        &self,
        key: JobKey,
        task: Arc<dyn JobTask>,
    ) -> Result<JobStatusReport, OrchestratorError> {
        let mut jobs = self.jobs.lock().await;

        if let Some(existing) = jobs.get(&key) {
            if existing.record.lock().await.status.is_active() {
                return Err(OrchestratorError::JobActive(key));
            }
        }

        let marked = db::batches::update_status(
            &self.db,
            key.batch_id,
            BatchStatus::for_running(key.kind),
            None,
        )
        .await?;
        if !marked {
            return Err(OrchestratorError::BatchNotFound(key.batch_id));
        }

        let handle = JobHandle::new(key, task);
        jobs.insert(key, handle.clone());
        self.spawn_worker(handle.clone()).await;

        tracing::info!(job = %key, "Job submitted");
        Ok(handle.report().await)
    }

    /// Current state of a key; `status: none` when there is no record
    pub async fn status(&self, key: JobKey) -> JobStatusReport {
        let handle = self.jobs.lock().await.get(&key).cloned();
        match handle {
            Some(handle) => handle.report().await,
            None => JobStatusReport::none(key),
        }
    }

    /// Ask the worker to pause at its next checkpoint; idempotent
    pub async fn pause(&self, key: JobKey) -> Result<JobStatusReport, OrchestratorError> {
        let handle = self.active_handle(key).await?;
        handle.pause.send_replace(true);
        tracing::info!(job = %key, "Pause requested");
        Ok(handle.report().await)
    }

    /// Clear the pause flag; idempotent
    pub async fn resume(&self, key: JobKey) -> Result<JobStatusReport, OrchestratorError> {
        let handle = self.active_handle(key).await?;
        handle.pause.send_replace(false);
        tracing::info!(job = %key, "Resume requested");
        Ok(handle.report().await)
    }

    /// Discard the current record and run the job again from the beginning
    ///
    /// Allowed for active and failed jobs.
    pub async fn restart(&self, key: JobKey) -> Result<JobStatusReport, OrchestratorError> {
        let (old, fresh) = {
            let mut jobs = self.jobs.lock().await;
            let old = jobs
                .get(&key)
                .cloned()
                .ok_or(OrchestratorError::JobNotFound(key))?;

            let marked = db::batches::update_status(
                &self.db,
                key.batch_id,
                BatchStatus::for_running(key.kind),
                None,
            )
            .await?;
            if !marked {
                return Err(OrchestratorError::BatchNotFound(key.batch_id));
            }

            let fresh = JobHandle::new(key, old.task.clone());
            jobs.insert(key, fresh.clone());
            (old, fresh)
        };

        old.cancel.cancel();
        let old_worker = old.worker.lock().await.take();
        if let Some(worker) = old_worker {
            if let Err(e) = worker.await {
                tracing::warn!(job = %key, error = %e, "Previous worker ended abnormally");
            }
        }

        self.spawn_worker(fresh.clone()).await;
        tracing::info!(job = %key, "Job restarted");
        Ok(fresh.report().await)
    }

    /// Whether any job for the batch is queued, running or paused
    pub async fn batch_busy(&self, batch_id: Uuid) -> bool {
        let jobs = self.jobs.lock().await;
        Self::has_active(&jobs, batch_id).await
    }

    /// Delete a batch and its items unless one of its jobs is active
    ///
    /// Failed records left for the batch are dropped with it.
    pub async fn delete_batch(&self, batch_id: Uuid) -> Result<(), OrchestratorError> {
        let mut jobs = self.jobs.lock().await;
        if Self::has_active(&jobs, batch_id).await {
            return Err(OrchestratorError::BatchBusy(batch_id));
        }

        if !db::batches::delete_batch(&self.db, batch_id).await? {
            return Err(OrchestratorError::BatchNotFound(batch_id));
        }
        jobs.retain(|key, _| key.batch_id != batch_id);

        self.event_bus.emit_lossy(IngestEvent::BatchDeleted {
            batch_id,
            timestamp: Utc::now(),
        });
        tracing::info!(%batch_id, "Batch deleted");
        Ok(())
    }

    /// Wait until the worker currently registered for `key` exits
    ///
    /// Follows restarts; returns immediately when there is no record.
    pub async fn join(&self, key: JobKey) {
        loop {
            let Some(handle) = self.jobs.lock().await.get(&key).cloned() else {
                return;
            };
            handle.done.cancelled().await;

            let current = self.jobs.lock().await.get(&key).cloned();
            match current {
                Some(current) if !Arc::ptr_eq(&current, &handle) => continue,
                _ => return,
            }
        }
    }

    /// Cancel every worker (shutdown)
    pub async fn cancel_all(&self) {
        let jobs = self.jobs.lock().await;
        for handle in jobs.values() {
            handle.cancel.cancel();
        }
    }

    async fn has_active(jobs: &HashMap<JobKey, Arc<JobHandle>>, batch_id: Uuid) -> bool {
        for (key, handle) in jobs.iter() {
            if key.batch_id == batch_id && handle.record.lock().await.status.is_active() {
                return true;
            }
        }
        false
    }

    async fn active_handle(&self, key: JobKey) -> Result<Arc<JobHandle>, OrchestratorError> {
        let handle = self
            .jobs
            .lock()
            .await
            .get(&key)
            .cloned()
            .ok_or(OrchestratorError::JobNotFound(key))?;

        if !handle.record.lock().await.status.is_active() {
            return Err(OrchestratorError::JobNotActive(key));
        }
        Ok(handle)
    }

    async fn spawn_worker(&self, handle: Arc<JobHandle>) {
        let this = self.clone();
        let worker_handle = handle.clone();
        let join = tokio::spawn(async move {
            let _done = worker_handle.done.clone().drop_guard();
            this.run_worker(worker_handle).await
        });
        *handle.worker.lock().await = Some(join);
    }

    async fn run_worker(&self, handle: Arc<JobHandle>) {
        let key = handle.record.lock().await.key;

        let discovered = PlanProgress {
            handle: handle.clone(),
        };
        let total = match handle.task.plan(&discovered).await {
            Ok(total) => total,
            Err(e) => {
                self.fail(&handle, e).await;
                return;
            }
        };

        if handle.cancel.is_cancelled() {
            return;
        }

        {
            let mut record = handle.record.lock().await;
            record.transition_to(JobStatus::Running);
            record.set_total(total);
        }
        self.event_bus.emit_lossy(IngestEvent::JobStarted {
            batch_id: key.batch_id,
            kind: key.kind,
            total,
            timestamp: Utc::now(),
        });
        tracing::info!(job = %key, total, "Job started");

        let mut consecutive_throttles = 0u32;

        for index in 0..total {
            if !self.checkpoint(&handle, key).await {
                tracing::debug!(job = %key, "Worker cancelled");
                return;
            }

            let outcome = handle.task.run_unit(index).await;

            let errors = {
                let mut record = handle.record.lock().await;
                match &outcome {
                    UnitOutcome::Done => consecutive_throttles = 0,
                    UnitOutcome::ItemError { message, throttled } => {
                        tracing::warn!(job = %key, unit = index, error = %message, "Item failed");
                        record.record_item_error(message.clone());
                        if *throttled {
                            consecutive_throttles += 1;
                        } else {
                            consecutive_throttles = 0;
                        }
                    }
                    UnitOutcome::Fatal(_) => {}
                }
                record.set_current(index + 1);
                record.error_count
            };

            if let UnitOutcome::Fatal(e) = outcome {
                self.fail(&handle, e).await;
                return;
            }

            if self.max_consecutive_throttles > 0
                && consecutive_throttles >= self.max_consecutive_throttles
            {
                self.fail(&handle, JobError::PersistentThrottling(consecutive_throttles))
                    .await;
                return;
            }

            self.event_bus.emit_lossy(IngestEvent::JobProgress {
                batch_id: key.batch_id,
                kind: key.kind,
                current: index + 1,
                total,
                errors,
            });
        }

        if handle.cancel.is_cancelled() {
            return;
        }
        self.complete(&handle, key).await;
    }

    /// Honor pause and cancellation between units; false means stop
    async fn checkpoint(&self, handle: &JobHandle, key: JobKey) -> bool {
        let mut pause = handle.pause.subscribe();
        if !*pause.borrow_and_update() {
            return !handle.cancel.is_cancelled();
        }

        let progress = {
            let mut record = handle.record.lock().await;
            record.transition_to(JobStatus::Paused);
            record.progress
        };
        self.event_bus.emit_lossy(IngestEvent::JobPaused {
            batch_id: key.batch_id,
            kind: key.kind,
            current: progress.current,
            total: progress.total,
        });
        tracing::info!(job = %key, current = progress.current, total = progress.total, "Job paused");

        loop {
            tokio::select! {
                _ = handle.cancel.cancelled() => return false,
                changed = pause.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                    if !*pause.borrow_and_update() {
                        break;
                    }
                }
            }
        }

        let progress = {
            let mut record = handle.record.lock().await;
            record.transition_to(JobStatus::Running);
            record.progress
        };
        self.event_bus.emit_lossy(IngestEvent::JobResumed {
            batch_id: key.batch_id,
            kind: key.kind,
            current: progress.current,
            total: progress.total,
        });
        tracing::info!(job = %key, current = progress.current, "Job resumed");

        !handle.cancel.is_cancelled()
    }

    async fn complete(&self, handle: &Arc<JobHandle>, key: JobKey) {
        let mut jobs = self.jobs.lock().await;
        if !jobs.get(&key).is_some_and(|current| Arc::ptr_eq(current, handle)) {
            return;
        }

        let (progress, errors) = {
            let record = handle.record.lock().await;
            (record.progress, record.error_count)
        };
        let status = handle.task.completed_status(errors);

        match db::batches::finish_batch(&self.db, key.batch_id, status, None).await {
            Ok(Some(counters)) => {
                let completed = {
                    let mut record = handle.record.lock().await;
                    record.transition_to(JobStatus::Completed)
                };
                if !completed {
                    tracing::warn!(job = %key, "Completing job from unexpected state");
                }
                jobs.remove(&key);
                drop(jobs);

                self.event_bus.emit_lossy(IngestEvent::JobCompleted {
                    batch_id: key.batch_id,
                    kind: key.kind,
                    current: progress.current,
                    total: progress.total,
                    errors,
                    timestamp: Utc::now(),
                });
                tracing::info!(
                    job = %key,
                    processed = progress.current,
                    errors,
                    scanned = counters.scanned,
                    matched = counters.matched,
                    "Job completed"
                );
            }
            Ok(None) => {
                drop(jobs);
                self.fail(handle, JobError::BatchDeleted(key.batch_id)).await;
            }
            Err(e) => {
                drop(jobs);
                self.fail(handle, JobError::from(e)).await;
            }
        }
    }

    async fn fail(&self, handle: &Arc<JobHandle>, error: JobError) {
        let jobs = self.jobs.lock().await;
        let key = handle.record.lock().await.key;
        if !jobs.get(&key).is_some_and(|current| Arc::ptr_eq(current, handle)) {
            return;
        }

        let message = error.to_string();
        handle.record.lock().await.fail(message.clone());

        if !matches!(error, JobError::BatchDeleted(_)) {
            if let Err(e) =
                db::batches::finish_batch(&self.db, key.batch_id, BatchStatus::Failed, Some(&message))
                    .await
            {
                tracing::error!(job = %key, error = %e, "Failed to record job failure on batch");
            }
        }
        drop(jobs);

        self.event_bus.emit_lossy(IngestEvent::JobFailed {
            batch_id: key.batch_id,
            kind: key.kind,
            error: message.clone(),
            timestamp: Utc::now(),
        });
        tracing::error!(job = %key, error = %message, "Job failed");
    }
}
