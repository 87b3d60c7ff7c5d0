//! Job record state machine
//!
//! One record per `(batch_id, operation_kind)`:
//! QUEUED → RUNNING ⇄ PAUSED → COMPLETED, with RUNNING/PAUSED/QUEUED → FAILED.
//! Records are runtime-only and owned by the job orchestrator.

use chrono::{DateTime, Utc};
use paneltrack_common::events::OperationKind;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Job key: at most one active job exists per key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct JobKey {
    pub batch_id: Uuid,
    pub kind: OperationKind,
}

impl JobKey {
    pub fn new(batch_id: Uuid, kind: OperationKind) -> Self {
        Self { batch_id, kind }
    }
}

impl std::fmt::Display for JobKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.batch_id, self.kind)
    }
}

/// Job status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Reported when no record exists for the key
    None,
    Queued,
    Running,
    Paused,
    Completed,
    Failed,
}

impl JobStatus {
    /// Queued, running and paused jobs hold their key
    pub fn is_active(&self) -> bool {
        matches!(self, JobStatus::Queued | JobStatus::Running | JobStatus::Paused)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, JobStatus::Completed | JobStatus::Failed)
    }

    /// Allowed worker-driven transitions
    pub fn can_transition_to(&self, next: JobStatus) -> bool {
        use JobStatus::*;
        matches!(
            (self, next),
            (Queued, Running)
                | (Queued, Failed)
                | (Running, Paused)
                | (Running, Completed)
                | (Running, Failed)
                | (Paused, Running)
                | (Paused, Failed)
        )
    }
}

/// Progress counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobProgress {
    /// Work items finished (successfully or not)
    pub current: usize,
    /// Work items planned
    pub total: usize,
}

impl JobProgress {
    pub fn percentage(&self) -> f64 {
        if self.total > 0 {
            (self.current as f64 / self.total as f64) * 100.0
        } else {
            0.0
        }
    }
}

/// Runtime state of one background operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub key: JobKey,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub error_count: usize,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl JobRecord {
    pub fn new(key: JobKey) -> Self {
        let now = Utc::now();
        Self {
            key,
            status: JobStatus::Queued,
            progress: JobProgress::default(),
            error_count: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Move to `next`; returns false (and leaves the record untouched) if not allowed
    pub fn transition_to(&mut self, next: JobStatus) -> bool {
        if !self.status.can_transition_to(next) {
            return false;
        }
        self.status = next;
        self.updated_at = Utc::now();
        true
    }

    /// Set the planned total
    pub fn set_total(&mut self, total: usize) {
        self.progress.total = total;
        self.updated_at = Utc::now();
    }

    /// Mark `current` items finished
    pub fn set_current(&mut self, current: usize) {
        self.progress.current = current;
        if self.progress.total < current {
            self.progress.total = current;
        }
        self.updated_at = Utc::now();
    }

    /// Record a per-item error; the job keeps going
    pub fn record_item_error(&mut self, message: String) {
        self.error_count += 1;
        self.last_error = Some(message);
        self.updated_at = Utc::now();
    }

    /// Record the job-level error and move to FAILED
    pub fn fail(&mut self, message: String) {
        self.status = JobStatus::Failed;
        self.last_error = Some(message);
        self.updated_at = Utc::now();
    }
}

/// Result of a status query
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobStatusReport {
    pub batch_id: Uuid,
    pub kind: OperationKind,
    pub status: JobStatus,
    pub progress: JobProgress,
    pub error_count: usize,
    pub last_error: Option<String>,
}

impl JobStatusReport {
    /// Sentinel report for a key without a record
    pub fn none(key: JobKey) -> Self {
        Self {
            batch_id: key.batch_id,
            kind: key.kind,
            status: JobStatus::None,
            progress: JobProgress::default(),
            error_count: 0,
            last_error: None,
        }
    }
}

impl From<&JobRecord> for JobStatusReport {
    fn from(record: &JobRecord) -> Self {
        Self {
            batch_id: record.key.batch_id,
            kind: record.key.kind,
            status: record.status,
            progress: record.progress,
            error_count: record.error_count,
            last_error: record.last_error.clone(),
        }
    }
}
