//! Import batch ("job container")
//!
//! A batch originates from a set of library root folders, one external
//! directory, or one release week. Its aggregate counters are written only by
//! job completion and by synchronous bulk edits.

use chrono::{DateTime, Datelike, Duration, NaiveDate, Utc};
use paneltrack_common::events::OperationKind;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use uuid::Uuid;

/// Where a batch's items come from
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum BatchScope {
    /// Files already inside library root folders
    RootFolders { paths: Vec<PathBuf> },
    /// One directory outside the library
    ExternalPath { path: PathBuf },
    /// Releases listed by the external catalog for one calendar week
    ReleaseWeek { week_start: NaiveDate },
}

impl BatchScope {
    /// Normalize user input: release weeks always start on Monday
    pub fn normalized(self) -> Self {
        match self {
            BatchScope::ReleaseWeek { week_start } => {
                let offset = week_start.weekday().num_days_from_monday() as i64;
                BatchScope::ReleaseWeek {
                    week_start: week_start - Duration::days(offset),
                }
            }
            other => other,
        }
    }

    /// Transfer mode implied by the scope
    pub fn default_transfer_mode(&self) -> TransferMode {
        match self {
            BatchScope::RootFolders { .. } => TransferMode::Link,
            BatchScope::ExternalPath { .. } => TransferMode::Move,
            BatchScope::ReleaseWeek { .. } => TransferMode::None,
        }
    }
}

impl fmt::Display for BatchScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BatchScope::RootFolders { paths } => {
                let joined: Vec<String> = paths.iter().map(|p| p.display().to_string()).collect();
                write!(f, "root folders [{}]", joined.join(", "))
            }
            BatchScope::ExternalPath { path } => write!(f, "external path {}", path.display()),
            BatchScope::ReleaseWeek { week_start } => write!(f, "release week {}", week_start),
        }
    }
}

/// How processed files reach the library
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransferMode {
    /// Move the file into the series folder
    Move,
    /// Hard-link the file into the series folder
    Link,
    /// No file involved (release-week items)
    None,
}

/// Whether a local-catalog hit is enough to skip the external search
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPolicy {
    /// A local series + issue match satisfies identification
    #[default]
    PreferLocal,
    /// Always consult the external catalog
    AlwaysExternal,
}

/// Batch lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchStatus {
    /// Scan job active
    Scanning,
    /// Idle, items available for review
    Ready,
    /// Match job active
    Matching,
    /// Process job active
    Processing,
    /// All queued items processed
    Completed,
    /// Last job stopped on a job-level error
    Failed,
}

impl BatchStatus {
    /// Status a batch takes while a job of `kind` runs
    pub fn for_running(kind: OperationKind) -> Self {
        match kind {
            OperationKind::Scan => BatchStatus::Scanning,
            OperationKind::MatchLocal | OperationKind::MatchExternal => BatchStatus::Matching,
            OperationKind::Process => BatchStatus::Processing,
        }
    }

    /// Whether this status is only valid while a job runs
    pub fn is_busy(&self) -> bool {
        matches!(
            self,
            BatchStatus::Scanning | BatchStatus::Matching | BatchStatus::Processing
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BatchStatus::Scanning => "scanning",
            BatchStatus::Ready => "ready",
            BatchStatus::Matching => "matching",
            BatchStatus::Processing => "processing",
            BatchStatus::Completed => "completed",
            BatchStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "scanning" => Some(BatchStatus::Scanning),
            "ready" => Some(BatchStatus::Ready),
            "matching" => Some(BatchStatus::Matching),
            "processing" => Some(BatchStatus::Processing),
            "completed" => Some(BatchStatus::Completed),
            "failed" => Some(BatchStatus::Failed),
            _ => None,
        }
    }
}

/// Aggregate item counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchCounters {
    /// Items discovered
    pub scanned: i64,
    /// Items with a local or external match
    pub matched: i64,
    /// Items queued for import
    pub approved: i64,
    /// Items skipped
    pub skipped: i64,
    /// Items carrying an error note
    pub errors: i64,
}

/// Import batch
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportBatch {
    pub id: Uuid,
    pub scope: BatchScope,
    pub status: BatchStatus,
    pub transfer_mode: TransferMode,
    pub match_policy: MatchPolicy,
    pub counters: BatchCounters,
    pub last_error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ImportBatch {
    /// Create a new batch; it starts in `Scanning` because creation submits the scan job
    pub fn new(scope: BatchScope, match_policy: MatchPolicy) -> Self {
        let scope = scope.normalized();
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            transfer_mode: scope.default_transfer_mode(),
            scope,
            status: BatchStatus::Scanning,
            match_policy,
            counters: BatchCounters::default(),
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_week_normalized_to_monday() {
        // 2024-05-16 is a Thursday
        let scope = BatchScope::ReleaseWeek {
            week_start: NaiveDate::from_ymd_opt(2024, 5, 16).unwrap(),
        };
        assert_eq!(
            scope.normalized(),
            BatchScope::ReleaseWeek {
                week_start: NaiveDate::from_ymd_opt(2024, 5, 13).unwrap()
            }
        );
    }

    #[test]
    fn test_transfer_mode_follows_scope() {
        let batch = ImportBatch::new(
            BatchScope::ExternalPath { path: "/downloads".into() },
            MatchPolicy::default(),
        );
        assert_eq!(batch.transfer_mode, TransferMode::Move);
        assert_eq!(batch.status, BatchStatus::Scanning);

        let batch = ImportBatch::new(
            BatchScope::RootFolders { paths: vec!["/comics".into()] },
            MatchPolicy::default(),
        );
        assert_eq!(batch.transfer_mode, TransferMode::Link);
    }

    #[test]
    fn test_scope_serialization() {
        let scope: BatchScope =
            serde_json::from_str(r#"{"type":"root_folders","paths":["/a","/b"]}"#).unwrap();
        assert_eq!(
            scope,
            BatchScope::RootFolders { paths: vec!["/a".into(), "/b".into()] }
        );
    }

    #[test]
    fn test_status_names() {
        for status in [
            BatchStatus::Scanning,
            BatchStatus::Ready,
            BatchStatus::Matching,
            BatchStatus::Processing,
            BatchStatus::Completed,
            BatchStatus::Failed,
        ] {
            assert_eq!(BatchStatus::parse(status.as_str()), Some(status));
        }
        assert!(BatchStatus::for_running(OperationKind::MatchExternal).is_busy());
        assert!(!BatchStatus::Ready.is_busy());
    }
}
