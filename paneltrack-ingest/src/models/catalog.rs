//! Catalog records exchanged with the local and external catalogs

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Query sent to the external catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExternalQuery {
    /// Series name as extracted from the file
    pub series_name: String,
    /// Normalized issue number, when the file names one
    pub issue_number: Option<String>,
    pub year: Option<i32>,
}

impl ExternalQuery {
    /// Whether hits are narrowed by issue (selects the issue ceiling)
    pub fn is_issue_query(&self) -> bool {
        self.issue_number.is_some()
    }
}

/// One raw external search hit: a volume, optionally narrowed to an issue
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalHit {
    /// Catalog-provided volume identifier (tie breaker when scores are equal)
    pub volume_id: i64,
    pub volume_name: String,
    pub start_year: Option<i32>,
    pub publisher: Option<String>,
    #[serde(default)]
    pub issue_count: Option<i64>,
    /// Set when the volume contains the queried issue number
    #[serde(default)]
    pub issue_id: Option<i64>,
    #[serde(default)]
    pub issue_number: Option<String>,
}

/// One release listed by the external catalog for a release week
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalRelease {
    pub issue_id: i64,
    pub issue_number: Option<String>,
    pub volume_id: i64,
    pub volume_name: String,
    pub publisher: Option<String>,
    pub start_year: Option<i32>,
    pub store_date: Option<NaiveDate>,
}

/// Series (volume) in the user's own catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalSeries {
    pub id: i64,
    pub name: String,
    pub start_year: Option<i32>,
    pub volume_number: Option<i32>,
    pub publisher: Option<String>,
    pub folder_path: Option<String>,
    /// External catalog volume id, when known
    pub external_id: Option<i64>,
}

/// Issue in the user's own catalog
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalIssue {
    pub id: i64,
    pub series_id: i64,
    pub number: String,
    pub external_id: Option<i64>,
    pub file_path: Option<String>,
}
