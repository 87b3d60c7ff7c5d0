//! Candidate item: one file or release awaiting identification/import

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::catalog::{ExternalHit, ExternalQuery};

/// Item status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ItemStatus {
    /// Awaiting review
    Pending,
    /// Approved for import by the next process job
    Queued,
    /// Excluded from import
    Skipped,
    /// Committed to the permanent catalog
    Processed,
}

impl ItemStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemStatus::Pending => "pending",
            ItemStatus::Queued => "queued",
            ItemStatus::Skipped => "skipped",
            ItemStatus::Processed => "processed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(ItemStatus::Pending),
            "queued" => Some(ItemStatus::Queued),
            "skipped" => Some(ItemStatus::Skipped),
            "processed" => Some(ItemStatus::Processed),
            _ => None,
        }
    }
}

/// Which match an item carries, used for list filters and counts
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchPresence {
    /// Local catalog match (with or without an external one)
    Local,
    /// External match only
    External,
    /// No match
    None,
}

impl MatchPresence {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "local" => Some(MatchPresence::Local),
            "external" => Some(MatchPresence::External),
            "none" => Some(MatchPresence::None),
            _ => None,
        }
    }
}

/// Heuristically extracted fields
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExtractedMetadata {
    pub series_name: Option<String>,
    /// Normalized issue number ("001" becomes "1")
    pub issue_number: Option<String>,
    pub year: Option<i32>,
    pub volume: Option<i32>,
    /// Filled from the local series when one matches
    pub publisher: Option<String>,
}

impl ExtractedMetadata {
    /// Extraction counts as successful once a series name is known
    pub fn is_extracted(&self) -> bool {
        self.series_name.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Reference to an existing local series/issue
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalMatch {
    pub series_id: i64,
    pub series_name: String,
    pub issue_id: Option<i64>,
    pub publisher: Option<String>,
}

impl LocalMatch {
    pub fn has_issue(&self) -> bool {
        self.issue_id.is_some()
    }
}

/// Bound external catalog match
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalMatch {
    pub volume_id: i64,
    pub volume_name: String,
    pub start_year: Option<i32>,
    pub publisher: Option<String>,
    pub issue_id: Option<i64>,
    pub issue_number: Option<String>,
    /// Confidence at the time of binding (1.0 for manual overrides)
    pub confidence: f64,
    /// Bound by an operator rather than by scoring
    #[serde(default)]
    pub manual: bool,
}

impl ExternalMatch {
    pub fn from_hit(hit: &ExternalHit, confidence: f64, manual: bool) -> Self {
        Self {
            volume_id: hit.volume_id,
            volume_name: hit.volume_name.clone(),
            start_year: hit.start_year,
            publisher: hit.publisher.clone(),
            issue_id: hit.issue_id,
            issue_number: hit.issue_number.clone(),
            confidence,
            manual,
        }
    }
}

/// Cached raw search response
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchCache {
    pub query: ExternalQuery,
    pub hits: Vec<ExternalHit>,
    pub fetched_at: DateTime<Utc>,
}

impl SearchCache {
    /// Whether the cache answers `query` at `now` given a TTL in seconds
    pub fn is_fresh_for(&self, query: &ExternalQuery, now: DateTime<Utc>, ttl_secs: i64) -> bool {
        self.query == *query && (now - self.fetched_at).num_seconds() < ttl_secs
    }
}

/// Candidate item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    pub id: Uuid,
    pub batch_id: Uuid,
    /// File path, or `external:issue:<id>` for releases
    pub source: String,
    pub file_size: Option<i64>,
    pub extension: Option<String>,
    pub metadata: ExtractedMetadata,
    pub status: ItemStatus,
    pub local_match: Option<LocalMatch>,
    pub external_match: Option<ExternalMatch>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub search_cache: Option<SearchCache>,
    pub notes: Vec<String>,
    /// Last per-item error; cleared when the item is handled successfully
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Source prefix for items discovered from a release listing
pub const RELEASE_SOURCE_PREFIX: &str = "external:issue:";

impl CandidateItem {
    /// New pending item
    pub fn new(batch_id: Uuid, source: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            batch_id,
            source,
            file_size: None,
            extension: None,
            metadata: ExtractedMetadata::default(),
            status: ItemStatus::Pending,
            local_match: None,
            external_match: None,
            search_cache: None,
            notes: Vec::new(),
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Whether the item stands for a file (as opposed to a listed release)
    pub fn is_file(&self) -> bool {
        !self.source.starts_with(RELEASE_SOURCE_PREFIX)
    }

    pub fn match_presence(&self) -> MatchPresence {
        if self.local_match.is_some() {
            MatchPresence::Local
        } else if self.external_match.is_some() {
            MatchPresence::External
        } else {
            MatchPresence::None
        }
    }

    pub fn is_matched(&self) -> bool {
        self.match_presence() != MatchPresence::None
    }

    /// Append a note unless an identical one is present
    pub fn add_note(&mut self, note: impl Into<String>) {
        let note = note.into();
        if !self.notes.contains(&note) {
            self.notes.push(note);
        }
    }

    /// Record a per-item error
    pub fn set_error(&mut self, message: impl Into<String>) {
        self.error = Some(message.into());
    }

    /// Drop match state and cached search results
    pub fn clear_matches(&mut self) {
        self.local_match = None;
        self.external_match = None;
        self.search_cache = None;
    }
}

/// Item list filter; empty sets match everything
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemFilter {
    pub statuses: Vec<ItemStatus>,
    pub matches: Vec<MatchPresence>,
    /// Case-insensitive substring of source or series name
    pub search: Option<String>,
}

/// Item counts over a whole batch, independent of the list filter
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ItemCounts {
    pub total: i64,
    pub by_status: BTreeMap<ItemStatus, i64>,
    pub by_match: BTreeMap<MatchPresence, i64>,
}
