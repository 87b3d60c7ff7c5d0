//! Identification pipeline
//!
//! Runs a fixed sequence of steps against one candidate item:
//! 1. metadata extraction
//! 2. local catalog lookup
//! 3. external catalog search and scoring
//! 4. candidate selection
//!
//! Every step leaves a `StepResult` in the trace, including skipped and
//! failed ones, so an operator can see why an item did not match. A failed
//! step only stops the steps that need its output.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use super::external_catalog::{CatalogError, ExternalCatalog};
use super::filename_parser::parse_filename;
use super::local_catalog::LocalCatalog;
use super::scoring_engine::score_hits;
use crate::config::ScoringConfigHandle;
use crate::models::{
    CandidateItem, ExternalHit, ExternalMatch, ExternalQuery, LocalMatch, MatchPolicy,
    ScoringOutcome, SearchCache,
};

/// Note attached to items whose file name yielded no series name
pub const EXTRACTION_FAILED_NOTE: &str = "could not extract metadata";

/// Pipeline step names
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IdentificationStep {
    ExtractMetadata,
    LocalLookup,
    ExternalSearch,
    CandidateSelection,
}

/// Outcome of one step
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub step: IdentificationStep,
    pub success: bool,
    /// The step did not run (policy, scope or a missing prerequisite)
    pub skipped: bool,
    pub description: String,
    pub result: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
}

impl StepResult {
    fn ok(step: IdentificationStep, description: impl Into<String>, result: serde_json::Value) -> Self {
        Self {
            step,
            success: true,
            skipped: false,
            description: description.into(),
            result: Some(result),
            failure_reason: None,
        }
    }

    fn failed(step: IdentificationStep, description: impl Into<String>, reason: impl Into<String>) -> Self {
        Self {
            step,
            success: false,
            skipped: false,
            description: description.into(),
            result: None,
            failure_reason: Some(reason.into()),
        }
    }

    fn skipped(step: IdentificationStep, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            step,
            success: false,
            skipped: true,
            description: format!("Skipped: {}", reason),
            result: None,
            failure_reason: Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentificationSummary {
    pub metadata_extracted: bool,
    pub local_match_found: bool,
    pub external_match_found: bool,
}

/// Diagnostic trace of one pipeline run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdentificationTrace {
    pub item_id: Uuid,
    pub steps: Vec<StepResult>,
    pub summary: IdentificationSummary,
}

/// Which catalogs a run consults
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MatchScope {
    /// Local lookup, then external search unless policy says the local match suffices
    Full,
    LocalOnly,
    ExternalOnly,
}

/// Result of running the pipeline on an item
#[derive(Debug, Clone)]
pub struct Identification {
    pub trace: IdentificationTrace,
    /// Local catalog failure (database error)
    pub local_error: Option<String>,
    /// External catalog failure
    pub external_error: Option<CatalogError>,
}

impl Identification {
    /// Per-item error message, if any step failed on an error rather than a miss
    pub fn item_error(&self) -> Option<String> {
        if let Some(err) = &self.external_error {
            return Some(err.to_string());
        }
        self.local_error.clone()
    }
}

/// Identification pipeline
pub struct IdentificationPipeline {
    local: Arc<dyn LocalCatalog>,
    external: Arc<dyn ExternalCatalog>,
    scoring: ScoringConfigHandle,
    cache_ttl_secs: i64,
}

impl IdentificationPipeline {
    pub fn new(
        local: Arc<dyn LocalCatalog>,
        external: Arc<dyn ExternalCatalog>,
        scoring: ScoringConfigHandle,
        cache_ttl_secs: i64,
    ) -> Self {
        Self {
            local,
            external,
            scoring,
            cache_ttl_secs,
        }
    }

    /// Run every step against `item`, updating its metadata, matches, search
    /// cache, notes and error in place
    ///
    /// The caller decides whether to persist the updated item.
    pub async fn identify(
        &self,
        item: &mut CandidateItem,
        policy: MatchPolicy,
        scope: MatchScope,
    ) -> Identification {
        let mut steps = Vec::with_capacity(4);
        let mut summary = IdentificationSummary::default();
        let mut local_error = None;
        let mut external_error = None;

        // 1. metadata extraction
        let extract = self.extract_metadata(item);
        summary.metadata_extracted = extract.success;
        steps.push(extract);

        // 2. local catalog lookup
        if scope == MatchScope::ExternalOnly {
            steps.push(StepResult::skipped(
                IdentificationStep::LocalLookup,
                "external match requested",
            ));
        } else if !summary.metadata_extracted {
            steps.push(StepResult::skipped(
                IdentificationStep::LocalLookup,
                "no series name to look up",
            ));
        } else {
            match self.local.lookup(&item.metadata).await {
                Ok(Some(local_match)) => {
                    summary.local_match_found = true;
                    steps.push(StepResult::ok(
                        IdentificationStep::LocalLookup,
                        describe_local(&local_match),
                        json!(local_match),
                    ));
                    if item.metadata.publisher.is_none() {
                        item.metadata.publisher = local_match.publisher.clone();
                    }
                    item.local_match = Some(local_match);
                }
                Ok(None) => {
                    item.local_match = None;
                    steps.push(StepResult::failed(
                        IdentificationStep::LocalLookup,
                        "Local catalog lookup",
                        "no local series with this name",
                    ));
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "Local catalog lookup failed");
                    local_error = Some(format!("local lookup failed: {}", e));
                    steps.push(StepResult::failed(
                        IdentificationStep::LocalLookup,
                        "Local catalog lookup",
                        e.to_string(),
                    ));
                }
            }
        }

        // 3. external search
        let local_sufficient = policy == MatchPolicy::PreferLocal
            && item.local_match.as_ref().is_some_and(LocalMatch::has_issue);

        let skip_reason = if scope == MatchScope::LocalOnly {
            Some("local match requested")
        } else if scope == MatchScope::Full && local_sufficient {
            Some("local series and issue match satisfies the batch policy")
        } else if !summary.metadata_extracted {
            Some("external search requires a series name")
        } else {
            None
        };

        let outcome = match skip_reason {
            Some(reason) => {
                steps.push(StepResult::skipped(IdentificationStep::ExternalSearch, reason));
                None
            }
            None => match self.external_search(item).await {
                Ok((query, hits, cached)) => {
                    let config = self.scoring.snapshot().await;
                    let publisher = item
                        .local_match
                        .as_ref()
                        .and_then(|m| m.publisher.as_deref())
                        .or(item.metadata.publisher.as_deref());
                    let outcome = score_hits(&query, publisher, &hits, &config);
                    steps.push(StepResult::ok(
                        IdentificationStep::ExternalSearch,
                        format!(
                            "{} hit(s) for \"{}\"{}",
                            hits.len(),
                            query.series_name,
                            if cached { " (cached)" } else { "" }
                        ),
                        json!({
                            "query": query,
                            "hit_count": hits.len(),
                            "cached": cached,
                            "ranking": outcome,
                        }),
                    ));
                    Some(outcome)
                }
                Err(e) => {
                    tracing::warn!(item_id = %item.id, error = %e, "External search failed");
                    steps.push(StepResult::failed(
                        IdentificationStep::ExternalSearch,
                        "External catalog search",
                        e.to_string(),
                    ));
                    external_error = Some(e);
                    None
                }
            },
        };

        // 4. candidate selection
        match outcome {
            Some(outcome) => {
                let selection = self.select(item, &outcome);
                steps.push(selection);
            }
            None => {
                steps.push(StepResult::skipped(
                    IdentificationStep::CandidateSelection,
                    "no external ranking to select from",
                ));
            }
        }
        summary.external_match_found = item.external_match.is_some();

        let identification = Identification {
            trace: IdentificationTrace {
                item_id: item.id,
                steps,
                summary,
            },
            local_error,
            external_error,
        };
        item.error = identification.item_error();
        item.updated_at = Utc::now();

        identification
    }

    /// Bind an external volume chosen by an operator, bypassing scoring
    pub async fn bind_external(&self, item: &mut CandidateItem, volume_id: i64) -> Result<(), CatalogError> {
        let hit = self
            .external
            .volume(volume_id, item.metadata.issue_number.as_deref())
            .await?;
        item.external_match = Some(ExternalMatch::from_hit(&hit, 1.0, true));
        item.error = None;
        item.updated_at = Utc::now();
        Ok(())
    }

    fn extract_metadata(&self, item: &mut CandidateItem) -> StepResult {
        if item.metadata.is_extracted() {
            return StepResult::ok(
                IdentificationStep::ExtractMetadata,
                "Metadata already extracted",
                json!(item.metadata),
            );
        }

        if !item.is_file() {
            return StepResult::failed(
                IdentificationStep::ExtractMetadata,
                "Release listing",
                "release carries no series name",
            );
        }

        let parsed = parse_filename(std::path::Path::new(&item.source));
        let publisher = item.metadata.publisher.take();
        item.metadata = parsed;
        item.metadata.publisher = publisher;

        if item.metadata.is_extracted() {
            StepResult::ok(
                IdentificationStep::ExtractMetadata,
                "Extracted from file name",
                json!(item.metadata),
            )
        } else {
            item.add_note(EXTRACTION_FAILED_NOTE);
            StepResult::failed(
                IdentificationStep::ExtractMetadata,
                "Extracted from file name",
                EXTRACTION_FAILED_NOTE,
            )
        }
    }

    /// Search hits for the item, from its cache when still fresh
    async fn external_search(
        &self,
        item: &mut CandidateItem,
    ) -> Result<(ExternalQuery, Vec<ExternalHit>, bool), CatalogError> {
        let query = ExternalQuery {
            series_name: item.metadata.series_name.clone().unwrap_or_default(),
            issue_number: item.metadata.issue_number.clone(),
            year: item.metadata.year,
        };

        let now = Utc::now();
        if let Some(cache) = &item.search_cache {
            if cache.is_fresh_for(&query, now, self.cache_ttl_secs) {
                tracing::debug!(item_id = %item.id, "Using cached external search");
                return Ok((query, cache.hits.clone(), true));
            }
        }

        let hits = self.external.search(&query).await?;
        item.search_cache = Some(SearchCache {
            query: query.clone(),
            hits: hits.clone(),
            fetched_at: now,
        });
        Ok((query, hits, false))
    }

    fn select(&self, item: &mut CandidateItem, outcome: &ScoringOutcome) -> StepResult {
        match outcome.selected_candidate() {
            Some(candidate) => {
                let bound = ExternalMatch::from_hit(&candidate.hit, candidate.confidence, false);
                let description = format!(
                    "Selected \"{}\" (volume {}) at confidence {:.2}",
                    bound.volume_name, bound.volume_id, bound.confidence
                );
                let result = json!(bound);
                item.external_match = Some(bound);
                StepResult::ok(IdentificationStep::CandidateSelection, description, result)
            }
            None => {
                // an operator's choice survives a failed automatic match
                if !item.external_match.as_ref().is_some_and(|m| m.manual) {
                    item.external_match = None;
                }
                let rejected = outcome.candidates.iter().filter(|c| c.is_rejected()).count();
                StepResult::failed(
                    IdentificationStep::CandidateSelection,
                    "Candidate selection",
                    format!(
                        "no candidate met the thresholds ({} ranked, {} rejected)",
                        outcome.candidates.len(),
                        rejected
                    ),
                )
            }
        }
    }
}

fn describe_local(local_match: &LocalMatch) -> String {
    match local_match.issue_id {
        Some(issue_id) => format!(
            "Found series \"{}\" with issue {}",
            local_match.series_name, issue_id
        ),
        None => format!("Found series \"{}\" (issue not in catalog)", local_match.series_name),
    }
}
