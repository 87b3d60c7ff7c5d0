//! Scoring configuration and scoring results

use serde::{Deserialize, Serialize};

use super::catalog::ExternalHit;

/// Weights, thresholds and ceilings used by every scoring pass
///
/// Process-wide and hot-reloadable; a pass works on its own snapshot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub weight_issue_number: f64,
    pub weight_series_exact: f64,
    pub weight_series_prefix: f64,
    pub weight_series_substring: f64,
    pub weight_start_year: f64,
    pub weight_publisher: f64,
    /// Minimum normalized confidence for `match`
    pub min_confidence: f64,
    /// Minimum raw score for `match` when the query named an issue
    pub min_issue_match_score: f64,
    /// Ceiling for volume-only queries
    pub max_volume_score: f64,
    /// Ceiling for issue queries
    pub max_issue_score: f64,
    /// Series names of at most this many characters never trigger a rejection
    pub minimum_series_name_length_for_rejection: usize,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            weight_issue_number: 5.0,
            weight_series_exact: 3.0,
            weight_series_prefix: 2.0,
            weight_series_substring: 1.0,
            weight_start_year: 0.5,
            weight_publisher: 0.5,
            min_confidence: 0.7,
            min_issue_match_score: 7.0,
            max_volume_score: 4.0,
            max_issue_score: 9.0,
            minimum_series_name_length_for_rejection: 4,
        }
    }
}

impl ScoringConfig {
    /// Check ranges; returns a description of the first problem found
    pub fn validate(&self) -> Result<(), String> {
        let weights = [
            ("weight_issue_number", self.weight_issue_number),
            ("weight_series_exact", self.weight_series_exact),
            ("weight_series_prefix", self.weight_series_prefix),
            ("weight_series_substring", self.weight_series_substring),
            ("weight_start_year", self.weight_start_year),
            ("weight_publisher", self.weight_publisher),
            ("min_issue_match_score", self.min_issue_match_score),
        ];
        for (name, value) in weights {
            if !value.is_finite() || value < 0.0 {
                return Err(format!("{} must be a non-negative number, got {}", name, value));
            }
        }

        if !(0.0..=1.0).contains(&self.min_confidence) {
            return Err(format!(
                "min_confidence must be within 0.0-1.0, got {}",
                self.min_confidence
            ));
        }

        for (name, value) in [
            ("max_volume_score", self.max_volume_score),
            ("max_issue_score", self.max_issue_score),
        ] {
            if !value.is_finite() || value <= 0.0 {
                return Err(format!("{} must be positive, got {}", name, value));
            }
        }

        Ok(())
    }

    /// Build from a (possibly partial) TOML `[scoring]` table
    pub fn from_toml_table(table: toml::Table) -> Result<Self, String> {
        let config: ScoringConfig = toml::Value::Table(table)
            .try_into()
            .map_err(|e: toml::de::Error| e.to_string())?;
        config.validate()?;
        Ok(config)
    }
}

/// Categorical scoring outcome
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Classification {
    Match,
    NoMatch,
}

/// Which series-name criterion a hit satisfied
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SeriesMatch {
    Exact,
    Prefix,
    Substring,
    #[default]
    None,
}

/// Weighted contribution of each criterion (0.0 when not satisfied)
///
/// `issue_matched` and `series_match` record what was satisfied regardless
/// of weight, so a zero weight never changes the rejection rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CriterionScores {
    pub issue_matched: bool,
    pub series_match: SeriesMatch,
    pub issue_number: f64,
    pub series_exact: f64,
    pub series_prefix: f64,
    pub series_substring: f64,
    pub start_year: f64,
    pub publisher: f64,
}

impl CriterionScores {
    pub fn total(&self) -> f64 {
        self.issue_number
            + self.series_exact
            + self.series_prefix
            + self.series_substring
            + self.start_year
            + self.publisher
    }

    /// Whether any series-name criterion was satisfied
    pub fn series_matched(&self) -> bool {
        self.series_match != SeriesMatch::None
    }
}

/// One scored external hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MatchCandidate {
    pub hit: ExternalHit,
    pub criteria: CriterionScores,
    pub raw_score: f64,
    pub confidence: f64,
    pub classification: Classification,
    pub rejection_reason: Option<String>,
}

impl MatchCandidate {
    pub fn is_rejected(&self) -> bool {
        self.rejection_reason.is_some()
    }

    /// Eligible to become the selected match
    pub fn is_selectable(&self) -> bool {
        !self.is_rejected() && self.classification == Classification::Match
    }
}

/// Ranked output of one scoring pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScoringOutcome {
    /// Sorted by raw score descending, then volume id ascending
    pub candidates: Vec<MatchCandidate>,
    /// Index into `candidates` of the selected match
    pub selected: Option<usize>,
    /// Ceiling used for normalization
    pub ceiling: f64,
    pub issue_query: bool,
}

impl ScoringOutcome {
    pub fn selected_candidate(&self) -> Option<&MatchCandidate> {
        self.selected.and_then(|i| self.candidates.get(i))
    }
}
