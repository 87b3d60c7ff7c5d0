//! Scoring Engine
//!
//! Turns raw external search hits into a ranked list of `MatchCandidate`s.
//!
//! raw score = sum of the weights of satisfied criteria, where only the
//! strongest series criterion counts (exact, else prefix, else substring).
//! confidence = raw / ceiling, clamped to [0, 1]; the ceiling is
//! `max_issue_score` for issue queries and `max_volume_score` otherwise.
//!
//! Scoring is a pure function of its inputs: no clock, no I/O, and a total
//! order on the output (raw score descending, then volume id, then issue id).

use paneltrack_common::text::{normalize_issue_number, normalize_series_name};
use std::cmp::Ordering;

use crate::models::{
    Classification, CriterionScores, ExternalHit, ExternalQuery, MatchCandidate, ScoringConfig,
    ScoringOutcome,
};

pub use crate::models::SeriesMatch;

/// Compare two series names after normalization
pub fn compare_series(query: &str, candidate: &str) -> SeriesMatch {
    let q = normalize_series_name(query);
    let c = normalize_series_name(candidate);

    if q.is_empty() || c.is_empty() {
        return SeriesMatch::None;
    }
    if q == c {
        SeriesMatch::Exact
    } else if c.starts_with(&q) || q.starts_with(&c) {
        SeriesMatch::Prefix
    } else if c.contains(&q) || q.contains(&c) {
        SeriesMatch::Substring
    } else {
        SeriesMatch::None
    }
}

/// Normalized confidence for a raw score
pub fn confidence(raw_score: f64, ceiling: f64) -> f64 {
    if ceiling <= 0.0 || !raw_score.is_finite() {
        return 0.0;
    }
    (raw_score / ceiling).clamp(0.0, 1.0)
}

/// Classification from the score alone
pub fn classify(
    raw_score: f64,
    confidence: f64,
    issue_query: bool,
    config: &ScoringConfig,
) -> Classification {
    let confident = confidence >= config.min_confidence;
    let issue_ok = !issue_query || raw_score >= config.min_issue_match_score;
    if confident && issue_ok {
        Classification::Match
    } else {
        Classification::NoMatch
    }
}

/// Weighted criteria for one hit
pub fn criteria_for(
    query: &ExternalQuery,
    publisher: Option<&str>,
    hit: &ExternalHit,
    config: &ScoringConfig,
) -> CriterionScores {
    let mut scores = CriterionScores::default();

    let query_issue = query.issue_number.as_deref().and_then(normalize_issue_number);
    let hit_issue = hit.issue_number.as_deref().and_then(normalize_issue_number);
    if query_issue.is_some() && query_issue == hit_issue {
        scores.issue_matched = true;
        scores.issue_number = config.weight_issue_number;
    }

    scores.series_match = compare_series(&query.series_name, &hit.volume_name);
    match scores.series_match {
        SeriesMatch::Exact => scores.series_exact = config.weight_series_exact,
        SeriesMatch::Prefix => scores.series_prefix = config.weight_series_prefix,
        SeriesMatch::Substring => scores.series_substring = config.weight_series_substring,
        SeriesMatch::None => {}
    }

    if query.year.is_some() && query.year == hit.start_year {
        scores.start_year = config.weight_start_year;
    }

    if let (Some(wanted), Some(actual)) = (publisher, hit.publisher.as_deref()) {
        let wanted = normalize_series_name(wanted);
        if !wanted.is_empty() && wanted == normalize_series_name(actual) {
            scores.publisher = config.weight_publisher;
        }
    }

    scores
}

/// Score, rank and select
///
/// `publisher` is the publisher known for the item (from a local series
/// match), if any.
pub fn score_hits(
    query: &ExternalQuery,
    publisher: Option<&str>,
    hits: &[ExternalHit],
    config: &ScoringConfig,
) -> ScoringOutcome {
    let issue_query = query.is_issue_query();
    let ceiling = if issue_query {
        config.max_issue_score
    } else {
        config.max_volume_score
    };
    let name_length = normalize_series_name(&query.series_name).chars().count();

    let mut candidates: Vec<MatchCandidate> = hits
        .iter()
        .map(|hit| {
            let criteria = criteria_for(query, publisher, hit, config);
            let raw_score = criteria.total();
            let confidence = confidence(raw_score, ceiling);
            let classification = classify(raw_score, confidence, issue_query, config);

            let rejection_reason = if criteria.issue_matched
                && !criteria.series_matched()
                && name_length > config.minimum_series_name_length_for_rejection
            {
                Some(format!(
                    "issue {} matches but series \"{}\" does not match \"{}\"",
                    hit.issue_number.as_deref().unwrap_or("?"),
                    hit.volume_name,
                    query.series_name
                ))
            } else {
                None
            };

            MatchCandidate {
                hit: hit.clone(),
                criteria,
                raw_score,
                confidence,
                classification,
                rejection_reason,
            }
        })
        .collect();

    candidates.sort_by(rank_order);

    let selected = candidates.iter().position(MatchCandidate::is_selectable);

    ScoringOutcome {
        candidates,
        selected,
        ceiling,
        issue_query,
    }
}

fn rank_order(a: &MatchCandidate, b: &MatchCandidate) -> Ordering {
    b.raw_score
        .total_cmp(&a.raw_score)
        .then_with(|| a.hit.volume_id.cmp(&b.hit.volume_id))
        .then_with(|| a.hit.issue_id.cmp(&b.hit.issue_id))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hit(volume_id: i64, name: &str, year: Option<i32>, issue: Option<&str>) -> ExternalHit {
        ExternalHit {
            volume_id,
            volume_name: name.to_string(),
            start_year: year,
            publisher: Some("Image".to_string()),
            issue_count: None,
            issue_id: issue.map(|_| volume_id * 100),
            issue_number: issue.map(str::to_string),
        }
    }

    fn query(name: &str, issue: Option<&str>, year: Option<i32>) -> ExternalQuery {
        ExternalQuery {
            series_name: name.to_string(),
            issue_number: issue.map(str::to_string),
            year,
        }
    }

    #[test]
    fn test_series_criteria_priority() {
        assert_eq!(compare_series("Saga", "The Saga"), SeriesMatch::Exact);
        assert_eq!(compare_series("Saga", "Saga of the Swamp Thing"), SeriesMatch::Prefix);
        assert_eq!(compare_series("Swamp Thing", "Saga of the Swamp Thing"), SeriesMatch::Substring);
        assert_eq!(compare_series("Saga", "Paper Girls"), SeriesMatch::None);
    }

    #[test]
    fn test_exact_series_issue_and_year_reach_ceiling() {
        let config = ScoringConfig {
            max_issue_score: 8.5,
            ..Default::default()
        };
        let outcome = score_hits(
            &query("Saga", Some("001"), Some(2012)),
            None,
            &[hit(1, "Saga", Some(2012), Some("1"))],
            &config,
        );

        let top = outcome.selected_candidate().unwrap();
        assert_eq!(top.raw_score, 8.5);
        assert_eq!(top.confidence, 1.0);
        assert_eq!(top.classification, Classification::Match);
        assert_eq!(top.criteria.series_prefix, 0.0);
    }

    #[test]
    fn test_ties_broken_by_volume_id() {
        let config = ScoringConfig::default();
        let hits = vec![
            hit(30, "Saga", Some(2012), None),
            hit(10, "Saga", Some(2012), None),
            hit(20, "Saga", Some(2012), None),
        ];
        let outcome = score_hits(&query("Saga", None, Some(2012)), None, &hits, &config);
        let ids: Vec<i64> = outcome.candidates.iter().map(|c| c.hit.volume_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
        assert_eq!(outcome.selected, Some(0));
    }

    #[test]
    fn test_issue_match_without_series_is_rejected_for_long_names() {
        let config = ScoringConfig::default();
        let outcome = score_hits(
            &query("Paper Girls", Some("3"), None),
            None,
            &[hit(5, "Monstress", None, Some("3"))],
            &config,
        );
        let candidate = &outcome.candidates[0];
        assert!(candidate.is_rejected());
        assert!(candidate.rejection_reason.as_deref().unwrap().contains("Monstress"));
        assert_eq!(outcome.selected, None);
    }

    #[test]
    fn test_short_names_are_not_rejected() {
        let config = ScoringConfig::default();
        // "Saga" is 4 characters, at the default threshold
        let outcome = score_hits(
            &query("Saga", Some("3"), None),
            None,
            &[hit(5, "Monstress", None, Some("3"))],
            &config,
        );
        assert!(!outcome.candidates[0].is_rejected());
    }

    #[test]
    fn test_rejection_ignores_zero_weights() {
        let config = ScoringConfig {
            weight_series_substring: 0.0,
            weight_issue_number: 0.0,
            ..Default::default()
        };
        let outcome = score_hits(
            &query("Swamp Thing", Some("3"), None),
            None,
            &[hit(1, "Saga of the Swamp Thing", None, Some("3"))],
            &config,
        );
        let candidate = &outcome.candidates[0];
        assert_eq!(candidate.criteria.series_match, SeriesMatch::Substring);
        assert_eq!(candidate.criteria.series_substring, 0.0);
        assert!(!candidate.is_rejected());

        let outcome = score_hits(
            &query("Paper Girls", Some("3"), None),
            None,
            &[hit(5, "Monstress", None, Some("3"))],
            &config,
        );
        assert!(outcome.candidates[0].criteria.issue_matched);
        assert!(outcome.candidates[0].is_rejected());
    }

    #[test]
    fn test_issue_query_needs_minimum_raw_score() {
        let config = ScoringConfig {
            min_confidence: 0.1,
            ..Default::default()
        };
        // series exact only: 3.0 / 9.0 clears confidence but not the raw minimum
        let outcome = score_hits(
            &query("Saga", Some("99"), None),
            None,
            &[hit(1, "Saga", None, None)],
            &config,
        );
        assert_eq!(outcome.candidates[0].classification, Classification::NoMatch);
        assert_eq!(outcome.selected, None);
    }

    #[test]
    fn test_publisher_criterion() {
        let config = ScoringConfig::default();
        let outcome = score_hits(
            &query("Saga", None, None),
            Some("image"),
            &[hit(1, "Saga", None, None)],
            &config,
        );
        assert_eq!(outcome.candidates[0].criteria.publisher, config.weight_publisher);
    }

    #[test]
    fn test_confidence_clamped() {
        assert_eq!(confidence(20.0, 4.0), 1.0);
        assert_eq!(confidence(-1.0, 4.0), 0.0);
        assert_eq!(confidence(1.0, 0.0), 0.0);
        assert_eq!(confidence(f64::NAN, 4.0), 0.0);
    }
}
