//! Scripted external catalog

use async_trait::async_trait;
use chrono::NaiveDate;
use paneltrack_ingest::models::{ExternalHit, ExternalQuery, ExternalRelease, JobKey};
use paneltrack_ingest::services::scoring_engine::{compare_series, SeriesMatch};
use paneltrack_ingest::services::{CatalogError, ExternalCatalog, JobOrchestrator};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

/// External catalog answering from a fixed hit list
///
/// `search` returns every hit whose volume name shares a series criterion
/// with the query. Calls are counted per series name so tests can prove an
/// item was not searched twice.
#[derive(Default)]
pub struct FakeCatalog {
    hits: Vec<ExternalHit>,
    releases: Vec<ExternalRelease>,
    failing: HashSet<String>,
    throttled: HashSet<String>,
    calls: AtomicUsize,
    calls_by_series: Mutex<HashMap<String, usize>>,
    pause_hook: Mutex<Option<(usize, JobOrchestrator, JobKey)>>,
}

impl FakeCatalog {
    pub fn new(hits: Vec<ExternalHit>) -> Self {
        Self {
            hits,
            ..Default::default()
        }
    }

    pub fn with_releases(mut self, releases: Vec<ExternalRelease>) -> Self {
        self.releases = releases;
        self
    }

    /// Searches for `series` fail with a network error
    pub fn failing_for(mut self, series: &str) -> Self {
        self.failing.insert(series.to_string());
        self
    }

    /// Searches for `series` fail as exhausted throttling
    pub fn throttled_for(mut self, series: &str) -> Self {
        self.throttled.insert(series.to_string());
        self
    }

    /// Pause `key` from inside the `nth` search call (1-based)
    pub fn pause_on_call(&self, nth: usize, orchestrator: JobOrchestrator, key: JobKey) {
        *self.pause_hook.lock().unwrap() = Some((nth, orchestrator, key));
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn calls_for(&self, series: &str) -> usize {
        self.calls_by_series
            .lock()
            .unwrap()
            .get(series)
            .copied()
            .unwrap_or(0)
    }

    pub fn max_calls_per_series(&self) -> usize {
        self.calls_by_series
            .lock()
            .unwrap()
            .values()
            .copied()
            .max()
            .unwrap_or(0)
    }
}

#[async_trait]
impl ExternalCatalog for FakeCatalog {
    async fn search(&self, query: &ExternalQuery) -> Result<Vec<ExternalHit>, CatalogError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        *self
            .calls_by_series
            .lock()
            .unwrap()
            .entry(query.series_name.clone())
            .or_default() += 1;

        let hook = {
            let mut guard = self.pause_hook.lock().unwrap();
            match guard.as_ref() {
                Some((nth, _, _)) if *nth == call => guard.take(),
                _ => None,
            }
        };
        if let Some((_, orchestrator, key)) = hook {
            orchestrator.pause(key).await.unwrap();
        }

        if self.failing.contains(&query.series_name) {
            return Err(CatalogError::Network("connection reset".to_string()));
        }
        if self.throttled.contains(&query.series_name) {
            return Err(CatalogError::Throttled { attempts: 3 });
        }

        Ok(self
            .hits
            .iter()
            .filter(|hit| compare_series(&query.series_name, &hit.volume_name) != SeriesMatch::None)
            .cloned()
            .collect())
    }

    async fn volume(
        &self,
        volume_id: i64,
        _issue_number: Option<&str>,
    ) -> Result<ExternalHit, CatalogError> {
        self.hits
            .iter()
            .find(|hit| hit.volume_id == volume_id)
            .cloned()
            .ok_or_else(|| CatalogError::NotFound(format!("volume {}", volume_id)))
    }

    async fn releases(
        &self,
        from: NaiveDate,
        to: NaiveDate,
    ) -> Result<Vec<ExternalRelease>, CatalogError> {
        Ok(self
            .releases
            .iter()
            .filter(|r| r.store_date.is_some_and(|d| d >= from && d <= to))
            .cloned()
            .collect())
    }
}

pub fn hit(
    volume_id: i64,
    name: &str,
    start_year: Option<i32>,
    issue_number: Option<&str>,
) -> ExternalHit {
    ExternalHit {
        volume_id,
        volume_name: name.to_string(),
        start_year,
        publisher: Some("Image".to_string()),
        issue_count: Some(60),
        issue_id: issue_number.map(|_| volume_id * 1000),
        issue_number: issue_number.map(str::to_string),
    }
}
