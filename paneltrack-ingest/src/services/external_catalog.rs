//! External catalog client (Comic Vine)
//!
//! Every job shares one `RequestScheduler`, which owns both the window quota
//! (governor) and the burst guard: during the first `burst_guard_fraction` of
//! each rate-limit window, requests are spaced at least `min_gap_ms` apart
//! instead of spending the whole quota at once. Throttling responses are
//! retried with exponential backoff; exhaustion surfaces as
//! `CatalogError::Throttled` for the caller to count.

use async_trait::async_trait;
use chrono::NaiveDate;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use paneltrack_common::config::ExternalConfig;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;

use crate::models::{ExternalHit, ExternalQuery, ExternalRelease};

const USER_AGENT: &str = concat!("paneltrack/", env!("CARGO_PKG_VERSION"));
const VOLUME_SEARCH_LIMIT: usize = 20;
const RELEASE_PAGE_SIZE: usize = 100;

/// Comic Vine `status_code` values
const CV_OK: i64 = 1;
const CV_NOT_FOUND: i64 = 101;
const CV_RATE_LIMITED: i64 = 107;

/// External catalog errors
#[derive(Debug, Clone, Error, PartialEq)]
pub enum CatalogError {
    #[error("External catalog is not configured (no API key)")]
    NotConfigured,

    #[error("Network error: {0}")]
    Network(String),

    #[error("External catalog still throttling after {attempts} attempts")]
    Throttled { attempts: u32 },

    #[error("Not found in external catalog: {0}")]
    NotFound(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl CatalogError {
    pub fn is_throttle(&self) -> bool {
        matches!(self, CatalogError::Throttled { .. })
    }
}

/// External catalog contract used by identification, release scans and
/// manual overrides
#[async_trait]
pub trait ExternalCatalog: Send + Sync {
    /// Volumes matching the query's series name; when the query names an
    /// issue, hits that contain it carry the issue id and number
    async fn search(&self, query: &ExternalQuery) -> Result<Vec<ExternalHit>, CatalogError>;

    /// One volume by id, narrowed to `issue_number` when given
    async fn volume(
        &self,
        volume_id: i64,
        issue_number: Option<&str>,
    ) -> Result<ExternalHit, CatalogError>;

    /// Issues on sale between `from` and `to` inclusive
    async fn releases(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ExternalRelease>, CatalogError>;
}

/// Stand-in used when no API key is configured
#[derive(Debug, Default)]
pub struct DisabledCatalog;

#[async_trait]
impl ExternalCatalog for DisabledCatalog {
    async fn search(&self, _query: &ExternalQuery) -> Result<Vec<ExternalHit>, CatalogError> {
        Err(CatalogError::NotConfigured)
    }

    async fn volume(&self, _volume_id: i64, _issue: Option<&str>) -> Result<ExternalHit, CatalogError> {
        Err(CatalogError::NotConfigured)
    }

    async fn releases(&self, _from: NaiveDate, _to: NaiveDate) -> Result<Vec<ExternalRelease>, CatalogError> {
        Err(CatalogError::NotConfigured)
    }
}

struct SpacingState {
    window_start: Option<Instant>,
    last_request: Option<Instant>,
}

/// Shared request scheduler: window quota plus burst guard
pub struct RequestScheduler {
    quota: DefaultDirectRateLimiter,
    spacing: Mutex<SpacingState>,
    window: Duration,
    guard: Duration,
    min_gap: Duration,
}

impl RequestScheduler {
    pub fn new(config: &ExternalConfig) -> Self {
        let requests = NonZeroU32::new(config.requests_per_window.max(1)).unwrap_or(NonZeroU32::MIN);
        let window = Duration::from_secs(config.window_secs.max(1));
        let period = window / requests.get();
        let quota = Quota::with_period(period)
            .unwrap_or_else(|| Quota::per_second(requests))
            .allow_burst(requests);

        let fraction = config.burst_guard_fraction.clamp(0.0, 1.0);

        Self {
            quota: RateLimiter::direct(quota),
            spacing: Mutex::new(SpacingState {
                window_start: None,
                last_request: None,
            }),
            window,
            guard: window.mul_f64(fraction),
            min_gap: Duration::from_millis(config.min_gap_ms),
        }
    }

    /// Wait until one request may be sent
    ///
    /// Callers are serialized on the spacing lock, so concurrent jobs queue
    /// up rather than racing for the same gap.
    pub async fn acquire(&self) {
        let mut state = self.spacing.lock().await;
        let now = Instant::now();

        let window_start = match state.window_start {
            Some(start) if now.duration_since(start) < self.window => start,
            _ => {
                state.window_start = Some(now);
                now
            }
        };

        if now.duration_since(window_start) < self.guard {
            if let Some(last) = state.last_request {
                let since = now.duration_since(last);
                if since < self.min_gap {
                    let wait = self.min_gap - since;
                    tracing::debug!(wait_ms = wait.as_millis() as u64, "Burst guard: spacing request");
                    tokio::time::sleep(wait).await;
                }
            }
        }

        self.quota.until_ready().await;
        state.last_request = Some(Instant::now());
    }
}

#[derive(Debug, Deserialize)]
struct CvResponse<T> {
    status_code: i64,
    #[serde(default)]
    error: String,
    #[serde(default)]
    number_of_total_results: Option<i64>,
    results: Option<T>,
}

#[derive(Debug, Deserialize)]
struct CvNamed {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CvVolume {
    id: i64,
    name: String,
    #[serde(default)]
    start_year: Option<String>,
    #[serde(default)]
    publisher: Option<CvNamed>,
    #[serde(default)]
    count_of_issues: Option<i64>,
}

#[derive(Debug, Deserialize)]
struct CvIssueVolume {
    id: i64,
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CvIssue {
    id: i64,
    #[serde(default)]
    issue_number: Option<String>,
    #[serde(default)]
    volume: Option<CvIssueVolume>,
    #[serde(default)]
    store_date: Option<String>,
}

impl From<CvVolume> for ExternalHit {
    fn from(v: CvVolume) -> Self {
        ExternalHit {
            volume_id: v.id,
            volume_name: v.name,
            start_year: v.start_year.and_then(|y| y.trim().parse().ok()),
            publisher: v.publisher.and_then(|p| p.name),
            issue_count: v.count_of_issues,
            issue_id: None,
            issue_number: None,
        }
    }
}

/// Comic Vine API client
pub struct ComicVineClient {
    http_client: reqwest::Client,
    base_url: String,
    api_key: String,
    scheduler: Arc<RequestScheduler>,
    max_retries: u32,
    retry_backoff: Duration,
    issue_lookup_limit: usize,
}

impl ComicVineClient {
    pub fn new(
        api_key: String,
        config: &ExternalConfig,
        scheduler: Arc<RequestScheduler>,
    ) -> Result<Self, CatalogError> {
        let http_client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .connect_timeout(Duration::from_secs(config.request_timeout_secs.min(10)))
            .build()
            .map_err(|e| CatalogError::Network(e.to_string()))?;

        Ok(Self {
            http_client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            scheduler,
            max_retries: config.max_retries,
            retry_backoff: Duration::from_millis(config.retry_backoff_ms),
            issue_lookup_limit: config.issue_lookup_limit,
        })
    }

    /// GET one resource, retrying throttling responses
    async fn get<T: DeserializeOwned>(
        &self,
        path: &str,
        params: &[(&str, String)],
    ) -> Result<CvResponse<T>, CatalogError> {
        let url = format!("{}/{}", self.base_url, path);
        let mut backoff = self.retry_backoff;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            self.scheduler.acquire().await;

            tracing::debug!(url = %url, attempt, "Querying external catalog");

            let response = self
                .http_client
                .get(&url)
                .query(&[("api_key", self.api_key.as_str()), ("format", "json")])
                .query(params)
                .send()
                .await
                .map_err(|e| CatalogError::Network(e.to_string()))?;

            let status = response.status();
            let throttled_status = matches!(status.as_u16(), 420 | 429 | 503);

            let parsed = if throttled_status {
                None
            } else if !status.is_success() {
                let body = response.text().await.unwrap_or_default();
                return Err(CatalogError::Api(status.as_u16(), body));
            } else {
                let body: CvResponse<T> = response
                    .json()
                    .await
                    .map_err(|e| CatalogError::Parse(e.to_string()))?;
                if body.status_code == CV_RATE_LIMITED {
                    None
                } else {
                    Some(body)
                }
            };

            match parsed {
                Some(body) if body.status_code == CV_OK => return Ok(body),
                Some(body) if body.status_code == CV_NOT_FOUND => {
                    return Err(CatalogError::NotFound(path.to_string()))
                }
                Some(body) => {
                    return Err(CatalogError::Api(status.as_u16(), body.error));
                }
                None if attempt > self.max_retries => {
                    tracing::warn!(url = %url, attempt, "External catalog throttling, retries exhausted");
                    return Err(CatalogError::Throttled { attempts: attempt });
                }
                None => {
                    tracing::warn!(
                        url = %url,
                        attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        "External catalog throttling, backing off"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = backoff.saturating_mul(2);
                }
            }
        }
    }

    /// Narrow one volume hit to an issue number, if the volume has it
    async fn narrow_to_issue(&self, hit: &mut ExternalHit, issue_number: &str) -> Result<(), CatalogError> {
        let response: CvResponse<Vec<CvIssue>> = self
            .get(
                "issues/",
                &[
                    ("filter", format!("volume:{},issue_number:{}", hit.volume_id, issue_number)),
                    ("field_list", "id,issue_number".to_string()),
                    ("limit", "1".to_string()),
                ],
            )
            .await?;

        if let Some(issue) = response.results.unwrap_or_default().into_iter().next() {
            hit.issue_id = Some(issue.id);
            hit.issue_number = issue.issue_number;
        }
        Ok(())
    }
}

#[async_trait]
impl ExternalCatalog for ComicVineClient {
    async fn search(&self, query: &ExternalQuery) -> Result<Vec<ExternalHit>, CatalogError> {
        let response: CvResponse<Vec<CvVolume>> = self
            .get(
                "search/",
                &[
                    ("query", query.series_name.clone()),
                    ("resources", "volume".to_string()),
                    ("field_list", "id,name,start_year,publisher,count_of_issues".to_string()),
                    ("limit", VOLUME_SEARCH_LIMIT.to_string()),
                ],
            )
            .await?;

        let mut hits: Vec<ExternalHit> = response
            .results
            .unwrap_or_default()
            .into_iter()
            .map(ExternalHit::from)
            .collect();

        if let Some(issue_number) = query.issue_number.as_deref() {
            for hit in hits.iter_mut().take(self.issue_lookup_limit) {
                self.narrow_to_issue(hit, issue_number).await?;
            }
        }

        tracing::debug!(
            series = %query.series_name,
            issue = ?query.issue_number,
            hits = hits.len(),
            "External search complete"
        );

        Ok(hits)
    }

    async fn volume(
        &self,
        volume_id: i64,
        issue_number: Option<&str>,
    ) -> Result<ExternalHit, CatalogError> {
        let response: CvResponse<CvVolume> = self
            .get(
                &format!("volume/4050-{}/", volume_id),
                &[("field_list", "id,name,start_year,publisher,count_of_issues".to_string())],
            )
            .await?;

        let volume = response
            .results
            .ok_or_else(|| CatalogError::NotFound(format!("volume {}", volume_id)))?;
        let mut hit = ExternalHit::from(volume);

        if let Some(issue_number) = issue_number {
            self.narrow_to_issue(&mut hit, issue_number).await?;
        }

        Ok(hit)
    }

    async fn releases(&self, from: NaiveDate, to: NaiveDate) -> Result<Vec<ExternalRelease>, CatalogError> {
        let mut releases = Vec::new();
        let mut offset = 0usize;

        loop {
            let response: CvResponse<Vec<CvIssue>> = self
                .get(
                    "issues/",
                    &[
                        ("filter", format!("store_date:{}|{}", from, to)),
                        ("field_list", "id,issue_number,volume,store_date".to_string()),
                        ("sort", "store_date:asc".to_string()),
                        ("limit", RELEASE_PAGE_SIZE.to_string()),
                        ("offset", offset.to_string()),
                    ],
                )
                .await?;

            let total = response.number_of_total_results.unwrap_or(0).max(0) as usize;
            let page = response.results.unwrap_or_default();
            let page_len = page.len();

            releases.extend(page.into_iter().filter_map(|issue| {
                let volume = issue.volume?;
                Some(ExternalRelease {
                    issue_id: issue.id,
                    issue_number: issue.issue_number,
                    volume_id: volume.id,
                    volume_name: volume.name.unwrap_or_default(),
                    publisher: None,
                    start_year: None,
                    store_date: issue
                        .store_date
                        .and_then(|d| NaiveDate::parse_from_str(&d, "%Y-%m-%d").ok()),
                })
            }));

            offset += page_len;
            if page_len == 0 || offset >= total {
                break;
            }
        }

        tracing::info!(%from, %to, count = releases.len(), "Fetched release listing");
        Ok(releases)
    }
}
