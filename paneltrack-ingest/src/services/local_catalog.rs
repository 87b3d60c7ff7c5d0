//! Local catalog collaborator
//!
//! The user's own series/issue records, consulted before the external
//! catalog and extended by the process job.

use async_trait::async_trait;
use paneltrack_common::Result;
use sqlx::SqlitePool;

use crate::db::catalog::{self, NewSeries};
use crate::models::{ExtractedMetadata, LocalIssue, LocalMatch, LocalSeries};

#[async_trait]
pub trait LocalCatalog: Send + Sync {
    /// Series with the same normalized name, best candidate first
    async fn find_series(
        &self,
        name: &str,
        year: Option<i32>,
        volume: Option<i32>,
    ) -> Result<Vec<LocalSeries>>;

    async fn find_issue(&self, series_id: i64, number: &str) -> Result<Option<LocalIssue>>;

    /// Issue already imported from `path`
    async fn find_issue_by_path(&self, path: &str) -> Result<Option<LocalIssue>>;

    async fn series_by_external_id(&self, external_id: i64) -> Result<Option<LocalSeries>>;

    async fn series(&self, id: i64) -> Result<Option<LocalSeries>>;

    async fn create_series(&self, series: NewSeries) -> Result<LocalSeries>;

    async fn register_issue(
        &self,
        series_id: i64,
        number: &str,
        external_id: Option<i64>,
        file_path: Option<&str>,
    ) -> Result<LocalIssue>;

    /// Best local match for extracted metadata
    ///
    /// A series match alone is returned with `issue_id` unset; the issue is
    /// filled in when the series already has that number.
    async fn lookup(&self, metadata: &ExtractedMetadata) -> Result<Option<LocalMatch>> {
        let Some(name) = metadata.series_name.as_deref() else {
            return Ok(None);
        };

        let Some(series) = self
            .find_series(name, metadata.year, metadata.volume)
            .await?
            .into_iter()
            .next()
        else {
            return Ok(None);
        };

        let issue = match metadata.issue_number.as_deref() {
            Some(number) => self.find_issue(series.id, number).await?,
            None => None,
        };

        Ok(Some(LocalMatch {
            series_id: series.id,
            series_name: series.name,
            issue_id: issue.map(|i| i.id),
            publisher: series.publisher,
        }))
    }
}

/// `LocalCatalog` over the service database
#[derive(Debug, Clone)]
pub struct SqliteLocalCatalog {
    pool: SqlitePool,
}

impl SqliteLocalCatalog {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl LocalCatalog for SqliteLocalCatalog {
    async fn find_series(
        &self,
        name: &str,
        year: Option<i32>,
        volume: Option<i32>,
    ) -> Result<Vec<LocalSeries>> {
        catalog::find_series_by_name(&self.pool, name, year, volume).await
    }

    async fn find_issue(&self, series_id: i64, number: &str) -> Result<Option<LocalIssue>> {
        catalog::find_issue(&self.pool, series_id, number).await
    }

    async fn find_issue_by_path(&self, path: &str) -> Result<Option<LocalIssue>> {
        catalog::find_issue_by_path(&self.pool, path).await
    }

    async fn series_by_external_id(&self, external_id: i64) -> Result<Option<LocalSeries>> {
        catalog::find_series_by_external_id(&self.pool, external_id).await
    }

    async fn series(&self, id: i64) -> Result<Option<LocalSeries>> {
        catalog::load_series(&self.pool, id).await
    }

    async fn create_series(&self, series: NewSeries) -> Result<LocalSeries> {
        catalog::insert_series(&self.pool, &series).await
    }

    async fn register_issue(
        &self,
        series_id: i64,
        number: &str,
        external_id: Option<i64>,
        file_path: Option<&str>,
    ) -> Result<LocalIssue> {
        catalog::upsert_issue(&self.pool, series_id, number, external_id, file_path).await
    }
}
